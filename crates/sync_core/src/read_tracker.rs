//! Read/delivery tracking: outbound read receipts for what the viewer
//! sees, and application of remote status updates to the store.

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, MessageStatus, ReadReceipt, UserId},
    protocol::ClientEvent,
};
use tracing::debug;

use crate::{store::ConversationKey, ChatClient, SyncEvent};

impl ChatClient {
    /// Scans the visible conversation as the viewer and emits one read
    /// receipt per message not yet read by them, applying the read
    /// locally first. The store's monotonic guard is the only debounce:
    /// a message already Read (or already carrying the viewer's group
    /// receipt) is skipped, so repeated scans never re-emit.
    ///
    /// Best-effort by design: emit failures are logged and dropped, and
    /// local reads are never rolled back if the server later rejects the
    /// receipt — over-applied reads are monotonic and harmless.
    pub async fn observe_visible(&self) {
        let viewer = self.session.user_id.clone();
        let now = Utc::now();
        let mut outgoing = Vec::new();
        {
            let mut guard = self.inner.lock().await;
            let Some(active) = guard.active.clone() else {
                return;
            };
            match active {
                ConversationKey::Direct { .. } => {
                    let unread: Vec<(MessageId, UserId)> = guard
                        .store
                        .messages()
                        .iter()
                        .filter(|m| {
                            m.recipient_id.as_ref() == Some(&viewer)
                                && m.status < MessageStatus::Read
                        })
                        .map(|m| (m.id.clone(), m.sender_id.clone()))
                        .collect();
                    for (message_id, sender_id) in unread {
                        if guard
                            .store
                            .update_status(&message_id, MessageStatus::Read, Some(now))
                        {
                            outgoing.push((
                                ClientEvent::MessageRead {
                                    message_id: message_id.clone(),
                                    read_by: viewer.clone(),
                                    sender_id,
                                },
                                SyncEvent::StatusUpdated {
                                    message_id,
                                    status: MessageStatus::Read,
                                },
                            ));
                        }
                    }
                }
                ConversationKey::Group { group } => {
                    let unread: Vec<MessageId> = guard
                        .store
                        .messages()
                        .iter()
                        .filter(|m| m.sender_id != viewer && !m.is_read_by(&viewer))
                        .map(|m| m.id.clone())
                        .collect();
                    for message_id in unread {
                        if guard.store.mark_member_read(&message_id, &viewer, now) {
                            outgoing.push((
                                ClientEvent::GroupMessageRead {
                                    message_id: message_id.clone(),
                                    user_id: viewer.clone(),
                                    group_id: group.clone(),
                                },
                                SyncEvent::GroupReadUpdated { message_id },
                            ));
                        }
                    }
                }
            }
        }
        for (frame, event) in outgoing {
            if let Err(err) = self.connection.emit(&frame).await {
                debug!(error = %err, "read receipt not sent");
            }
            let _ = self.events.send(event);
        }
    }

    /// Applies a `message_status_update` frame. The remote Read
    /// transition here is how a sender sees their own message become
    /// Read: the other party read it.
    pub(crate) async fn apply_status_update(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        read_at: Option<DateTime<Utc>>,
    ) {
        let applied = {
            self.inner
                .lock()
                .await
                .store
                .update_status(&message_id, status, read_at)
        };
        if applied {
            let _ = self
                .events
                .send(SyncEvent::StatusUpdated { message_id, status });
        }
    }

    /// Applies a `group_message_status_update` fan-in frame.
    pub(crate) async fn apply_group_read_update(
        &self,
        message_id: MessageId,
        read_by: Vec<ReadReceipt>,
    ) {
        let changed = {
            self.inner
                .lock()
                .await
                .store
                .merge_read_receipts(&message_id, &read_by)
        };
        if changed {
            let _ = self.events.send(SyncEvent::GroupReadUpdated { message_id });
        }
    }
}

#[cfg(test)]
#[path = "tests/read_tracker_tests.rs"]
mod tests;
