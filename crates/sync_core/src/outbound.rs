//! Compose path: user action → optimistic store entry → wire frame.

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, MessageStatus, ReadReceipt},
    protocol::{ClientEvent, DirectSendPayload, GroupSendPayload},
};

use crate::{
    error::SyncError,
    store::{Attachment, ConversationKey, Message, PendingSend},
    ChatClient, SyncEvent,
};

/// Attachment bytes handed over by the (out-of-scope) picker layer.
#[derive(Debug, Clone)]
pub struct AttachmentSource {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ChatClient {
    /// Sends a message into the active conversation.
    ///
    /// Fails fast with `ConnectionUnavailable` before any mutation when
    /// the socket is down. If an attachment is present it is uploaded
    /// first; no optimistic entry exists until the upload succeeds, so a
    /// failed upload never leaves a Sent message with a dangling
    /// attachment reference. The optimistic entry is appended with
    /// `status = Sent` and the frame emitted with its temporary id
    /// embedded; a failed emit rolls the entry back. Confirmation
    /// arrives asynchronously through the dispatcher.
    ///
    /// Deliberately not idempotent: every call is a new message, and
    /// deduplication is by id only, never payload equality.
    pub async fn compose(
        &self,
        text: &str,
        attachment: Option<AttachmentSource>,
    ) -> Result<MessageId, SyncError> {
        if !self.connection.is_connected().await {
            return Err(SyncError::ConnectionUnavailable);
        }
        let text = text.trim();
        if text.is_empty() && attachment.is_none() {
            return Err(SyncError::EmptyMessage);
        }
        let (conversation, generation) = {
            let guard = self.inner.lock().await;
            let Some(active) = guard.active.clone() else {
                return Err(SyncError::NoActiveConversation);
            };
            (active, guard.generation)
        };

        let uploaded = match attachment {
            Some(source) => Some(
                self.rest
                    .upload_file(&self.session, source)
                    .await
                    .map_err(|source| SyncError::AttachmentUploadFailed { source })?,
            ),
            None => None,
        };

        let temp_id = MessageId::local();
        let now = Utc::now();
        let frame = self.send_frame(&conversation, &temp_id, text, uploaded.as_ref());
        let entry = self.optimistic_entry(&conversation, &temp_id, text, uploaded, now);

        {
            let mut guard = self.inner.lock().await;
            // The upload await may have outlived the conversation.
            if guard.generation != generation {
                return Err(SyncError::ConversationChanged);
            }
            guard.pending.register(
                temp_id.clone(),
                PendingSend {
                    conversation: conversation.clone(),
                    composed_at: now,
                },
            );
            guard.store.append(entry);
        }

        if let Err(err) = self.connection.emit(&frame).await {
            let mut guard = self.inner.lock().await;
            guard.store.remove(&temp_id);
            guard.pending.complete(&temp_id);
            return Err(err);
        }

        let _ = self.events.send(SyncEvent::MessageAppended {
            message_id: temp_id.clone(),
        });
        Ok(temp_id)
    }

    fn send_frame(
        &self,
        conversation: &ConversationKey,
        temp_id: &MessageId,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> ClientEvent {
        let (file_url, file_name, file_type) = match attachment {
            Some(a) => (
                Some(a.url.clone()),
                Some(a.name.clone()),
                Some(a.mime_type.clone()),
            ),
            None => (None, None, None),
        };
        match conversation {
            ConversationKey::Direct { peer } => ClientEvent::SendMessage(DirectSendPayload {
                temp_id: temp_id.clone(),
                sender_id: self.session.user_id.clone(),
                receiver_id: peer.clone(),
                text: text.to_string(),
                file_url,
                file_name,
                file_type,
            }),
            ConversationKey::Group { group } => {
                ClientEvent::SendGroupMessage(GroupSendPayload {
                    temp_id: temp_id.clone(),
                    group_id: group.clone(),
                    sender_id: self.session.user_id.clone(),
                    text: text.to_string(),
                    file_url,
                    file_name,
                    file_type,
                })
            }
        }
    }

    fn optimistic_entry(
        &self,
        conversation: &ConversationKey,
        temp_id: &MessageId,
        text: &str,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Message {
        let (recipient_id, read_by) = match conversation {
            ConversationKey::Direct { peer } => (Some(peer.clone()), Vec::new()),
            // The sender has trivially read their own group message.
            ConversationKey::Group { .. } => (
                None,
                vec![ReadReceipt {
                    user_id: self.session.user_id.clone(),
                    read_at: now,
                }],
            ),
        };
        Message {
            id: temp_id.clone(),
            conversation: conversation.clone(),
            sender_id: self.session.user_id.clone(),
            recipient_id,
            sender_name: None,
            text: (!text.is_empty()).then(|| text.to_string()),
            attachment,
            status: MessageStatus::Sent,
            timestamp: now,
            read_at: None,
            read_by,
        }
    }
}

#[cfg(test)]
#[path = "tests/outbound_tests.rs"]
mod tests;
