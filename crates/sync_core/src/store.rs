//! Conversation-scoped message collection and the pending-send registry.
//!
//! Every mutation here is idempotent or monotonic-guarded: compose
//! actions, inbound frames and read scans interleave arbitrarily on the
//! event loop, so no method may depend on call ordering for correctness.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{GroupId, MessageId, MessageStatus, ReadReceipt, UserId},
    protocol::{DirectMessagePayload, GroupMessagePayload},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct { peer: UserId },
    Group { group: GroupId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub mime_type: String,
}

impl Attachment {
    /// Builds an attachment from the wire triple. The url is required;
    /// name and mime type fall back to placeholders if the server omits
    /// them.
    pub fn from_parts(
        url: Option<String>,
        name: Option<String>,
        mime_type: Option<String>,
    ) -> Option<Self> {
        url.map(|url| Self {
            url,
            name: name.unwrap_or_else(|| "file".to_string()),
            mime_type: mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        })
    }
}

/// A store entry, unified over one-to-one and group conversations.
///
/// `status`/`read_at` are meaningful for direct messages only; `read_by`
/// for group messages only. `id` is temporary until the server echo
/// collapses it to the canonical id.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender_id: UserId,
    pub recipient_id: Option<UserId>,
    pub sender_name: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub read_by: Vec<ReadReceipt>,
}

impl Message {
    pub fn from_direct(payload: DirectMessagePayload, self_id: &UserId) -> Self {
        let peer = if payload.sender_id == *self_id {
            payload.receiver_id.clone()
        } else {
            payload.sender_id.clone()
        };
        Self {
            id: payload.id,
            conversation: ConversationKey::Direct { peer },
            sender_id: payload.sender_id,
            recipient_id: Some(payload.receiver_id),
            sender_name: None,
            text: payload.text,
            attachment: Attachment::from_parts(
                payload.file_url,
                payload.file_name,
                payload.file_type,
            ),
            status: payload.status,
            timestamp: payload.timestamp,
            read_at: payload.read_at,
            read_by: Vec::new(),
        }
    }

    pub fn from_group(payload: GroupMessagePayload) -> Self {
        Self {
            id: payload.id,
            conversation: ConversationKey::Group {
                group: payload.group_id,
            },
            sender_id: payload.sender_id,
            recipient_id: None,
            sender_name: payload.sender_name,
            text: payload.text,
            attachment: Attachment::from_parts(
                payload.file_url,
                payload.file_name,
                payload.file_type,
            ),
            status: MessageStatus::Sent,
            timestamp: payload.timestamp,
            read_at: None,
            read_by: payload.read_by,
        }
    }

    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_by.iter().any(|r| r.user_id == *user_id)
    }
}

/// Ordered, deduplicated message collection for the active conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<Message>,
}

impl MessageStore {
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| m.id == *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts in timestamp order. Appending an id already present is a
    /// no-op; returns whether the message was inserted.
    pub fn append(&mut self, message: Message) -> bool {
        if self.entries.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.entries.insert(at, message);
        true
    }

    /// Collapses a temporary entry into its server-confirmed form. This
    /// is the only path that may replace an id; canonical fields win,
    /// local-only fields the server omitted are preserved. Falls back to
    /// `append` when the temporary entry is missing (the echo can arrive
    /// before the optimistic insert in a tight race).
    pub fn replace_temporary(&mut self, temp_id: &MessageId, mut canonical: Message) -> bool {
        if self
            .entries
            .iter()
            .any(|m| m.id == canonical.id && m.id != *temp_id)
        {
            // Echo already applied; just drop the temporary entry.
            self.entries.retain(|m| m.id != *temp_id);
            return true;
        }

        let Some(at) = self.entries.iter().position(|m| m.id == *temp_id) else {
            self.append(canonical);
            return false;
        };

        let local = &self.entries[at];
        if canonical.text.is_none() {
            canonical.text = local.text.clone();
        }
        if canonical.attachment.is_none() {
            canonical.attachment = local.attachment.clone();
        }
        canonical.status = local.status.max(canonical.status);
        if canonical.read_at.is_none() {
            canonical.read_at = local.read_at;
        }
        let local_receipts = local.read_by.clone();
        for receipt in local_receipts {
            if !canonical.is_read_by(&receipt.user_id) {
                canonical.read_by.push(receipt);
            }
        }

        self.entries[at] = canonical;
        self.nudge_forward(at);
        true
    }

    /// Applies a delivery-state transition if it moves forward; older or
    /// equal states and unknown ids are no-ops (the update may target a
    /// message of a conversation that is no longer active).
    pub fn update_status(
        &mut self,
        id: &MessageId,
        status: MessageStatus,
        read_at: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(message) = self.entries.iter_mut().find(|m| m.id == *id) else {
            return false;
        };
        if status <= message.status {
            return false;
        }
        message.status = status;
        if message.read_at.is_none() {
            message.read_at = read_at;
        }
        true
    }

    /// Records one member's read receipt on a group message. First write
    /// wins; re-marking and unknown ids are no-ops.
    pub fn mark_member_read(
        &mut self,
        id: &MessageId,
        user_id: &UserId,
        read_at: DateTime<Utc>,
    ) -> bool {
        let Some(message) = self.entries.iter_mut().find(|m| m.id == *id) else {
            return false;
        };
        if message.is_read_by(user_id) {
            return false;
        }
        message.read_by.push(ReadReceipt {
            user_id: user_id.clone(),
            read_at,
        });
        true
    }

    /// Merges a server-side read fan-in into a group message. Union per
    /// user, first write wins; returns whether anything changed.
    pub fn merge_read_receipts(&mut self, id: &MessageId, receipts: &[ReadReceipt]) -> bool {
        let Some(message) = self.entries.iter_mut().find(|m| m.id == *id) else {
            return false;
        };
        let mut changed = false;
        for receipt in receipts {
            if !message.read_by.iter().any(|r| r.user_id == receipt.user_id) {
                message.read_by.push(receipt.clone());
                changed = true;
            }
        }
        changed
    }

    /// Replaces the store contents with a fetched history, deduplicated
    /// and ordered.
    pub fn hydrate(&mut self, messages: Vec<Message>) {
        self.entries.clear();
        for message in messages {
            self.append(message);
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|m| m.id != *id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Restores ascending timestamp order after a confirmation updated
    /// the entry at `at`. Only ever moves the entry forward: a server
    /// timestamp earlier than the local one never makes a visible
    /// message jump backward.
    fn nudge_forward(&mut self, mut at: usize) {
        while at + 1 < self.entries.len()
            && self.entries[at].timestamp > self.entries[at + 1].timestamp
        {
            self.entries.swap(at, at + 1);
            at += 1;
        }
    }
}

/// One in-flight optimistic send awaiting its server echo.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub conversation: ConversationKey,
    pub composed_at: DateTime<Utc>,
}

/// Explicit temporary-id → in-flight-send map. The inbound dispatcher
/// consults it to collapse temp/canonical pairs deterministically; no
/// code anywhere matches on id shape.
#[derive(Debug, Default)]
pub struct PendingSendRegistry {
    in_flight: HashMap<MessageId, PendingSend>,
}

impl PendingSendRegistry {
    pub fn register(&mut self, temp_id: MessageId, pending: PendingSend) {
        self.in_flight.insert(temp_id, pending);
    }

    /// Takes the in-flight record for `temp_id`, if any. Used both when
    /// the echo arrives and when a failed emit rolls the send back.
    pub fn complete(&mut self, temp_id: &MessageId) -> Option<PendingSend> {
        self.in_flight.remove(temp_id)
    }

    pub fn contains(&self, temp_id: &MessageId) -> bool {
        self.in_flight.contains_key(temp_id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
