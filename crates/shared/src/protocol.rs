//! Wire frames exchanged over the persistent connection.
//!
//! Frames are JSON objects shaped `{"event": "...", "data": {...}}`, one
//! frame per websocket text message. Transport-level connect/disconnect
//! are lifecycle states of the connection manager, not frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{GroupId, MessageId, MessageStatus, ReadReceipt, UserId},
    error::ApiError,
};

/// Client-originated frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserConnected {
        user_id: UserId,
    },
    UserDisconnected {
        user_id: UserId,
    },
    SendMessage(DirectSendPayload),
    SendGroupMessage(GroupSendPayload),
    MessageRead {
        message_id: MessageId,
        read_by: UserId,
        sender_id: UserId,
    },
    GroupMessageRead {
        message_id: MessageId,
        user_id: UserId,
        group_id: GroupId,
    },
    JoinGroup {
        group_id: GroupId,
    },
    LeaveGroup {
        group_id: GroupId,
    },
}

/// Server-originated frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage {
        message: DirectMessagePayload,
    },
    ReceiveGroupMessage {
        message: GroupMessagePayload,
    },
    MessageStatusUpdate {
        message_id: MessageId,
        status: MessageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        read_at: Option<DateTime<Utc>>,
    },
    GroupMessageStatusUpdate {
        message_id: MessageId,
        group_id: GroupId,
        read_by: Vec<ReadReceipt>,
    },
    UsersStatusUpdate(Vec<PresenceUpdate>),
    UserStatusChange {
        user_id: UserId,
        online: bool,
    },
    MessageError {
        error: ApiError,
    },
    GroupMessageError {
        error: ApiError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectSendPayload {
    pub temp_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSendPayload {
    pub temp_id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Canonical one-to-one message as persisted by the server. `temp_id` is
/// echoed back on frames confirming a send from this client so the
/// dispatcher can collapse the optimistic entry deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessagePayload {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessagePayload {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
    pub group_id: GroupId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub online: bool,
}
