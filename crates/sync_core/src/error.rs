use thiserror::Error;

/// Errors surfaced to callers of the synchronization engine.
///
/// Server-side rejection of an already-emitted message (`message_error`)
/// is not here: it arrives asynchronously and is surfaced on the event
/// bus as [`crate::SyncEvent::SendRejected`], with the optimistic entry
/// left in place for the view layer to flag.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no active connection to the messaging server")]
    ConnectionUnavailable,
    #[error("message is empty: text or attachment required")]
    EmptyMessage,
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("conversation changed while the send was in flight")]
    ConversationChanged,
    #[error("attachment upload failed: {source}")]
    AttachmentUploadFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("http request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}
