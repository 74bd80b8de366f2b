//! Client-side messaging synchronization engine.
//!
//! Owns the message lifecycle (composed → sent optimistically →
//! acknowledged → delivered → read), the reconciliation of optimistic
//! entries with server-echoed canonical messages, and peer presence —
//! all over one persistent connection to the messaging server. The view
//! layer reads the store and presence snapshots, calls [`ChatClient`]
//! operations, and watches the [`SyncEvent`] bus; it never mutates
//! engine state directly.

use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{GroupId, MessageId, MessageStatus, UserId},
    error::ApiError,
    protocol::{ClientEvent, DirectMessagePayload, GroupMessagePayload, ServerEvent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::warn;

pub mod config;
pub mod connection;
pub mod error;
pub mod outbound;
pub mod presence;
mod read_tracker;
pub mod rest;
pub mod session;
pub mod store;
pub mod transport;

pub use config::{load_settings, load_settings_from, Settings};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::SyncError;
pub use outbound::AttachmentSource;
pub use presence::PresenceTracker;
pub use rest::{GroupUnreadCount, LoginOutcome, RestClient};
pub use session::Session;
pub use store::{
    Attachment, ConversationKey, Message, MessageStore, PendingSend, PendingSendRegistry,
};

use transport::{SocketConnector, WebSocketConnector};

const EVENT_BUS_DEPTH: usize = 1024;

/// Engine notifications for the view layer. Events carry ids; the view
/// re-reads the store snapshot for content.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Connection(ConnectionState),
    MessageAppended {
        message_id: MessageId,
    },
    /// An optimistic entry was collapsed into its canonical form.
    MessageConfirmed {
        temp_id: MessageId,
        message_id: MessageId,
    },
    StatusUpdated {
        message_id: MessageId,
        status: MessageStatus,
    },
    GroupReadUpdated {
        message_id: MessageId,
    },
    PresenceChanged,
    /// The server rejected an emitted message. The optimistic entry is
    /// left in place for the view to flag as unconfirmed.
    SendRejected {
        error: ApiError,
    },
    ConversationLoaded {
        conversation: ConversationKey,
    },
    Error(String),
}

pub struct ChatClient {
    pub(crate) session: Session,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) rest: RestClient,
    pub(crate) presence: PresenceTracker,
    pub(crate) inner: Mutex<ClientState>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct ClientState {
    pub(crate) store: MessageStore,
    pub(crate) pending: PendingSendRegistry,
    pub(crate) active: Option<ConversationKey>,
    /// Bumped on every conversation switch; async work captures the
    /// value at start and discards its result on mismatch.
    pub(crate) generation: u64,
}

impl ChatClient {
    pub fn new(session: Session, settings: Settings) -> Arc<Self> {
        Self::with_connector(session, settings, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(
        session: Session,
        settings: Settings,
        connector: Arc<dyn SocketConnector>,
    ) -> Arc<Self> {
        let connection = ConnectionManager::new(session.clone(), settings.clone(), connector);
        let rest = RestClient::new(settings.server_url.clone());
        let (events, _) = broadcast::channel(EVENT_BUS_DEPTH);
        Arc::new(Self {
            session,
            connection,
            rest,
            presence: PresenceTracker::default(),
            inner: Mutex::new(ClientState {
                store: MessageStore::default(),
                pending: PendingSendRegistry::default(),
                active: None,
                generation: 0,
            }),
            events,
            dispatch_task: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Starts the dispatcher and the connection run loop. Establishment
    /// is asynchronous; watch `SyncEvent::Connection`.
    pub async fn connect(self: &Arc<Self>) {
        {
            let mut guard = self.dispatch_task.lock().await;
            let needs_dispatcher = guard.as_ref().map_or(true, |task| task.is_finished());
            if needs_dispatcher {
                let rx = self.connection.subscribe();
                let client = Arc::clone(self);
                *guard = Some(tokio::spawn(async move { client.dispatch(rx).await }));
            }
        }
        self.connection.connect().await;
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Snapshot of the active conversation, ordered by timestamp.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.store.messages().to_vec()
    }

    pub async fn active_conversation(&self) -> Option<ConversationKey> {
        self.inner.lock().await.active.clone()
    }

    pub async fn online_users(&self) -> HashSet<UserId> {
        self.presence.online().await
    }

    pub async fn unread_group_counts(&self) -> Result<Vec<GroupUnreadCount>, SyncError> {
        Ok(self.rest.fetch_group_unread_counts(&self.session).await?)
    }

    /// Switches to a one-to-one conversation, discarding the previous
    /// store contents and fetching history.
    pub async fn open_direct(&self, peer: UserId) -> Result<(), SyncError> {
        let conversation = ConversationKey::Direct { peer: peer.clone() };
        let generation = self.begin_conversation(conversation.clone()).await;
        let history = self.rest.fetch_direct_history(&self.session, &peer).await?;
        let messages = history
            .into_iter()
            .map(|payload| Message::from_direct(payload, &self.session.user_id))
            .collect();
        self.finish_conversation_load(conversation, generation, messages)
            .await;
        Ok(())
    }

    /// Switches to a group conversation: joins the group room, then
    /// fetches history.
    pub async fn open_group(&self, group: GroupId) -> Result<(), SyncError> {
        let conversation = ConversationKey::Group {
            group: group.clone(),
        };
        let generation = self.begin_conversation(conversation.clone()).await;
        let _ = self
            .connection
            .emit(&ClientEvent::JoinGroup {
                group_id: group.clone(),
            })
            .await;
        let history = self.rest.fetch_group_history(&self.session, &group).await?;
        let messages = history.into_iter().map(Message::from_group).collect();
        self.finish_conversation_load(conversation, generation, messages)
            .await;
        Ok(())
    }

    async fn begin_conversation(&self, conversation: ConversationKey) -> u64 {
        let (generation, previous) = {
            let mut guard = self.inner.lock().await;
            guard.generation += 1;
            guard.store.clear();
            // In-flight sends of the previous conversation are stale;
            // their echoes will be ignored by the active-conversation
            // check in the dispatcher.
            guard.pending.clear();
            (guard.generation, guard.active.replace(conversation))
        };
        if let Some(ConversationKey::Group { group }) = previous {
            let _ = self
                .connection
                .emit(&ClientEvent::LeaveGroup { group_id: group })
                .await;
        }
        generation
    }

    async fn finish_conversation_load(
        &self,
        conversation: ConversationKey,
        generation: u64,
        messages: Vec<Message>,
    ) {
        {
            let mut guard = self.inner.lock().await;
            // Switched again while the fetch was in flight.
            if guard.generation != generation {
                return;
            }
            guard.store.hydrate(messages);
        }
        let _ = self
            .events
            .send(SyncEvent::ConversationLoaded { conversation });
    }

    async fn dispatch(self: Arc<Self>, mut rx: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match rx.recv().await {
                Ok(ConnectionEvent::State(state)) => {
                    let _ = self.events.send(SyncEvent::Connection(state));
                }
                Ok(ConnectionEvent::Frame(frame)) => self.apply_frame(frame).await,
                Ok(ConnectionEvent::Error(message)) => {
                    let _ = self.events.send(SyncEvent::Error(message));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dispatcher lagged behind connection events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub(crate) async fn apply_frame(&self, frame: ServerEvent) {
        match frame {
            ServerEvent::ReceiveMessage { message } => self.apply_direct_message(message).await,
            ServerEvent::ReceiveGroupMessage { message } => {
                self.apply_group_message(message).await
            }
            ServerEvent::MessageStatusUpdate {
                message_id,
                status,
                read_at,
            } => self.apply_status_update(message_id, status, read_at).await,
            ServerEvent::GroupMessageStatusUpdate {
                message_id,
                read_by,
                ..
            } => self.apply_group_read_update(message_id, read_by).await,
            ServerEvent::UsersStatusUpdate(users) => {
                self.presence.apply_snapshot(users).await;
                let _ = self.events.send(SyncEvent::PresenceChanged);
            }
            ServerEvent::UserStatusChange { user_id, online } => {
                self.presence.apply_delta(user_id, online).await;
                let _ = self.events.send(SyncEvent::PresenceChanged);
            }
            ServerEvent::MessageError { error } | ServerEvent::GroupMessageError { error } => {
                let _ = self.events.send(SyncEvent::SendRejected { error });
            }
        }
    }

    async fn apply_direct_message(&self, payload: DirectMessagePayload) {
        let temp_ref = payload.temp_id.clone();
        let message = Message::from_direct(payload, &self.session.user_id);
        self.apply_inbound(temp_ref, message).await;
    }

    async fn apply_group_message(&self, payload: GroupMessagePayload) {
        let temp_ref = payload.temp_id.clone();
        let message = Message::from_group(payload);
        self.apply_inbound(temp_ref, message).await;
    }

    /// Applies one inbound canonical message. If it confirms an
    /// in-flight send (echoed temp id found in the registry) the
    /// optimistic entry is collapsed in place; otherwise it is appended,
    /// idempotently.
    async fn apply_inbound(&self, temp_ref: Option<MessageId>, message: Message) {
        let event = {
            let mut guard = self.inner.lock().await;
            if guard.active.as_ref() != Some(&message.conversation) {
                // Frame for an inactive conversation; the store is
                // conversation-scoped, so this is a no-op by contract.
                return;
            }
            let message_id = message.id.clone();
            if let Some(temp_id) = temp_ref.filter(|id| guard.pending.contains(id)) {
                guard.pending.complete(&temp_id);
                guard.store.replace_temporary(&temp_id, message);
                Some(SyncEvent::MessageConfirmed {
                    temp_id,
                    message_id,
                })
            } else if guard.store.append(message) {
                Some(SyncEvent::MessageAppended { message_id })
            } else {
                None
            }
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
