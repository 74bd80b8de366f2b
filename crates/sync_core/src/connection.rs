//! Ownership of the single persistent connection to the messaging server.
//!
//! Nothing outside this module writes to the socket; other components
//! observe lifecycle and inbound frames through the broadcast bus and
//! send through [`ConnectionManager::emit`], which fails fast whenever
//! the connection is not up (there is no offline queue).

use std::sync::Arc;

use shared::protocol::{ClientEvent, ServerEvent};
use tokio::{
    sync::{broadcast, mpsc, Mutex, Notify},
    task::JoinHandle,
    time::sleep,
};
use tracing::{info, warn};

use crate::{
    config::Settings,
    error::SyncError,
    session::Session,
    transport::{socket_url, SocketConnector, SocketDuplex},
};

const EVENT_BUS_DEPTH: usize = 1024;
const OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Frame(ServerEvent),
    Error(String),
}

pub struct ConnectionManager {
    session: Session,
    settings: Settings,
    connector: Arc<dyn SocketConnector>,
    pub(crate) inner: Mutex<ConnInner>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: Notify,
}

pub(crate) struct ConnInner {
    pub(crate) state: ConnectionState,
    pub(crate) outbound: Option<mpsc::Sender<String>>,
    pub(crate) shutting_down: bool,
    run_task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        session: Session,
        settings: Settings,
        connector: Arc<dyn SocketConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUS_DEPTH);
        Arc::new(Self {
            session,
            settings,
            connector,
            inner: Mutex::new(ConnInner {
                state: ConnectionState::Disconnected,
                outbound: None,
                shutting_down: false,
                run_task: None,
            }),
            events,
            shutdown: Notify::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.state == ConnectionState::Connected
    }

    /// Starts the run loop if it is not already running. Establishment is
    /// asynchronous; observe `ConnectionEvent::State` for the outcome.
    pub async fn connect(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        if guard
            .run_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        guard.shutting_down = false;
        let manager = Arc::clone(self);
        guard.run_task = Some(tokio::spawn(async move { manager.run().await }));
    }

    /// Graceful teardown: best-effort presence goodbye, then stop the run
    /// loop without further reconnect attempts.
    pub async fn disconnect(&self) {
        let _ = self
            .emit(&ClientEvent::UserDisconnected {
                user_id: self.session.user_id.clone(),
            })
            .await;
        {
            let mut guard = self.inner.lock().await;
            guard.shutting_down = true;
            // Dropping the sender drains queued frames (the goodbye
            // included) and then ends the pump.
            guard.outbound = None;
        }
        self.shutdown.notify_waiters();
    }

    /// Queues one frame for the writer. Rejected immediately with
    /// `ConnectionUnavailable` unless the connection is up.
    pub async fn emit(&self, frame: &ClientEvent) -> Result<(), SyncError> {
        let guard = self.inner.lock().await;
        if guard.state != ConnectionState::Connected {
            return Err(SyncError::ConnectionUnavailable);
        }
        let Some(tx) = guard.outbound.as_ref() else {
            return Err(SyncError::ConnectionUnavailable);
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "dropping unencodable outbound frame");
                return Err(SyncError::ConnectionUnavailable);
            }
        };
        tx.try_send(text)
            .map_err(|_| SyncError::ConnectionUnavailable)
    }

    async fn run(self: Arc<Self>) {
        let url = match socket_url(&self.settings.server_url, &self.session.auth_token) {
            Ok(url) => url,
            Err(err) => {
                let _ = self
                    .events
                    .send(ConnectionEvent::Error(format!("invalid server url: {err}")));
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }
        };

        let mut failures: u32 = 0;
        let mut ever_connected = false;
        loop {
            if self.is_shutting_down().await {
                break;
            }
            self.set_state(if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            })
            .await;

            match self.connector.open(&url).await {
                Ok(mut duplex) => {
                    let announce = ClientEvent::UserConnected {
                        user_id: self.session.user_id.clone(),
                    };
                    match serde_json::to_string(&announce) {
                        Ok(text) => {
                            if let Err(err) = duplex.send(text).await {
                                warn!(error = %err, "presence announce failed; retrying connection");
                                failures += 1;
                                if self.retries_exhausted(failures).await {
                                    break;
                                }
                                continue;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to encode presence announce");
                        }
                    }

                    failures = 0;
                    ever_connected = true;
                    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
                    {
                        let mut guard = self.inner.lock().await;
                        guard.outbound = Some(tx);
                    }
                    self.set_state(ConnectionState::Connected).await;
                    info!(user_id = %self.session.user_id, "connected to messaging server");

                    self.pump(duplex, rx).await;

                    {
                        let mut guard = self.inner.lock().await;
                        guard.outbound = None;
                    }
                    if self.is_shutting_down().await {
                        break;
                    }
                    warn!("connection to messaging server lost");
                    failures += 1;
                }
                Err(err) => {
                    warn!(error = %err, attempt = failures + 1, "socket connect failed");
                    failures += 1;
                }
            }

            if self.retries_exhausted(failures).await {
                break;
            }

            tokio::select! {
                _ = sleep(self.settings.reconnect_delay) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Writer/reader loop over one established socket; returns when the
    /// socket closes or fails in either direction.
    async fn pump(&self, mut duplex: Box<dyn SocketDuplex>, mut outbound: mpsc::Receiver<String>) {
        loop {
            tokio::select! {
                queued = outbound.recv() => match queued {
                    Some(text) => {
                        if let Err(err) = duplex.send(text).await {
                            warn!(error = %err, "socket send failed");
                            return;
                        }
                    }
                    None => return,
                },
                frame = duplex.recv() => match frame {
                    Some(Ok(text)) => self.dispatch_frame(&text),
                    Some(Err(err)) => {
                        let _ = self.events.send(ConnectionEvent::Error(format!(
                            "socket receive failed: {err}"
                        )));
                        return;
                    }
                    None => return,
                },
            }
        }
    }

    fn dispatch_frame(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                let _ = self.events.send(ConnectionEvent::Frame(event));
            }
            Err(err) => {
                let _ = self
                    .events
                    .send(ConnectionEvent::Error(format!("invalid server frame: {err}")));
            }
        }
    }

    async fn retries_exhausted(&self, failures: u32) -> bool {
        if failures <= self.settings.reconnect_attempts {
            return false;
        }
        let _ = self.events.send(ConnectionEvent::Error(format!(
            "reconnect attempts exhausted after {} tries",
            self.settings.reconnect_attempts
        )));
        true
    }

    async fn is_shutting_down(&self) -> bool {
        self.inner.lock().await.shutting_down
    }

    async fn set_state(&self, state: ConnectionState) {
        {
            let mut guard = self.inner.lock().await;
            if guard.state == state {
                return;
            }
            guard.state = state;
        }
        let _ = self.events.send(ConnectionEvent::State(state));
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
