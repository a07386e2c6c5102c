use std::{sync::Arc, time::Instant};

use {
    axum::extract::ws::{CloseFrame, Message},
    dashmap::DashMap,
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    uuid::Uuid,
};

use {
    tether_auth::{Credentials, TokenService},
    tether_config::WebInterfaceConfig,
    tether_protocol::{CLOSE_GOING_AWAY, ServerFrame},
    tether_simulation::SimulationFacade,
};

use crate::skins::SkinStore;

// ── Session ──────────────────────────────────────────────────────────────────

/// Frames a session may have queued before further frames are dropped.
pub const OUTBOUND_QUEUE: usize = 256;

/// Outbound queue for one session's writer task.
pub fn outbound_queue() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    mpsc::channel(OUTBOUND_QUEUE)
}

/// One open WebSocket connection.
#[derive(Debug)]
pub struct Session {
    pub client_id: Uuid,
    /// Token subject the connection authenticated as.
    pub subject: String,
    /// Queue drained by the connection's single writer task.
    pub sender: mpsc::Sender<Message>,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(client_id: Uuid, subject: impl Into<String>, sender: mpsc::Sender<Message>) -> Self {
        Self {
            client_id,
            subject: subject.into(),
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Queue a frame for this session's writer without waiting. A full
    /// queue means the client is not reading; the frame is dropped.
    pub fn send(&self, frame: &ServerFrame) -> Result<(), SessionError> {
        self.push(Message::Text(frame.to_json().into()))
    }

    fn push(&self, msg: Message) -> Result<(), SessionError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::Lagging(self.client_id),
            TrySendError::Closed(_) => SessionError::TransportClosed(self.client_id),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no session {0}")]
    NotFound(Uuid),
    #[error("transport for session {0} is closed")]
    TransportClosed(Uuid),
    #[error("outbound queue for session {0} is full")]
    Lagging(Uuid),
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Open sessions keyed by client id.
///
/// Sends only push onto each session's outbound queue, so no shard lock is
/// held across a socket write.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `id`, replacing any previous entry.
    pub fn add(&self, id: Uuid, session: Session) {
        if self.sessions.insert(id, session).is_some() {
            debug!(client_id = %id, "replaced existing session");
        }
    }

    pub fn remove(&self, id: &Uuid) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Send to one session. A closed transport stays registered until the
    /// connection task removes it.
    pub fn send_to(&self, id: &Uuid, frame: &ServerFrame) -> Result<(), SessionError> {
        let session = self.sessions.get(id).ok_or(SessionError::NotFound(*id))?;
        session.send(frame)
    }

    /// Best-effort fan-out. Returns how many sessions accepted the frame.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        let text = frame.to_json();
        let mut delivered = 0;
        for entry in self.sessions.iter() {
            match entry.push(Message::Text(text.as_str().into())) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client_id = %entry.key(), error = %e, "broadcast not delivered"),
            }
        }
        delivered
    }

    /// Send a going-away close to every session and empty the registry.
    pub fn close_all(&self) -> usize {
        let ids = self.ids();
        let mut closed = 0;
        for id in ids {
            let Some(session) = self.remove(&id) else {
                continue;
            };
            let frame = CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "Server shutting down".into(),
            };
            if let Err(e) = session.push(Message::Close(Some(frame))) {
                debug!(client_id = %id, error = %e, "close frame not queued");
            }
            closed += 1;
        }
        closed
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared runtime state handed to every handler.
pub struct GatewayState {
    pub sessions: SessionRegistry,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<Credentials>,
    pub simulation: Arc<dyn SimulationFacade>,
    pub skins: SkinStore,
    pub enforce_ownership: bool,
    pub version: String,
    /// Cancelled when the owning server stops.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        web: &WebInterfaceConfig,
        tokens: Arc<TokenService>,
        credentials: Arc<Credentials>,
        simulation: Arc<dyn SimulationFacade>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionRegistry::new(),
            tokens,
            credentials,
            simulation,
            skins: SkinStore::new(web.skins_dir.clone(), web.max_skin_bytes),
            enforce_ownership: web.enforce_ownership,
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown: CancellationToken::new(),
        })
    }
}
