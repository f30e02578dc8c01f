//! dApp bridge sessions
//! Pairing URIs, the session repository contract, a local session state
//! machine and the session manager consumed by front ends

pub mod frame;
pub mod manager;
pub mod repository;
pub mod uri;

pub use frame::{frames, Changefeed, Frame, Keyed, ListDiff};
pub use manager::SessionManager;
pub use repository::{LocalBridgeRepository, SessionState, SessionTransport};
pub use uri::PairingUri;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bridge errors. Cloneable so the manager can hand them on unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid pairing URI: {0}")]
    InvalidUri(String),
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    #[error("Session {id} cannot {operation} while {state}")]
    InvalidState {
        id: String,
        operation: &'static str,
        state: String,
    },
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Metadata a dApp announces about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Session as listed to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub dapp_name: Option<String>,
    pub dapp_description: Option<String>,
    pub dapp_url: Option<String>,
    pub active: bool,
    pub dapp_icons: Option<Vec<String>>,
}

impl SessionMeta {
    /// Metadata of a session whose peer is not known yet
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            dapp_name: None,
            dapp_description: None,
            dapp_url: None,
            active: false,
            dapp_icons: None,
        }
    }

    pub fn with_peer(mut self, peer: &PeerMeta) -> Self {
        self.dapp_name = peer.name.clone();
        self.dapp_description = peer.description.clone();
        self.dapp_url = peer.url.clone();
        self.dapp_icons = if peer.icons.is_empty() {
            None
        } else {
            Some(peer.icons.clone())
        };
        self
    }
}

impl Keyed for SessionMeta {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Request sent by a dApp over an active session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub request_id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Event on a single session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MetaUpdate(SessionMeta),
    Request { id: String, request: SessionRequest },
    Closed(String),
}

/// Session repository contract.
///
/// Every failure is reported as-is; callers decide about retries.
#[async_trait::async_trait]
pub trait BridgeRepository: Send + Sync {
    /// Parse a pairing URI and allocate a session id
    fn create_session(&self, uri: &str) -> Result<String, BridgeError>;

    /// Start the transport handshake of an existing session
    async fn init_session(&self, session_id: &str) -> Result<(), BridgeError>;

    async fn approve_session(&self, session_id: &str) -> Result<(), BridgeError>;

    async fn reject_session(&self, session_id: &str) -> Result<(), BridgeError>;

    /// Disconnect and destroy the session
    async fn close_session(&self, session_id: &str) -> Result<(), BridgeError>;

    /// Bring a dormant session back so it can be initialised again
    async fn activate_session(&self, session_id: &str) -> Result<(), BridgeError>;

    /// Events of one session; ends only on error
    fn observe_session(&self, session_id: &str) -> BoxStream<'static, Result<SessionEvent, BridgeError>>;

    /// Current session list followed by every change
    fn observe_sessions(&self) -> BoxStream<'static, Result<Vec<SessionMeta>, BridgeError>>;
}
