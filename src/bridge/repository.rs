//! In-process bridge repository
//! Session state machine over a pluggable transport, with change broadcasts

use alloy_primitives::Address;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::uri::PairingUri;
use crate::bridge::{BridgeError, BridgeRepository, PeerMeta, SessionEvent, SessionMeta, SessionRequest};

const EVENT_CAPACITY: usize = 64;

/// Wire side of a session. Implementations talk to the bridge server.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Run the handshake and return what the dApp announced
    async fn connect(&self, uri: &PairingUri) -> Result<PeerMeta, BridgeError>;

    async fn approve(&self, uri: &PairingUri, accounts: &[Address]) -> Result<(), BridgeError>;

    async fn reject(&self, uri: &PairingUri) -> Result<(), BridgeError>;

    async fn disconnect(&self, uri: &PairingUri) -> Result<(), BridgeError>;
}

/// Lifecycle of a live session. Rejected and closed sessions are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PendingApproval,
    Active,
    /// Known but not connected; can be activated again
    Dormant,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::PendingApproval => "pending approval",
            SessionState::Active => "active",
            SessionState::Dormant => "dormant",
        };
        f.write_str(name)
    }
}

struct Session {
    seq: u64,
    /// Bumped on every change; transitions that awaited the transport
    /// only apply if nothing else changed the session meanwhile
    generation: u64,
    uri: PairingUri,
    state: SessionState,
    peer: Option<PeerMeta>,
}

impl Session {
    fn meta(&self, id: &str) -> SessionMeta {
        let meta = SessionMeta::new(id);
        let mut meta = match &self.peer {
            Some(peer) => meta.with_peer(peer),
            None => meta,
        };
        meta.active = self.state == SessionState::Active;
        meta
    }
}

/// Snapshot taken before a transport call
struct Observed {
    uri: PairingUri,
    state: SessionState,
    generation: u64,
}

#[derive(Default)]
struct Sessions {
    next_seq: u64,
    by_id: HashMap<String, Session>,
}

pub struct LocalBridgeRepository {
    transport: Arc<dyn SessionTransport>,
    accounts: Vec<Address>,
    sessions: Mutex<Sessions>,
    events: broadcast::Sender<(String, SessionEvent)>,
    listing: watch::Sender<Vec<SessionMeta>>,
}

impl LocalBridgeRepository {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (listing, _) = watch::channel(Vec::new());
        Self {
            transport,
            accounts: Vec::new(),
            sessions: Mutex::new(Sessions::default()),
            events,
            listing,
        }
    }

    /// Accounts exposed to dApps on approval
    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// State of a known session; `None` once rejected or closed
    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.lock().by_id.get(session_id).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-register a dormant session, e.g. one persisted before a restart
    pub fn restore_session(&self, uri: &str, peer: Option<PeerMeta>) -> Result<String, BridgeError> {
        let uri = PairingUri::parse(uri)?;
        let id = self.insert(uri, SessionState::Dormant, peer);
        self.publish_listing();
        Ok(id)
    }

    /// Transport lost the connection; the session stays listed as inactive
    pub fn mark_disconnected(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(
            session_id,
            "disconnect",
            &[SessionState::PendingApproval, SessionState::Active],
        )?;
        let meta = self.transition(session_id, "disconnect", &observed, SessionState::Dormant, None)?;
        warn!("⚠️ Session {} lost its bridge connection", session_id);
        self.emit(session_id, SessionEvent::MetaUpdate(meta));
        Ok(())
    }

    /// Deliver a dApp request to observers of an active session
    pub fn publish_request(&self, session_id: &str, request: SessionRequest) -> Result<(), BridgeError> {
        self.expect_state(session_id, "receive requests", &[SessionState::Active])?;
        debug!("📨 Request {} ({}) on session {}", request.request_id, request.method, session_id);
        self.emit(
            session_id,
            SessionEvent::Request {
                id: session_id.to_string(),
                request,
            },
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, uri: PairingUri, state: SessionState, peer: Option<PeerMeta>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.lock();
        let seq = sessions.next_seq;
        sessions.next_seq += 1;
        sessions.by_id.insert(
            id.clone(),
            Session {
                seq,
                generation: 0,
                uri,
                state,
                peer,
            },
        );
        id
    }

    /// Check the state and snapshot what the transport call needs
    fn expect_state(
        &self,
        session_id: &str,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<Observed, BridgeError> {
        let sessions = self.lock();
        let session = sessions
            .by_id
            .get(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        if !allowed.contains(&session.state) {
            return Err(BridgeError::InvalidState {
                id: session_id.to_string(),
                operation,
                state: session.state.to_string(),
            });
        }
        Ok(Observed {
            uri: session.uri.clone(),
            state: session.state,
            generation: session.generation,
        })
    }

    /// Find the session again, failing if it changed since `observed`
    fn recheck<'a>(
        sessions: &'a mut Sessions,
        session_id: &str,
        operation: &'static str,
        observed: &Observed,
    ) -> Result<&'a mut Session, BridgeError> {
        let session = sessions
            .by_id
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        if session.generation != observed.generation {
            return Err(BridgeError::InvalidState {
                id: session_id.to_string(),
                operation,
                state: session.state.to_string(),
            });
        }
        Ok(session)
    }

    /// Apply a transition if the session is unchanged since `observed`
    fn transition(
        &self,
        session_id: &str,
        operation: &'static str,
        observed: &Observed,
        state: SessionState,
        peer: Option<PeerMeta>,
    ) -> Result<SessionMeta, BridgeError> {
        let meta = {
            let mut sessions = self.lock();
            let session = Self::recheck(&mut sessions, session_id, operation, observed)?;
            session.state = state;
            session.generation += 1;
            if peer.is_some() {
                session.peer = peer;
            }
            session.meta(session_id)
        };
        self.publish_listing();
        Ok(meta)
    }

    /// Destroy a session if it is unchanged since `observed`
    fn remove(&self, session_id: &str, operation: &'static str, observed: &Observed) -> Result<(), BridgeError> {
        {
            let mut sessions = self.lock();
            Self::recheck(&mut sessions, session_id, operation, observed)?;
            sessions.by_id.remove(session_id);
        }
        self.publish_listing();
        self.emit(session_id, SessionEvent::Closed(session_id.to_string()));
        Ok(())
    }

    fn emit(&self, session_id: &str, event: SessionEvent) {
        // no receivers is fine
        let _ = self.events.send((session_id.to_string(), event));
    }

    fn publish_listing(&self) {
        let listing = {
            let sessions = self.lock();
            let mut listed: Vec<(&String, &Session)> = sessions.by_id.iter().collect();
            listed.sort_by_key(|(_, s)| s.seq);
            listed.into_iter().map(|(id, s)| s.meta(id)).collect::<Vec<_>>()
        };
        self.listing.send_replace(listing);
    }
}

#[async_trait]
impl BridgeRepository for LocalBridgeRepository {
    fn create_session(&self, uri: &str) -> Result<String, BridgeError> {
        let uri = PairingUri::parse(uri)?;
        let topic = uri.topic.clone();
        let id = self.insert(uri, SessionState::Created, None);
        self.publish_listing();
        debug!("Session {} allocated for topic {}", id, topic);
        Ok(id)
    }

    async fn init_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(
            session_id,
            "init",
            &[SessionState::Created, SessionState::PendingApproval],
        )?;

        let peer = self.transport.connect(&observed.uri).await.map_err(|e| {
            warn!("⚠️ Handshake failed for session {}: {}", session_id, e);
            e
        })?;

        let name = peer.name.clone();
        let meta = self.transition(session_id, "init", &observed, SessionState::PendingApproval, Some(peer))?;
        info!(
            "🤝 Session {} connected to {}",
            session_id,
            name.as_deref().unwrap_or("unknown dApp")
        );
        self.emit(session_id, SessionEvent::MetaUpdate(meta));
        Ok(())
    }

    async fn approve_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(session_id, "approve", &[SessionState::PendingApproval])?;
        self.transport.approve(&observed.uri, &self.accounts).await?;

        let meta = self.transition(session_id, "approve", &observed, SessionState::Active, None)?;
        self.emit(session_id, SessionEvent::MetaUpdate(meta));
        Ok(())
    }

    async fn reject_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(session_id, "reject", &[SessionState::PendingApproval])?;
        self.transport.reject(&observed.uri).await?;
        self.remove(session_id, "reject", &observed)
    }

    async fn close_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(
            session_id,
            "close",
            &[
                SessionState::Created,
                SessionState::PendingApproval,
                SessionState::Active,
                SessionState::Dormant,
            ],
        )?;
        if matches!(observed.state, SessionState::PendingApproval | SessionState::Active) {
            self.transport.disconnect(&observed.uri).await?;
        }
        self.remove(session_id, "close", &observed)
    }

    async fn activate_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let observed = self.expect_state(session_id, "activate", &[SessionState::Dormant])?;
        self.transition(session_id, "activate", &observed, SessionState::PendingApproval, None)?;
        debug!("Session {} reactivated", session_id);
        Ok(())
    }

    fn observe_session(&self, session_id: &str) -> BoxStream<'static, Result<SessionEvent, BridgeError>> {
        if !self.lock().by_id.contains_key(session_id) {
            let unknown = BridgeError::UnknownSession(session_id.to_string());
            return stream::once(async move { Err(unknown) }).boxed();
        }

        let id = session_id.to_string();
        let receiver = self.events.subscribe();
        stream::unfold(Some(receiver), move |receiver| {
            let id = id.clone();
            async move {
                let mut receiver = receiver?;
                loop {
                    match receiver.recv().await {
                        Ok((event_id, event)) if event_id == id => {
                            return Some((Ok(event), Some(receiver)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            let error = BridgeError::Transport(format!("observer lagged by {} events", missed));
                            return Some((Err(error), None));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }

    fn observe_sessions(&self) -> BoxStream<'static, Result<Vec<SessionMeta>, BridgeError>> {
        let receiver = self.listing.subscribe();
        stream::unfold((receiver, true), |(mut receiver, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let listing = receiver.borrow_and_update().clone();
            Some((Ok(listing), (receiver, false)))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    const URI: &str = "wc:topic@1?bridge=https%3A%2F%2Fbridge.example.org&key=5a2a9f0d1b6d8c3e4f7a9b0c1d2e3f405162738495a6b7c8d9eaf0b1c2d3e4f5";

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<&'static str>>,
        fail_connect: bool,
        /// When set, `approve` signals `entered` and waits for `release`
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn connect(&self, _uri: &PairingUri) -> Result<PeerMeta, BridgeError> {
            self.calls.lock().unwrap().push("connect");
            if self.fail_connect {
                return Err(BridgeError::Transport("unreachable".to_string()));
            }
            Ok(PeerMeta {
                name: Some("Example dApp".to_string()),
                description: None,
                url: Some("https://dapp.example.org".to_string()),
                icons: vec![],
            })
        }

        async fn approve(&self, _uri: &PairingUri, _accounts: &[Address]) -> Result<(), BridgeError> {
            self.calls.lock().unwrap().push("approve");
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            Ok(())
        }

        async fn reject(&self, _uri: &PairingUri) -> Result<(), BridgeError> {
            self.calls.lock().unwrap().push("reject");
            Ok(())
        }

        async fn disconnect(&self, _uri: &PairingUri) -> Result<(), BridgeError> {
            self.calls.lock().unwrap().push("disconnect");
            Ok(())
        }
    }

    fn repository() -> (Arc<FakeTransport>, LocalBridgeRepository) {
        let transport = Arc::new(FakeTransport::default());
        let repository = LocalBridgeRepository::new(transport.clone());
        (transport, repository)
    }

    /// Repository whose `approve` blocks until released
    fn gated_repository() -> (Arc<Notify>, Arc<Notify>, Arc<LocalBridgeRepository>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Arc::new(FakeTransport {
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        (entered, release, Arc::new(LocalBridgeRepository::new(transport)))
    }

    #[tokio::test]
    async fn test_lifecycle_to_active_and_closed() {
        let (transport, repository) = repository();
        let id = repository.create_session(URI).unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::Created));

        repository.init_session(&id).await.unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::PendingApproval));

        repository.approve_session(&id).await.unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::Active));

        repository.close_session(&id).await.unwrap();
        assert_eq!(repository.state(&id), None);
        assert!(repository.is_empty());
        assert_eq!(transport.calls(), vec!["connect", "approve", "disconnect"]);

        assert_eq!(
            repository.close_session(&id).await,
            Err(BridgeError::UnknownSession(id.clone()))
        );
    }

    #[tokio::test]
    async fn test_invalid_uri_allocates_nothing() {
        let (_, repository) = repository();
        assert!(matches!(
            repository.create_session("wc:broken"),
            Err(BridgeError::InvalidUri(_))
        ));
        let mut listing = repository.observe_sessions();
        assert_eq!(listing.next().await, Some(Ok(vec![])));
    }

    #[tokio::test]
    async fn test_approve_requires_pending() {
        let (_, repository) = repository();
        let id = repository.create_session(URI).unwrap();
        assert!(matches!(
            repository.approve_session(&id).await,
            Err(BridgeError::InvalidState { operation: "approve", .. })
        ));
        assert_eq!(
            repository.approve_session("missing").await,
            Err(BridgeError::UnknownSession("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_handshake_keeps_state() {
        let transport = Arc::new(FakeTransport {
            fail_connect: true,
            ..Default::default()
        });
        let repository = LocalBridgeRepository::new(transport);
        let id = repository.create_session(URI).unwrap();
        assert!(repository.init_session(&id).await.is_err());
        assert_eq!(repository.state(&id), Some(SessionState::Created));
    }

    #[tokio::test]
    async fn test_rejected_sessions_are_destroyed() {
        let (_, repository) = repository();
        for _ in 0..100 {
            let id = repository.create_session(URI).unwrap();
            repository.init_session(&id).await.unwrap();
            repository.reject_session(&id).await.unwrap();
            assert_eq!(repository.state(&id), None);
            assert!(matches!(
                repository.activate_session(&id).await,
                Err(BridgeError::UnknownSession(_))
            ));
        }

        assert!(repository.is_empty());
        let mut listing = repository.observe_sessions();
        assert_eq!(listing.next().await, Some(Ok(vec![])));
    }

    #[tokio::test]
    async fn test_close_wins_over_inflight_approve() {
        let (entered, release, repository) = gated_repository();
        let id = repository.create_session(URI).unwrap();
        repository.init_session(&id).await.unwrap();

        let approving = {
            let repository = repository.clone();
            let id = id.clone();
            tokio::spawn(async move { repository.approve_session(&id).await })
        };
        entered.notified().await;

        repository.close_session(&id).await.unwrap();
        release.notify_one();

        let approved = approving.await.unwrap();
        assert_eq!(approved, Err(BridgeError::UnknownSession(id.clone())));
        assert_eq!(repository.state(&id), None);
    }

    #[tokio::test]
    async fn test_stale_approve_does_not_apply_after_reactivation() {
        let (entered, release, repository) = gated_repository();
        let id = repository.create_session(URI).unwrap();
        repository.init_session(&id).await.unwrap();

        let approving = {
            let repository = repository.clone();
            let id = id.clone();
            tokio::spawn(async move { repository.approve_session(&id).await })
        };
        entered.notified().await;

        // Same state as before, but not the same session generation
        repository.mark_disconnected(&id).unwrap();
        repository.activate_session(&id).await.unwrap();
        release.notify_one();

        let approved = approving.await.unwrap();
        assert!(matches!(
            approved,
            Err(BridgeError::InvalidState { operation: "approve", .. })
        ));
        assert_eq!(repository.state(&id), Some(SessionState::PendingApproval));
    }

    #[tokio::test]
    async fn test_activate_dormant_session() {
        let (transport, repository) = repository();
        let id = repository.restore_session(URI, None).unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::Dormant));

        repository.activate_session(&id).await.unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::PendingApproval));
        repository.init_session(&id).await.unwrap();
        repository.approve_session(&id).await.unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::Active));
        assert_eq!(transport.calls(), vec!["connect", "approve"]);
    }

    #[tokio::test]
    async fn test_mark_disconnected_keeps_session_listed() {
        let (_, repository) = repository();
        let id = repository.create_session(URI).unwrap();
        repository.init_session(&id).await.unwrap();
        repository.approve_session(&id).await.unwrap();

        repository.mark_disconnected(&id).unwrap();
        assert_eq!(repository.state(&id), Some(SessionState::Dormant));

        let listing = repository.observe_sessions().next().await.unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert!(!listing[0].active);
        assert!(matches!(
            repository.approve_session(&id).await,
            Err(BridgeError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_observe_session_events() {
        let (_, repository) = repository();
        let id = repository.create_session(URI).unwrap();
        let other = repository.create_session(URI).unwrap();
        let mut events = repository.observe_session(&id);

        repository.init_session(&other).await.unwrap();
        repository.init_session(&id).await.unwrap();
        repository.approve_session(&id).await.unwrap();
        repository
            .publish_request(
                &id,
                SessionRequest {
                    request_id: 1,
                    method: "eth_sendTransaction".to_string(),
                    params: serde_json::json!([]),
                },
            )
            .unwrap();
        repository.close_session(&id).await.unwrap();

        match events.next().await {
            Some(Ok(SessionEvent::MetaUpdate(meta))) => {
                assert_eq!(meta.id, id);
                assert_eq!(meta.dapp_name.as_deref(), Some("Example dApp"));
                assert!(!meta.active);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match events.next().await {
            Some(Ok(SessionEvent::MetaUpdate(meta))) => assert!(meta.active),
            other => panic!("unexpected event {:?}", other),
        }
        match events.next().await {
            Some(Ok(SessionEvent::Request { request, .. })) => assert_eq!(request.method, "eth_sendTransaction"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events.next().await, Some(Ok(SessionEvent::Closed(id.clone()))));
    }

    #[tokio::test]
    async fn test_observe_unknown_session_errors() {
        let (_, repository) = repository();
        let events: Vec<_> = repository.observe_session("missing").collect().await;
        assert_eq!(events, vec![Err(BridgeError::UnknownSession("missing".to_string()))]);
    }

    #[tokio::test]
    async fn test_observe_sessions_follows_changes() {
        let (_, repository) = repository();
        let mut listing = repository.observe_sessions();
        assert_eq!(listing.next().await, Some(Ok(vec![])));

        let id = repository.create_session(URI).unwrap();
        let next = listing.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, id);
        assert!(!next[0].active);
    }
}
