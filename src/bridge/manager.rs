//! Session manager
//! Thin orchestration over a bridge repository for UI and daemon callers

use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bridge::frame::{frames, Frame};
use crate::bridge::{BridgeError, BridgeRepository, SessionEvent, SessionMeta};

pub struct SessionManager {
    repository: Arc<dyn BridgeRepository>,
}

impl SessionManager {
    pub fn new(repository: Arc<dyn BridgeRepository>) -> Self {
        Self { repository }
    }

    /// Create a session from a pairing URI and start its handshake
    pub async fn create_session(&self, uri: &str) -> Result<String, BridgeError> {
        let id = self.repository.create_session(uri).map_err(|e| {
            warn!("⚠️ Rejected pairing URI: {}", e);
            e
        })?;
        info!("🔗 Session {} created", id);
        self.repository.init_session(&id).await?;
        Ok(id)
    }

    pub async fn init_session(&self, session_id: &str) -> Result<(), BridgeError> {
        debug!("Initialising session {}", session_id);
        self.repository.init_session(session_id).await
    }

    pub async fn approve_session(&self, session_id: &str) -> Result<(), BridgeError> {
        self.repository.approve_session(session_id).await?;
        info!("✅ Session {} approved", session_id);
        Ok(())
    }

    pub async fn deny_session(&self, session_id: &str) -> Result<(), BridgeError> {
        self.repository.reject_session(session_id).await?;
        info!("🚫 Session {} denied", session_id);
        Ok(())
    }

    pub async fn kill_session(&self, session_id: &str) -> Result<(), BridgeError> {
        self.repository.close_session(session_id).await?;
        info!("🔌 Session {} closed", session_id);
        Ok(())
    }

    /// Reactivate a dormant session, then rerun its handshake
    pub async fn activate_session(&self, session_id: &str) -> Result<(), BridgeError> {
        self.repository.activate_session(session_id).await?;
        self.repository.init_session(session_id).await
    }

    pub fn observe_session(&self, session_id: &str) -> BoxStream<'static, Result<SessionEvent, BridgeError>> {
        self.repository.observe_session(session_id)
    }

    pub fn observe_sessions(&self) -> BoxStream<'static, Result<Frame<SessionMeta>, BridgeError>> {
        frames(self.repository.observe_sessions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use std::sync::Mutex;

    /// Records calls and fails the operations it is told to fail
    #[derive(Default)]
    struct RecordingRepository {
        calls: Mutex<Vec<String>>,
        fail: Mutex<Vec<&'static str>>,
        lists: Mutex<Vec<Result<Vec<SessionMeta>, BridgeError>>>,
    }

    impl RecordingRepository {
        fn failing(operations: &[&'static str]) -> Self {
            let repository = Self::default();
            *repository.fail.lock().unwrap() = operations.to_vec();
            repository
        }

        fn record(&self, operation: &'static str, id: &str) -> Result<(), BridgeError> {
            self.calls.lock().unwrap().push(format!("{}:{}", operation, id));
            if self.fail.lock().unwrap().contains(&operation) {
                Err(BridgeError::Transport(format!("{} failed", operation)))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BridgeRepository for RecordingRepository {
        fn create_session(&self, uri: &str) -> Result<String, BridgeError> {
            self.record("create", uri)?;
            Ok("session".to_string())
        }

        async fn init_session(&self, session_id: &str) -> Result<(), BridgeError> {
            self.record("init", session_id)
        }

        async fn approve_session(&self, session_id: &str) -> Result<(), BridgeError> {
            self.record("approve", session_id)
        }

        async fn reject_session(&self, session_id: &str) -> Result<(), BridgeError> {
            self.record("reject", session_id)
        }

        async fn close_session(&self, session_id: &str) -> Result<(), BridgeError> {
            self.record("close", session_id)
        }

        async fn activate_session(&self, session_id: &str) -> Result<(), BridgeError> {
            self.record("activate", session_id)
        }

        fn observe_session(&self, session_id: &str) -> BoxStream<'static, Result<SessionEvent, BridgeError>> {
            let _ = self.record("observe", session_id);
            stream::iter(vec![
                Ok(SessionEvent::MetaUpdate(SessionMeta::new(session_id))),
                Err(BridgeError::Transport("gone".to_string())),
            ])
            .boxed()
        }

        fn observe_sessions(&self) -> BoxStream<'static, Result<Vec<SessionMeta>, BridgeError>> {
            let lists = std::mem::take(&mut *self.lists.lock().unwrap());
            stream::iter(lists).boxed()
        }
    }

    fn manager(repository: &Arc<RecordingRepository>) -> SessionManager {
        SessionManager::new(repository.clone())
    }

    #[tokio::test]
    async fn test_create_session_inits() {
        let repository = Arc::new(RecordingRepository::default());
        let id = manager(&repository).create_session("wc:uri").await.unwrap();
        assert_eq!(id, "session");
        assert_eq!(repository.calls(), vec!["create:wc:uri", "init:session"]);
    }

    #[tokio::test]
    async fn test_create_session_error_skips_init() {
        let repository = Arc::new(RecordingRepository::failing(&["create"]));
        let result = manager(&repository).create_session("wc:uri").await;
        assert_eq!(result, Err(BridgeError::Transport("create failed".to_string())));
        assert_eq!(repository.calls(), vec!["create:wc:uri"]);
    }

    #[tokio::test]
    async fn test_create_session_init_error_propagates() {
        let repository = Arc::new(RecordingRepository::failing(&["init"]));
        let result = manager(&repository).create_session("wc:uri").await;
        assert_eq!(result, Err(BridgeError::Transport("init failed".to_string())));
    }

    #[tokio::test]
    async fn test_deny_and_kill_map_to_reject_and_close() {
        let repository = Arc::new(RecordingRepository::default());
        let manager = manager(&repository);
        manager.approve_session("a").await.unwrap();
        manager.deny_session("b").await.unwrap();
        manager.kill_session("c").await.unwrap();
        assert_eq!(repository.calls(), vec!["approve:a", "reject:b", "close:c"]);
    }

    #[tokio::test]
    async fn test_activate_session_inits_once_on_success() {
        let repository = Arc::new(RecordingRepository::default());
        manager(&repository).activate_session("a").await.unwrap();
        assert_eq!(repository.calls(), vec!["activate:a", "init:a"]);
    }

    #[tokio::test]
    async fn test_activate_session_error_skips_init() {
        let repository = Arc::new(RecordingRepository::failing(&["activate"]));
        let result = manager(&repository).activate_session("a").await;
        assert!(result.is_err());
        assert_eq!(repository.calls(), vec!["activate:a"]);
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let repository = Arc::new(RecordingRepository::failing(&["approve", "reject", "close"]));
        let manager = manager(&repository);
        assert_eq!(
            manager.approve_session("a").await,
            Err(BridgeError::Transport("approve failed".to_string()))
        );
        assert_eq!(
            manager.deny_session("a").await,
            Err(BridgeError::Transport("reject failed".to_string()))
        );
        assert_eq!(
            manager.kill_session("a").await,
            Err(BridgeError::Transport("close failed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_observe_session_forwards_events() {
        let repository = Arc::new(RecordingRepository::default());
        let events: Vec<_> = manager(&repository).observe_session("a").collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(SessionEvent::MetaUpdate(SessionMeta::new("a"))));
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn test_observe_sessions_frames() {
        let repository = Arc::new(RecordingRepository::default());
        let mut listed = SessionMeta::new("a");
        listed.active = true;
        *repository.lists.lock().unwrap() = vec![
            Ok(vec![listed.clone()]),
            Err(BridgeError::Transport("dropped".to_string())),
        ];

        let items: Vec<_> = manager(&repository).observe_sessions().collect().await;
        assert_eq!(items.len(), 3);

        let root = items[0].as_ref().unwrap();
        assert!(root.parent_id.is_none() && root.diff.is_none() && root.entries.is_empty());

        let first = items[1].as_ref().unwrap();
        assert_eq!(first.parent_id, Some(root.id));
        assert!(first.diff.is_some());
        assert_eq!(first.entries, vec![listed]);

        assert_eq!(items[2], Err(BridgeError::Transport("dropped".to_string())));
    }
}
