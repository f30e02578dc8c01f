//! Local Safe storage
//! Safes and pending Safes kept in memory and optionally persisted as JSON

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::wallet::safe::{DeployedSafe, PendingSafe};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Pending Safe not found: {0}")]
    PendingSafeNotFound(Address),
    #[error("Safe already exists: {0}")]
    AlreadyExists(Address),
    #[error("Storage I/O error: {0}")]
    Io(String),
    #[error("Storage format error: {0}")]
    Format(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Format(e.to_string())
    }
}

/// Persistent store for Safe and pending Safe records
#[async_trait::async_trait]
pub trait SafeStore: Send + Sync {
    /// Look up a deployed Safe
    async fn query_safe(&self, address: Address) -> Result<Option<DeployedSafe>, StoreError>;

    /// Look up a pending Safe
    async fn query_pending_safe(&self, address: Address) -> Result<Option<PendingSafe>, StoreError>;

    /// All deployed Safes
    async fn load_safes(&self) -> Result<Vec<DeployedSafe>, StoreError>;

    /// Add a deployed Safe
    async fn insert_safe(&self, safe: DeployedSafe) -> Result<(), StoreError>;

    /// Add a pending Safe
    async fn insert_pending_safe(&self, safe: PendingSafe) -> Result<(), StoreError>;

    /// Replace a pending Safe with its deployed record
    async fn pending_safe_to_deployed_safe(&self, address: Address) -> Result<DeployedSafe, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SafeSnapshot {
    #[serde(default)]
    safes: Vec<DeployedSafe>,
    #[serde(default)]
    pending_safes: Vec<PendingSafe>,
}

impl SafeSnapshot {
    fn contains(&self, address: Address) -> bool {
        self.safes.iter().any(|s| s.address == address)
            || self.pending_safes.iter().any(|s| s.address == address)
    }
}

/// Safe store backed by memory, optionally mirrored to a JSON file.
///
/// Mutations are written to disk before they become visible, so a failed
/// write leaves the store unchanged.
pub struct LocalSafeStore {
    path: Option<PathBuf>,
    state: RwLock<SafeSnapshot>,
}

impl LocalSafeStore {
    /// Create a store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(SafeSnapshot::default()),
        }
    }

    /// Open a JSON backed store, starting empty if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let snapshot: SafeSnapshot = serde_json::from_str(&content)?;
            info!(
                "Loaded {} Safes and {} pending Safes from {}",
                snapshot.safes.len(),
                snapshot.pending_safes.len(),
                path.display()
            );
            snapshot
        } else {
            info!("No Safe store at {}, starting fresh", path.display());
            SafeSnapshot::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(snapshot),
        })
    }

    /// Write the snapshot next to the store file, then rename it into place
    fn persist(&self, snapshot: &SafeSnapshot) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_vec_pretty(snapshot)?;
        let temp = temp_path(path);
        let _ = std::fs::remove_file(&temp);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Owner key references live in this file
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = options.open(&temp).and_then(|mut file| {
            file.write_all(&content)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| std::fs::rename(&temp, path)) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!("Saved Safe store to {}", path.display());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait::async_trait]
impl SafeStore for LocalSafeStore {
    async fn query_safe(&self, address: Address) -> Result<Option<DeployedSafe>, StoreError> {
        let state = self.state.read().await;
        Ok(state.safes.iter().find(|s| s.address == address).cloned())
    }

    async fn query_pending_safe(&self, address: Address) -> Result<Option<PendingSafe>, StoreError> {
        let state = self.state.read().await;
        Ok(state.pending_safes.iter().find(|s| s.address == address).cloned())
    }

    async fn load_safes(&self) -> Result<Vec<DeployedSafe>, StoreError> {
        Ok(self.state.read().await.safes.clone())
    }

    async fn insert_safe(&self, safe: DeployedSafe) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.contains(safe.address) {
            return Err(StoreError::AlreadyExists(safe.address));
        }
        let mut next = state.clone();
        next.safes.push(safe);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    async fn insert_pending_safe(&self, safe: PendingSafe) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.contains(safe.address) {
            return Err(StoreError::AlreadyExists(safe.address));
        }
        let mut next = state.clone();
        next.pending_safes.push(safe);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    async fn pending_safe_to_deployed_safe(&self, address: Address) -> Result<DeployedSafe, StoreError> {
        let mut state = self.state.write().await;
        let index = state
            .pending_safes
            .iter()
            .position(|s| s.address == address)
            .ok_or(StoreError::PendingSafeNotFound(address))?;

        let mut next = state.clone();
        let deployed = next.pending_safes.remove(index).into_deployed();
        next.safes.push(deployed.clone());
        self.persist(&next)?;
        *state = next;

        info!("🏗️ Pending Safe {} is now deployed", address);
        Ok(deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn safe_address() -> Address {
        "0x45dCeb24119296fB57D06d83c1759cC191c3c96E".parse().unwrap()
    }

    #[tokio::test]
    async fn test_convert_pending_safe() {
        let store = LocalSafeStore::in_memory();
        store
            .insert_pending_safe(PendingSafe::new(safe_address(), Address::ZERO, U256::from(5)))
            .await
            .unwrap();

        assert!(store.query_safe(safe_address()).await.unwrap().is_none());

        let deployed = store.pending_safe_to_deployed_safe(safe_address()).await.unwrap();
        assert_eq!(deployed.address, safe_address());
        assert!(store.query_pending_safe(safe_address()).await.unwrap().is_none());
        assert_eq!(store.query_safe(safe_address()).await.unwrap(), Some(deployed));
    }

    #[tokio::test]
    async fn test_convert_unknown_pending_safe_fails() {
        let store = LocalSafeStore::in_memory();
        let result = store.pending_safe_to_deployed_safe(safe_address()).await;
        assert_eq!(result, Err(StoreError::PendingSafeNotFound(safe_address())));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = LocalSafeStore::in_memory();
        store.insert_safe(DeployedSafe::new(safe_address())).await.unwrap();
        let result = store
            .insert_pending_safe(PendingSafe::new(safe_address(), Address::ZERO, U256::ZERO))
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safes.json");

        {
            let store = LocalSafeStore::open(&path).unwrap();
            store
                .insert_pending_safe(PendingSafe::new(safe_address(), Address::ZERO, U256::from(7)))
                .await
                .unwrap();
        }

        let store = LocalSafeStore::open(&path).unwrap();
        let pending = store.query_pending_safe(safe_address()).await.unwrap().unwrap();
        assert_eq!(pending.payment_amount, U256::from(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_file_is_private_and_replaced_atomically() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safes.json");
        let store = LocalSafeStore::open(&path).unwrap();

        store.insert_safe(DeployedSafe::new(safe_address())).await.unwrap();
        store
            .insert_pending_safe(PendingSafe::new(Address::repeat_byte(0x11), Address::ZERO, U256::ZERO))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("safes.json")]);

        let reopened = LocalSafeStore::open(&path).unwrap();
        assert_eq!(reopened.load_safes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("safes.json");
        let store = LocalSafeStore::open(&path).unwrap();

        let result = store.insert_safe(DeployedSafe::new(safe_address())).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.load_safes().await.unwrap().is_empty());
    }
}
