//! Safe Companion - mobile wallet companion core in Rust
//!
//! Features:
//! - Push message routing to notifications and transaction response observers
//! - Push service authentication, extension pairing and signed fan-out
//! - dApp bridge session lifecycle with a versioned session list
//! - Local Safe / pending Safe persistence

pub mod bridge;
pub mod config;
pub mod push;
pub mod wallet;

// Re-export commonly used types
pub use bridge::{
    BridgeError, BridgeRepository, Frame, LocalBridgeRepository, PairingUri, SessionEvent,
    SessionManager, SessionMeta,
};
pub use config::Config;
pub use push::{
    HttpPushServiceApi, PushError, PushMessage, PushRouter, PushService, ResponseRegistry,
    TransactionResponse,
};
pub use wallet::{
    Accounts, DeployedSafe, LocalSafeStore, PendingSafe, PrivateKeyWallet, SafeStore, Signature,
    WalletError,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Wallet error: {0}")]
    Wallet(#[from] wallet::WalletError),
    #[error("Store error: {0}")]
    Store(#[from] wallet::StoreError),
    #[error("Push error: {0}")]
    Push(#[from] push::PushError),
    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge::BridgeError),
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
