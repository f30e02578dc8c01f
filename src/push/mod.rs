//! Push messaging
//! Inbound push routing, transaction response registry and the push service client

pub mod api;
pub mod notification;
pub mod registry;
pub mod router;
pub mod service;

pub use api::{
    ApiError, HttpPushServiceApi, PushServiceApi, PushServiceAuth, PushServiceNotification,
    PushServicePairing, PushServiceTemporaryAuthorization, ServiceSignature,
};
pub use notification::{
    hash_code, LocalNotification, LoggingNotificationSink, NotificationIntent, NotificationSink,
};
pub use registry::{ResponseRegistry, ResponseSubscription};
pub use router::PushRouter;
pub use service::{
    rejection_hash, ClientInfo, FilePreferences, GasParams, MemoryPreferences, Operation,
    Preferences, PushService, PushTokenProvider, SafeTransaction, ServiceMessage, StaticPushToken,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wallet::{Signature, StoreError, WalletError};

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push service API error: {0}")]
    Api(#[from] ApiError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Push token unavailable: {0}")]
    TokenUnavailable(String),
}

/// Message delivered by the push transport.
///
/// Numeric fields arrive as strings and are only parsed where the router
/// needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PushMessage {
    SendTransaction {
        hash: String,
        safe: String,
        to: String,
        value: String,
        data: String,
        operation: String,
        tx_gas: String,
        data_gas: String,
        operational_gas: String,
        gas_price: String,
        gas_token: String,
        nonce: String,
        r: String,
        s: String,
        v: String,
    },
    ConfirmTransaction {
        hash: String,
        r: String,
        s: String,
        v: String,
    },
    RejectTransaction {
        hash: String,
        r: String,
        s: String,
        v: String,
    },
    SafeCreation {
        safe: String,
    },
}

impl PushMessage {
    /// Message type name, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::SendTransaction { .. } => "sendTransaction",
            PushMessage::ConfirmTransaction { .. } => "confirmTransaction",
            PushMessage::RejectTransaction { .. } => "rejectTransaction",
            PushMessage::SafeCreation { .. } => "safeCreation",
        }
    }
}

/// Answer of a paired device to a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResponse {
    Confirmed(Signature),
    Rejected(Signature),
}

impl TransactionResponse {
    pub fn signature(&self) -> &Signature {
        match self {
            TransactionResponse::Confirmed(signature) | TransactionResponse::Rejected(signature) => signature,
        }
    }
}
