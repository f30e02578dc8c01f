//! Inbound push message router
//!
//! Every push either becomes a local notification, a transaction response
//! for an observer, or nothing. Errors never reach the push transport.

use alloy_primitives::Address;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::push::notification::{hash_code, LocalNotification, NotificationIntent, NotificationSink};
use crate::push::registry::{ResponseRegistry, ResponseSubscription};
use crate::push::{PushMessage, TransactionResponse};
use crate::wallet::{SafeStore, Signature};

pub const SIGN_TRANSACTION_REQUEST_TITLE: &str = "Sign transaction request";
pub const SAFE_CREATED_TITLE: &str = "Safe created";
pub const SAFE_CREATED_MESSAGE: &str = "Your new Safe is ready";

/// Dispatches decoded push messages
pub struct PushRouter {
    store: Arc<dyn SafeStore>,
    notifications: Arc<dyn NotificationSink>,
    registry: Arc<ResponseRegistry>,
}

impl PushRouter {
    pub fn new(store: Arc<dyn SafeStore>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifications,
            registry: Arc::new(ResponseRegistry::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn SafeStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ResponseRegistry> {
        self.registry.clone()
    }

    /// Observe confirmations and rejections for a transaction hash
    pub fn observe(&self, hash: &str) -> ResponseSubscription {
        self.registry.observe(hash)
    }

    /// Handle one push message
    pub async fn handle_push_message(&self, message: PushMessage) {
        debug!("📨 Push message: {}", message.kind());
        match message {
            PushMessage::SendTransaction { hash, safe, to, .. } => {
                self.handle_send_transaction(hash, &safe, &to).await
            }
            PushMessage::ConfirmTransaction { hash, r, s, v } => {
                self.handle_response(&hash, &r, &s, &v, TransactionResponse::Confirmed)
            }
            PushMessage::RejectTransaction { hash, r, s, v } => {
                self.handle_response(&hash, &r, &s, &v, TransactionResponse::Rejected)
            }
            PushMessage::SafeCreation { safe } => self.handle_safe_creation(&safe).await,
        }
    }

    async fn handle_send_transaction(&self, hash: String, safe: &str, to: &str) {
        let Some(safe) = parse_address(safe) else {
            return;
        };

        match self.store.query_safe(safe).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("Ignoring transaction request for unknown Safe {}", safe);
                return;
            }
            Err(e) => {
                warn!("Could not look up Safe {}: {}", safe, e);
                return;
            }
        }

        let recipient = parse_address(to)
            .map(|a| a.to_checksum(None))
            .unwrap_or_else(|| to.to_string());

        self.notifications.show(LocalNotification {
            id: hash_code(&hash),
            title: SIGN_TRANSACTION_REQUEST_TITLE.to_string(),
            body: format!(
                "Your browser extension requests a signature for a transaction from {} to {}",
                safe.to_checksum(None),
                recipient
            ),
            intent: NotificationIntent::ReviewTransaction { safe, hash },
            channel_id: None,
        });
    }

    fn handle_response(
        &self,
        hash: &str,
        r: &str,
        s: &str,
        v: &str,
        wrap: fn(Signature) -> TransactionResponse,
    ) {
        let signature = match Signature::from_decimal(r, s, v) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Dropping response for {} with bad signature: {}", hash, e);
                return;
            }
        };

        if self.registry.publish(hash, wrap(signature)) {
            info!("✅ Delivered transaction response for {}", hash);
        } else {
            debug!("No observer for transaction {}", hash);
        }
    }

    async fn handle_safe_creation(&self, safe: &str) {
        let Some(address) = parse_address(safe) else {
            return;
        };

        match self.store.query_pending_safe(address).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("Ignoring creation of unknown pending Safe {}", address);
                return;
            }
            Err(e) => {
                warn!("Could not look up pending Safe {}: {}", address, e);
                return;
            }
        }

        // Retried on the next creation push or resync
        if let Err(e) = self.store.pending_safe_to_deployed_safe(address).await {
            warn!("Could not mark Safe {} as deployed: {}", address, e);
            return;
        }

        // Slot id is the hash code of the lowercased checksummed address
        let checksummed = address.to_checksum(None);
        self.notifications.show(LocalNotification {
            id: hash_code(&checksummed.to_lowercase()),
            title: SAFE_CREATED_TITLE.to_string(),
            body: format!("{}, {}", SAFE_CREATED_MESSAGE, checksummed),
            intent: NotificationIntent::ViewSafe { safe: address },
            channel_id: None,
        });
    }
}

fn parse_address(value: &str) -> Option<Address> {
    match value.parse::<Address>() {
        Ok(address) => Some(address),
        Err(e) => {
            warn!("Ignoring push with invalid address {}: {}", value, e);
            None
        }
    }
}
