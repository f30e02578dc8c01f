//! Push service client
//!
//! Everything sent to the push service is signed by the device account over
//! `keccak256("GNO" + payload)`.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::push::api::{
    PushServiceApi, PushServiceAuth, PushServiceNotification, PushServicePairing,
    PushServiceTemporaryAuthorization, ServiceSignature,
};
use crate::push::registry::ResponseSubscription;
use crate::push::router::PushRouter;
use crate::push::{PushError, PushMessage};
use crate::wallet::{Accounts, KeyVault, PrivateKeyWallet, Signature};

pub const SIGNATURE_PREFIX: &str = "GNO";
pub const LAST_SYNC_PUSH_INFO_KEY: &str = "prefs.string.accounttoken";

/// Message relayed by the push service to paired devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServiceMessage {
    SafeCreation {
        safe: String,
    },
    SendTransactionHash {
        hash: String,
        tx_hash: String,
    },
    RejectTransaction {
        hash: String,
        r: String,
        s: String,
        v: String,
    },
    RequestConfirmation {
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
        refund_receiver: String,
        nonce: String,
    },
}

/// Safe transaction operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Call,
    DelegateCall,
}

impl Operation {
    pub fn id(&self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

/// Transaction executed by a Safe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub nonce: U256,
}

impl SafeTransaction {
    pub fn call(to: Address) -> Self {
        Self {
            to,
            value: U256::ZERO,
            data: Bytes::new(),
            operation: Operation::Call,
            nonce: U256::ZERO,
        }
    }
}

/// Gas parameters of a relayed Safe transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasParams {
    pub tx_gas: U256,
    pub data_gas: U256,
    pub operational_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
}

/// Application identity reported to the push service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub bundle: String,
    pub version_name: String,
    pub build_number: u32,
    pub client: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            bundle: "io.safe.companion".to_string(),
            version_name: crate::VERSION.to_string(),
            build_number: 1,
            client: "android".to_string(),
        }
    }
}

impl ClientInfo {
    /// `"GNO" + token + build number + version name + client + bundle`
    pub fn bundle_push_info(&self, push_token: &str) -> String {
        format!(
            "{}{}{}{}{}{}",
            SIGNATURE_PREFIX, push_token, self.build_number, self.version_name, self.client, self.bundle
        )
    }
}

/// Source of the device push token
#[async_trait::async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn push_token(&self) -> Result<String, PushError>;
}

/// Push token fixed by configuration
#[derive(Debug, Clone)]
pub struct StaticPushToken(pub String);

#[async_trait::async_trait]
impl PushTokenProvider for StaticPushToken {
    async fn push_token(&self) -> Result<String, PushError> {
        if self.0.is_empty() {
            return Err(PushError::TokenUnavailable("empty push token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Small string key/value store
pub trait Preferences: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn put_string(&self, key: &str, value: &str);
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn put_string(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

/// Preferences mirrored to a JSON file
pub struct FilePreferences {
    path: PathBuf,
    values: MemoryPreferences,
}

impl FilePreferences {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = MemoryPreferences::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let stored: HashMap<String, String> = serde_json::from_str(&content)?;
            for (key, value) in stored {
                values.put_string(&key, &value);
            }
        }
        Ok(Self { path, values })
    }
}

impl Preferences for FilePreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get_string(key)
    }

    fn put_string(&self, key: &str, value: &str) {
        self.values.put_string(key, value);
        let snapshot = self
            .values
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let written = serde_json::to_string_pretty(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|content| std::fs::write(&self.path, content).map_err(anyhow::Error::from));
        if let Err(e) = written {
            warn!("Failed to save preferences to {}: {}", self.path.display(), e);
        }
    }
}

/// Client for the push service plus the inbound push router
pub struct PushService {
    api: Arc<dyn PushServiceApi>,
    accounts: Arc<dyn Accounts>,
    router: Arc<PushRouter>,
    client: ClientInfo,
    tokens: Option<Arc<dyn PushTokenProvider>>,
    key_vault: Option<Arc<dyn KeyVault>>,
    preferences: Arc<dyn Preferences>,
}

impl PushService {
    pub fn new(
        api: Arc<dyn PushServiceApi>,
        accounts: Arc<dyn Accounts>,
        router: Arc<PushRouter>,
        client: ClientInfo,
    ) -> Self {
        Self {
            api,
            accounts,
            router,
            client,
            tokens: None,
            key_vault: None,
            preferences: Arc::new(MemoryPreferences::new()),
        }
    }

    /// Set the push token source used by `sync_authentication`
    pub fn with_token_provider(mut self, tokens: Arc<dyn PushTokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Set the vault used to sign with local Safe owner keys
    pub fn with_key_vault(mut self, key_vault: Arc<dyn KeyVault>) -> Self {
        self.key_vault = Some(key_vault);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn Preferences>) -> Self {
        self.preferences = preferences;
        self
    }

    /// Register the push token with the push service.
    ///
    /// Skipped when the token and client info did not change since the last
    /// sync, unless `forced`. A forced sync also signs with every local Safe
    /// owner key. Returns whether the service was contacted.
    pub async fn sync_authentication(&self, forced: bool) -> Result<bool, PushError> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or_else(|| PushError::TokenUnavailable("no push token provider".to_string()))?;
        let token = tokens.push_token().await?;

        let bundle = self.client.bundle_push_info(&token);
        if !forced && self.preferences.get_string(LAST_SYNC_PUSH_INFO_KEY).as_deref() == Some(bundle.as_str()) {
            debug!("Push token unchanged, skipping authentication");
            return Ok(false);
        }

        let hash = keccak256(bundle.as_bytes());
        let mut signatures = Vec::new();
        if forced {
            signatures.extend(self.owner_signatures(hash).await?);
        }
        let account_signature = self.accounts.sign(hash).await?;
        signatures.push(ServiceSignature::from_signature(&account_signature));

        self.api
            .auth(&PushServiceAuth {
                push_token: token,
                build_number: self.client.build_number,
                version_name: self.client.version_name.clone(),
                client: self.client.client.clone(),
                bundle: self.client.bundle.clone(),
                signatures,
            })
            .await?;

        self.preferences.put_string(LAST_SYNC_PUSH_INFO_KEY, &bundle);
        info!("🔑 Push authentication synced");
        Ok(true)
    }

    async fn owner_signatures(&self, hash: B256) -> Result<Vec<ServiceSignature>, PushError> {
        let Some(vault) = &self.key_vault else {
            return Ok(Vec::new());
        };

        let mut signatures = Vec::new();
        for safe in self.router.store().load_safes().await? {
            let Some(key_ref) = safe.owner_key_ref.as_deref() else {
                continue;
            };
            // A broken key must not block authentication of the others
            let signed = vault
                .decrypt(key_ref)
                .and_then(|key| PrivateKeyWallet::from_bytes(&key))
                .and_then(|wallet| wallet.sign_hash(hash));
            match signed {
                Ok(signature) => signatures.push(ServiceSignature::from_signature(&signature)),
                Err(e) => warn!("Skipping owner key of Safe {}: {}", safe.address, e),
            }
        }
        Ok(signatures)
    }

    /// Pair with a browser extension that showed `authorization`.
    ///
    /// Returns the extension address.
    pub async fn pair(&self, authorization: PushServiceTemporaryAuthorization) -> Result<Address, PushError> {
        let expiration_hash = prefixed_hash(&authorization.expiration_date);
        let extension_signature = authorization.signature.to_signature()?;
        let extension = self.accounts.recover(expiration_hash, &extension_signature).await?;

        let signature = self
            .accounts
            .sign(prefixed_hash(&extension.to_checksum(None)))
            .await?;

        self.api
            .pair(&PushServicePairing {
                signature: ServiceSignature::from_signature(&signature),
                temporary_authorization: authorization,
            })
            .await?;

        info!("🤝 Paired with extension {}", extension);
        Ok(extension)
    }

    /// Tell paired devices that a Safe was created
    pub async fn propagate_safe_creation(&self, safe: Address, targets: &[Address]) -> Result<(), PushError> {
        self.send_message(
            &ServiceMessage::SafeCreation {
                safe: format_lowercase(safe),
            },
            targets,
        )
        .await
    }

    /// Tell paired devices the chain hash of a submitted transaction
    pub async fn propagate_submitted_transaction(
        &self,
        hash: &str,
        chain_hash: &str,
        targets: &[Address],
    ) -> Result<(), PushError> {
        self.send_message(
            &ServiceMessage::SendTransactionHash {
                hash: hash.to_string(),
                tx_hash: chain_hash.to_string(),
            },
            targets,
        )
        .await
    }

    /// Tell paired devices that a transaction was rejected
    pub async fn propagate_transaction_rejected(
        &self,
        hash: &str,
        signature: &Signature,
        targets: &[Address],
    ) -> Result<(), PushError> {
        self.send_message(
            &ServiceMessage::RejectTransaction {
                hash: hash.to_string(),
                r: signature.r.to_string(),
                s: signature.s.to_string(),
                v: signature.v.to_string(),
            },
            targets,
        )
        .await
    }

    /// Ask paired devices to confirm a Safe transaction
    pub async fn request_confirmations(
        &self,
        hash: &str,
        safe: Address,
        transaction: &SafeTransaction,
        gas: &GasParams,
        targets: &[Address],
    ) -> Result<(), PushError> {
        let data = if transaction.data.is_empty() {
            String::new()
        } else {
            transaction.data.to_string()
        };

        self.send_message(
            &ServiceMessage::RequestConfirmation {
                hash: hash.to_string(),
                safe: format_lowercase(safe),
                to: transaction.to.to_checksum(None),
                value: transaction.value.to_string(),
                data,
                operation: transaction.operation.id().to_string(),
                tx_gas: gas.tx_gas.to_string(),
                data_gas: gas.data_gas.to_string(),
                operational_gas: gas.operational_gas.to_string(),
                gas_price: gas.gas_price.to_string(),
                gas_token: gas.gas_token.to_checksum(None),
                refund_receiver: "0".to_string(),
                nonce: transaction.nonce.to_string(),
            },
            targets,
        )
        .await
    }

    async fn send_message(&self, message: &ServiceMessage, targets: &[Address]) -> Result<(), PushError> {
        let json = serde_json::to_string(message)?;
        let signature = self.accounts.sign(prefixed_hash(&json)).await?;

        self.api
            .notify(&PushServiceNotification {
                devices: targets.iter().map(|t| format_lowercase(*t)).collect(),
                message: json,
                signature: ServiceSignature::from_signature(&signature),
            })
            .await?;

        debug!("📤 Sent service message to {} devices", targets.len());
        Ok(())
    }

    /// Hash a paired device signs to reject `transaction_hash`
    pub fn calculate_rejection_hash(&self, transaction_hash: &[u8]) -> B256 {
        rejection_hash(transaction_hash)
    }

    /// Observe confirmations and rejections for a transaction hash
    pub fn observe(&self, hash: &str) -> ResponseSubscription {
        self.router.observe(hash)
    }

    /// Route an inbound push message
    pub async fn handle_push_message(&self, message: PushMessage) {
        self.router.handle_push_message(message).await
    }
}

fn prefixed_hash(payload: &str) -> B256 {
    keccak256(format!("{}{}", SIGNATURE_PREFIX, payload).as_bytes())
}

fn format_lowercase(address: Address) -> String {
    address.to_checksum(None).to_lowercase()
}

/// `keccak256("GNO" + "0x" + hex(hash) + "rejectTransaction")`
pub fn rejection_hash(transaction_hash: &[u8]) -> B256 {
    prefixed_hash(&format!("0x{}rejectTransaction", hex::encode(transaction_hash)))
}
