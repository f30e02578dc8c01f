//! Push service HTTP API
//! Device authentication, extension pairing and notification fan-out

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::wallet::{Signature, WalletError};
use alloy_primitives::U256;

pub const DEFAULT_PUSH_SERVICE_URL: &str = "https://safe-notification.gnosis.io";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
}

/// Signature as the push service expects it: decimal `r` and `s`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

impl ServiceSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        Self {
            r: signature.r.to_string(),
            s: signature.s.to_string(),
            v: signature.v,
        }
    }

    pub fn to_signature(&self) -> Result<Signature, WalletError> {
        let r = U256::from_str_radix(&self.r, 10)
            .map_err(|e| WalletError::InvalidSignature(format!("r: {}", e)))?;
        let s = U256::from_str_radix(&self.s, 10)
            .map_err(|e| WalletError::InvalidSignature(format!("s: {}", e)))?;
        Ok(Signature::new(r, s, self.v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushServiceAuth {
    pub push_token: String,
    pub build_number: u32,
    pub version_name: String,
    pub client: String,
    pub bundle: String,
    pub signatures: Vec<ServiceSignature>,
}

/// Short lived authorization shown by a browser extension as a QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushServiceTemporaryAuthorization {
    pub signature: ServiceSignature,
    pub expiration_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushServicePairing {
    pub signature: ServiceSignature,
    pub temporary_authorization: PushServiceTemporaryAuthorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushServiceNotification {
    /// Lowercase device addresses
    pub devices: Vec<String>,
    /// Serialized service message
    pub message: String,
    pub signature: ServiceSignature,
}

/// Push service endpoints
#[async_trait]
pub trait PushServiceApi: Send + Sync {
    async fn auth(&self, body: &PushServiceAuth) -> Result<(), ApiError>;

    async fn pair(&self, body: &PushServicePairing) -> Result<(), ApiError>;

    async fn notify(&self, body: &PushServiceNotification) -> Result<(), ApiError>;
}

/// Push service API client
pub struct HttpPushServiceApi {
    client: Client,
    base_url: String,
}

impl HttpPushServiceApi {
    /// Create new client with request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Push service error {} on {}: {}", status, path, error_text);
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                message: truncate(error_text),
            });
        }

        Ok(())
    }
}

fn truncate(message: String) -> String {
    if message.len() > 500 {
        let cut = (0..=500).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
        format!("{}... (truncated)", &message[..cut])
    } else {
        message
    }
}

#[async_trait]
impl PushServiceApi for HttpPushServiceApi {
    async fn auth(&self, body: &PushServiceAuth) -> Result<(), ApiError> {
        self.post("/api/v1/auth/", body).await
    }

    async fn pair(&self, body: &PushServicePairing) -> Result<(), ApiError> {
        self.post("/api/v1/pairing/", body).await
    }

    async fn notify(&self, body: &PushServiceNotification) -> Result<(), ApiError> {
        self.post("/api/v1/notifications/", body).await
    }
}
