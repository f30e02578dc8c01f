//! Wallet management module using Alloy
//! Device account signing, Safe records and the local Safe store

use alloy_primitives::{Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub mod safe;
pub mod store;

pub use safe::{DeployedSafe, PendingSafe};
pub use store::{LocalSafeStore, SafeStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error("Key decryption failed: {0}")]
    Decryption(String),
}

/// ECDSA signature split into its `r`, `s` and `v` components.
///
/// `v` keeps the legacy 27/28 encoding used by the push service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub r: U256,
    pub s: U256,
    pub v: u8,
}

impl Signature {
    pub fn new(r: U256, s: U256, v: u8) -> Self {
        Self { r, s, v }
    }

    /// Parse decimal `r`, `s` and `v` strings as they arrive in push payloads
    pub fn from_decimal(r: &str, s: &str, v: &str) -> Result<Self, WalletError> {
        let r = U256::from_str_radix(r.trim(), 10)
            .map_err(|e| WalletError::InvalidSignature(format!("r: {}", e)))?;
        let s = U256::from_str_radix(s.trim(), 10)
            .map_err(|e| WalletError::InvalidSignature(format!("s: {}", e)))?;
        let v = v
            .trim()
            .parse::<u8>()
            .map_err(|e| WalletError::InvalidSignature(format!("v: {}", e)))?;
        Ok(Self { r, s, v })
    }

    fn from_alloy(signature: &alloy_primitives::Signature) -> Self {
        let v = 27 + signature.v().y_parity() as u8;
        Self {
            r: signature.r(),
            s: signature.s(),
            v,
        }
    }

    fn to_alloy(self) -> Result<alloy_primitives::Signature, WalletError> {
        alloy_primitives::Signature::from_rs_and_parity(self.r, self.s, self.v as u64)
            .map_err(|e| WalletError::InvalidSignature(e.to_string()))
    }
}

/// Recover the signer address of a prehashed message
pub fn recover_address(hash: B256, signature: &Signature) -> Result<Address, WalletError> {
    signature
        .to_alloy()?
        .recover_address_from_prehash(&hash)
        .map_err(|e| WalletError::InvalidSignature(e.to_string()))
}

/// Device account operations used by the push service
#[async_trait::async_trait]
pub trait Accounts: Send + Sync {
    /// Address of the device account
    fn address(&self) -> Address;

    /// Sign a 32 byte hash
    async fn sign(&self, hash: B256) -> Result<Signature, WalletError>;

    /// Recover the address that produced `signature` over `hash`
    async fn recover(&self, hash: B256, signature: &Signature) -> Result<Address, WalletError> {
        recover_address(hash, signature)
    }
}

/// Private key wallet implementation using Alloy
pub struct PrivateKeyWallet {
    signer: PrivateKeySigner,
}

impl PrivateKeyWallet {
    /// Create wallet from private key hex string
    pub fn from_private_key(key: &str) -> Result<Self, WalletError> {
        let key = key.trim_start_matches("0x");
        let signer = PrivateKeySigner::from_str(key)
            .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signer })
    }

    /// Create wallet from raw private key bytes
    pub fn from_bytes(key: &[u8]) -> Result<Self, WalletError> {
        let signer = PrivateKeySigner::from_slice(key)
            .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signer })
    }

    /// Synchronous hash signing, used for Safe owner keys
    pub fn sign_hash(&self, hash: B256) -> Result<Signature, WalletError> {
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| WalletError::SigningError(e.to_string()))?;
        Ok(Signature::from_alloy(&signature))
    }
}

#[async_trait::async_trait]
impl Accounts for PrivateKeyWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign(&self, hash: B256) -> Result<Signature, WalletError> {
        self.sign_hash(hash)
    }
}

/// Decrypts the stored owner key of a Safe
pub trait KeyVault: Send + Sync {
    fn decrypt(&self, key_ref: &str) -> Result<Vec<u8>, WalletError>;
}

/// Vault for owner keys stored as plain hex, e.g. on a dedicated signing host
#[derive(Debug, Default, Clone)]
pub struct HexKeyVault;

impl KeyVault for HexKeyVault {
    fn decrypt(&self, key_ref: &str) -> Result<Vec<u8>, WalletError> {
        hex::decode(key_ref.trim_start_matches("0x"))
            .map_err(|e| WalletError::Decryption(e.to_string()))
    }
}
