//! Gnosis Safe records
//! A Safe starts as a pending deployment and becomes a deployed Safe once
//! its creation is observed on chain

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Safe whose deployment was requested but not yet observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSafe {
    pub address: Address,
    /// Creation transaction hash, if already known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// Token the deployment is paid with (zero address for ether)
    pub payment_token: Address,
    pub payment_amount: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingSafe {
    pub fn new(address: Address, payment_token: Address, payment_amount: U256) -> Self {
        Self {
            address,
            transaction_hash: None,
            payment_token,
            payment_amount,
            owner: None,
            owner_key_ref: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the owner that will control the Safe once deployed
    pub fn with_owner(mut self, owner: Address, owner_key_ref: Option<String>) -> Self {
        self.owner = Some(owner);
        self.owner_key_ref = owner_key_ref;
        self
    }

    /// Turn the pending record into a deployed Safe
    pub fn into_deployed(self) -> DeployedSafe {
        DeployedSafe {
            address: self.address,
            owner: self.owner,
            owner_key_ref: self.owner_key_ref,
            deployed_at: Utc::now(),
        }
    }
}

/// Safe known to exist on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedSafe {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    /// Reference to the encrypted owner key, resolved through a `KeyVault`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key_ref: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

impl DeployedSafe {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            owner: None,
            owner_key_ref: None,
            deployed_at: Utc::now(),
        }
    }

    /// Check if the Safe has an owner key available locally
    pub fn has_local_owner(&self) -> bool {
        self.owner.map(|o| o != Address::ZERO).unwrap_or(false) && self.owner_key_ref.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFE: &str = "0x45dCeb24119296fB57D06d83c1759cC191c3c96E";
    const OWNER: &str = "0xB18Ec66081b444037F7C1B5ffEE228693B854E7A";

    #[test]
    fn test_pending_into_deployed_keeps_owner() {
        let safe: Address = SAFE.parse().unwrap();
        let owner: Address = OWNER.parse().unwrap();
        let pending = PendingSafe::new(safe, Address::ZERO, U256::from(1000))
            .with_owner(owner, Some("deadbeef".to_string()));

        let deployed = pending.into_deployed();
        assert_eq!(deployed.address, safe);
        assert_eq!(deployed.owner, Some(owner));
        assert!(deployed.has_local_owner());
    }

    #[test]
    fn test_deployed_without_owner() {
        let deployed = DeployedSafe::new(SAFE.parse().unwrap());
        assert!(!deployed.has_local_owner());
    }
}
