//! Pairing URI parsing
//! `wc:<topic>@<version>?bridge=<url>&key=<hex>`

use reqwest::Url;

use crate::bridge::BridgeError;

/// Parsed pairing URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    pub version: u32,
    pub bridge: Url,
    /// Symmetric session key
    pub key: [u8; 32],
}

impl PairingUri {
    pub fn parse(uri: &str) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidUri(format!("{}: {}", reason, uri));

        let parsed = Url::parse(uri.trim()).map_err(|e| invalid(&e.to_string()))?;
        if parsed.scheme() != "wc" {
            return Err(invalid("scheme must be wc"));
        }

        let (topic, version) = parsed
            .path()
            .split_once('@')
            .ok_or_else(|| invalid("missing version"))?;
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }
        let version = version
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| invalid("bad version"))?;

        let mut bridge = None;
        let mut key = None;
        for (name, value) in parsed.query_pairs() {
            match name.as_ref() {
                "bridge" => bridge = Some(value.into_owned()),
                "key" => key = Some(value.into_owned()),
                _ => {}
            }
        }

        let bridge = bridge.ok_or_else(|| invalid("missing bridge"))?;
        let bridge = Url::parse(&bridge).map_err(|e| invalid(&format!("bad bridge url ({})", e)))?;

        let key = key.ok_or_else(|| invalid("missing key"))?;
        let key: [u8; 32] = hex::decode(key.trim_start_matches("0x"))
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| invalid("key must be 32 bytes of hex"))?;

        Ok(Self {
            topic: topic.to_string(),
            version,
            bridge,
            key,
        })
    }
}
