//! Identifier newtypes shared by the registry, the actors and the processor.
//!
//! Protocol ids and addresses are `0x`-prefixed hex strings. They are always
//! lowercased on construction so that ids coming from event logs and ids
//! coming from contract reads compare equal.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

fn normalize_hex(raw: &str) -> Result<String, CommonError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| CommonError::InvalidHexId(raw.to_string()))?;

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CommonError::InvalidHexId(raw.to_string()));
    }

    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: &str) -> Result<Self, CommonError> {
                normalize_hex(raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CommonError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CommonError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

hex_id!(
    /// Content-derived id of a request.
    RequestId
);
hex_id!(
    /// Content-derived id of a response.
    ResponseId
);
hex_id!(
    /// Content-derived id of a dispute.
    DisputeId
);
hex_id!(
    /// An EVM account or contract address.
    Address
);

fn caip2_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-a-z0-9]{3,8}:[-_a-zA-Z0-9]{1,32}$").expect("static CAIP-2 regex")
    })
}

/// A CAIP-2 chain id, e.g. `eip155:42161`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn new(raw: &str) -> Result<Self, CommonError> {
        let trimmed = raw.trim();
        if !caip2_regex().is_match(trimmed) {
            return Err(CommonError::InvalidChainId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map(|(ns, _)| ns).unwrap_or_default()
    }

    pub fn reference(&self) -> &str {
        self.0.split_once(':').map(|(_, r)| r).unwrap_or_default()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChainId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChainId {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_ids_are_lowercased() {
        let id = RequestId::new("0xABCdef01").unwrap();
        assert_eq!(id.as_str(), "0xabcdef01");
        assert_eq!(id, RequestId::new("0xabcdef01").unwrap());
    }

    #[test]
    fn hex_ids_reject_missing_prefix_and_non_hex() {
        assert!(RequestId::new("abcdef").is_err());
        assert!(RequestId::new("0x").is_err());
        assert!(Address::new("0xzz").is_err());
    }

    #[test]
    fn hex_ids_deserialize_normalized() {
        let id: DisputeId = serde_json::from_str("\"0xFF\"").unwrap();
        assert_eq!(id.as_str(), "0xff");
    }

    #[test]
    fn chain_ids_follow_caip2() {
        let chain = ChainId::new("eip155:42161").unwrap();
        assert_eq!(chain.namespace(), "eip155");
        assert_eq!(chain.reference(), "42161");

        assert!(ChainId::new("eip155").is_err());
        assert!(ChainId::new("EIP155:1").is_err());
        assert!(ChainId::new("ab:1").is_err());
    }
}
