//! Protocol events as the agent observes them in chain history.
//!
//! Every event belongs to exactly one request. Events are totally ordered by
//! `(block_number, log_index)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{Address, ChainId, DisputeId, RequestId, ResponseId};
use crate::types::{Provenance, RequestParams, ResponseBody};

/// Position of an event in chain history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EboEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    pub metadata: EventMetadata,
}

impl EboEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            block_number: self.block_number,
            log_index: self.log_index,
            timestamp: self.timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        self.metadata.name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMetadata {
    RequestCreated {
        chain_id: ChainId,
        epoch: u64,
        params: RequestParams,
        prophet_data: Vec<u8>,
    },
    ResponseProposed {
        response_id: ResponseId,
        proposer: Address,
        body: ResponseBody,
        prophet_data: Vec<u8>,
    },
    ResponseDisputed {
        dispute_id: DisputeId,
        response_id: ResponseId,
        disputer: Address,
        proposer: Address,
    },
    RequestFinalized {
        response_id: Option<ResponseId>,
        caller: Address,
    },
    /// `status` is the raw on-chain enum index.
    DisputeStatusUpdated { dispute_id: DisputeId, status: u8 },
    DisputeEscalated { dispute_id: DisputeId, caller: Address },
}

impl EventMetadata {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "RequestCreated",
            Self::ResponseProposed { .. } => "ResponseProposed",
            Self::ResponseDisputed { .. } => "ResponseDisputed",
            Self::RequestFinalized { .. } => "RequestFinalized",
            Self::DisputeStatusUpdated { .. } => "DisputeStatusUpdated",
            Self::DisputeEscalated { .. } => "DisputeEscalated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(block_number: u64, log_index: u64) -> EventKey {
        EventKey {
            block_number,
            log_index,
        }
    }

    #[test]
    fn event_keys_order_by_block_then_log_index() {
        assert!(key(1, 9) < key(2, 0));
        assert!(key(2, 0) < key(2, 1));
        assert_eq!(key(3, 3), key(3, 3));
    }

    #[test]
    fn metadata_serializes_with_snake_case_tag() {
        let metadata = EventMetadata::DisputeStatusUpdated {
            dispute_id: DisputeId::new("0x01").unwrap(),
            status: 3,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["type"], "dispute_status_updated");
        assert_eq!(metadata.name(), "DisputeStatusUpdated");
    }
}
