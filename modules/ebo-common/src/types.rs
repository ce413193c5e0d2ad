use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CommonError;
use crate::ids::{Address, ChainId, DisputeId, RequestId, ResponseId};

// --- Provenance ---

/// Where an entity was first observed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub block_number: u64,
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
}

// --- Epoch ---

/// A protocol epoch. Fetched fresh every tick, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub number: u64,
    pub first_block_number: u64,
    pub start_timestamp: DateTime<Utc>,
}

// --- Request ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Active,
    Finalized,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Decoded module parameters of a request. All windows are block counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestParams {
    /// Proposal window, counted from the request creation block.
    pub response_deadline: u64,
    /// Dispute window, counted from the response creation block.
    pub dispute_window: u64,
    /// Bond escalation deadline, counted from the dispute creation block.
    pub bond_escalation_deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub chain_id: ChainId,
    pub epoch: u64,
    pub created_at: Provenance,
    pub params: RequestParams,
    /// Protocol-encoded request payload, passed back verbatim on writes.
    pub prophet_data: Vec<u8>,
    pub status: RequestStatus,
}

impl Request {
    pub fn actor_request(&self) -> ActorRequest {
        ActorRequest {
            id: self.id.clone(),
            epoch: self.epoch,
            chain_id: self.chain_id.clone(),
        }
    }

    /// Last block at which a response may be proposed.
    pub fn proposal_deadline(&self) -> u64 {
        self.created_at
            .block_number
            .saturating_add(self.params.response_deadline)
    }
}

// --- Response ---

/// The decoded answer of a response: the block number of the request's
/// chain at the start of the request's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseBody {
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub proposer: Address,
    pub created_at: Provenance,
    pub body: ResponseBody,
    pub prophet_data: Vec<u8>,
    pub disputed: bool,
}

impl Response {
    /// Last block at which this response may be disputed.
    pub fn dispute_deadline(&self, params: &RequestParams) -> u64 {
        self.created_at
            .block_number
            .saturating_add(params.dispute_window)
    }
}

// --- Dispute ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeStatus {
    None,
    Active,
    Escalated,
    Won,
    Lost,
    NoResolution,
}

impl DisputeStatus {
    /// Decode the on-chain enum index.
    pub fn from_code(code: u8) -> Result<Self, CommonError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Active),
            2 => Ok(Self::Escalated),
            3 => Ok(Self::Won),
            4 => Ok(Self::Lost),
            5 => Ok(Self::NoResolution),
            other => Err(CommonError::UnknownDisputeStatus(other)),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Active => 1,
            Self::Escalated => 2,
            Self::Won => 3,
            Self::Lost => 4,
            Self::NoResolution => 5,
        }
    }

    /// Still waiting on a pledge, a settlement or a resolution.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Escalated)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Active => write!(f, "active"),
            Self::Escalated => write!(f, "escalated"),
            Self::Won => write!(f, "won"),
            Self::Lost => write!(f, "lost"),
            Self::NoResolution => write!(f, "no_resolution"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub status: DisputeStatus,
    pub created_at: Provenance,
    pub request_id: RequestId,
    pub response_id: ResponseId,
    pub disputer: Address,
    pub proposer: Address,
}

impl Dispute {
    /// Last block at which pledges are accepted; settlement is possible after it.
    pub fn escalation_deadline(&self, params: &RequestParams) -> u64 {
        self.created_at
            .block_number
            .saturating_add(params.bond_escalation_deadline)
    }
}

// --- ActorRequest ---

/// The minimal descriptor an actor is created from and correlated by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRequest {
    pub id: RequestId,
    pub epoch: u64,
    pub chain_id: ChainId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispute_status_codes_round_trip() {
        for code in 0..=5u8 {
            assert_eq!(DisputeStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(
            DisputeStatus::from_code(9),
            Err(CommonError::UnknownDisputeStatus(9))
        );
    }

    #[test]
    fn only_active_and_escalated_are_open() {
        assert!(DisputeStatus::Active.is_open());
        assert!(DisputeStatus::Escalated.is_open());
        assert!(!DisputeStatus::Won.is_open());
        assert!(!DisputeStatus::Lost.is_open());
        assert!(!DisputeStatus::NoResolution.is_open());
        assert!(!DisputeStatus::None.is_open());
    }
}
