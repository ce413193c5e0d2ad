// Trait abstractions for the agent's external collaborators.
//
// ProtocolProvider: reads chain state and submits protocol transactions.
// BlockNumberService: resolves the block of a chain at a given timestamp.
//
// Both are implemented outside this crate. Tests use MockProtocol and
// FixedBlockNumberService from `testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ebo_common::{
    Address, ChainId, Dispute, EboEvent, Epoch, Request, RequestId, Response, ResponseBody,
    ResponseId,
};

/// Failure reported by the protocol collaborator.
///
/// Contract reverts carry the custom error name the contract raised; the
/// error handler picks its recovery strategy by that name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("contract reverted with {name}: {message}")]
    Revert { name: String, message: String },

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl ProtocolError {
    pub fn revert(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Revert {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Name used for strategy lookup.
    pub fn name(&self) -> &str {
        match self {
            Self::Revert { name, .. } => name,
            Self::Rpc(_) => "RpcError",
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProtocolProvider: Send + Sync {
    // --- Reads ---

    async fn get_current_epoch(&self) -> Result<Epoch, ProtocolError>;

    /// Epoch by number, used to compute the correct answer of past-epoch requests.
    async fn get_epoch(&self, number: u64) -> Result<Epoch, ProtocolError>;

    async fn get_last_finalized_block(&self) -> Result<u64, ProtocolError>;

    /// Events in `[from_block, to_block]`, both inclusive.
    async fn get_events(&self, from_block: u64, to_block: u64)
        -> Result<Vec<EboEvent>, ProtocolError>;

    async fn get_available_chains(&self) -> Result<Vec<ChainId>, ProtocolError>;

    async fn get_accounting_approved_modules(&self) -> Result<Vec<Address>, ProtocolError>;

    async fn get_accounting_module_address(&self) -> Result<Address, ProtocolError>;

    // --- Writes ---

    async fn create_request(&self, epoch: u64, chain_id: &ChainId) -> Result<(), ProtocolError>;

    async fn propose_response(
        &self,
        request: &Request,
        response: &ResponseBody,
    ) -> Result<(), ProtocolError>;

    async fn dispute_response(
        &self,
        request_id: &RequestId,
        response_id: &ResponseId,
        proposer: &Address,
    ) -> Result<(), ProtocolError>;

    async fn pledge_for_dispute(
        &self,
        request: &Request,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError>;

    async fn pledge_against_dispute(
        &self,
        request: &Request,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError>;

    async fn settle_dispute(
        &self,
        request: &Request,
        response: &Response,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError>;

    async fn escalate_dispute(
        &self,
        request: &Request,
        response: &Response,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError>;

    async fn finalize(&self, request: &Request, response: &Response) -> Result<(), ProtocolError>;
}

// ---------------------------------------------------------------------------
// BlockNumberService
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BlockNumberService: Send + Sync {
    /// Block number of `chain_id` at `timestamp` (the last block at or before it).
    async fn get_epoch_block_number(
        &self,
        chain_id: &ChainId,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<u64>;
}
