// Test mocks for the agent.
//
// Three mocks matching the collaborator boundaries:
// - MockProtocol (ProtocolProvider): stateful chain view + recorded writes
// - FixedBlockNumberService (BlockNumberService): per-chain fixed answers
// - RecordingNotifier (NotifyBackend): keeps every notification
//
// Plus fixture builders for ids, entities and events.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ebo_common::{
    ActorRequest, Address, ChainId, Dispute, DisputeId, DisputeStatus, EboEvent, Epoch,
    EventMetadata, ProphetCodec, Provenance, Request, RequestId, RequestParams, RequestStatus,
    Response, ResponseBody, ResponseId,
};

use crate::actor::{ActorDeps, TerminateHook};
use crate::notify::{ErrorContext, NotifyBackend, Notifier};
use crate::processor::ProcessorConfig;
use crate::protocol::{BlockNumberService, ProtocolError, ProtocolProvider};
use crate::registry::{EboMemoryRegistry, EboRegistry};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Unix time of block 0 in fixtures.
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;
/// Seconds between fixture blocks.
pub const BLOCK_TIME_SECS: i64 = 12;
/// Epoch the mock protocol reports by default.
pub const CURRENT_EPOCH: u64 = 3;
/// First block of the default current epoch.
pub const EPOCH_FIRST_BLOCK: u64 = 100;

// ---------------------------------------------------------------------------
// MockProtocol
// ---------------------------------------------------------------------------

/// A write the agent sent to the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCall {
    CreateRequest { epoch: u64, chain_id: ChainId },
    ProposeResponse { request_id: RequestId, block: u64 },
    DisputeResponse { request_id: RequestId, response_id: ResponseId, proposer: Address },
    PledgeForDispute { request_id: RequestId, dispute_id: DisputeId },
    PledgeAgainstDispute { request_id: RequestId, dispute_id: DisputeId },
    SettleDispute { request_id: RequestId, dispute_id: DisputeId },
    EscalateDispute { request_id: RequestId, dispute_id: DisputeId },
    Finalize { request_id: RequestId, response_id: ResponseId },
}

impl ProtocolCall {
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateRequest { .. } => "create_request",
            Self::ProposeResponse { .. } => "propose_response",
            Self::DisputeResponse { .. } => "dispute_response",
            Self::PledgeForDispute { .. } => "pledge_for_dispute",
            Self::PledgeAgainstDispute { .. } => "pledge_against_dispute",
            Self::SettleDispute { .. } => "settle_dispute",
            Self::EscalateDispute { .. } => "escalate_dispute",
            Self::Finalize { .. } => "finalize",
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::CreateRequest { .. } => None,
            Self::ProposeResponse { request_id, .. }
            | Self::DisputeResponse { request_id, .. }
            | Self::PledgeForDispute { request_id, .. }
            | Self::PledgeAgainstDispute { request_id, .. }
            | Self::SettleDispute { request_id, .. }
            | Self::EscalateDispute { request_id, .. }
            | Self::Finalize { request_id, .. } => Some(request_id),
        }
    }
}

struct MockProtocolState {
    current_epoch: Epoch,
    epochs: HashMap<u64, Epoch>,
    last_finalized_block: u64,
    events: Vec<EboEvent>,
    available_chains: Vec<ChainId>,
    approved_modules: Vec<Address>,
    accounting_module: Address,
    calls: Vec<ProtocolCall>,
    event_ranges: Vec<(u64, u64)>,
    next_failures: HashMap<&'static str, VecDeque<ProtocolError>>,
    persistent_failures: HashMap<&'static str, ProtocolError>,
    hanging_requests: HashSet<RequestId>,
    failing_requests: HashMap<RequestId, ProtocolError>,
}

/// Stateful in-memory protocol. Reads come from the configured chain view,
/// writes are recorded in order. Any action can be made to fail by name.
pub struct MockProtocol {
    state: Mutex<MockProtocolState>,
}

impl MockProtocol {
    pub fn new() -> Self {
        let current_epoch = epoch_fixture(CURRENT_EPOCH, EPOCH_FIRST_BLOCK);
        Self {
            state: Mutex::new(MockProtocolState {
                epochs: HashMap::from([(current_epoch.number, current_epoch.clone())]),
                current_epoch,
                last_finalized_block: EPOCH_FIRST_BLOCK,
                events: Vec::new(),
                available_chains: vec![arbitrum()],
                approved_modules: Vec::new(),
                accounting_module: address(0xacc),
                calls: Vec::new(),
                event_ranges: Vec::new(),
                next_failures: HashMap::new(),
                persistent_failures: HashMap::new(),
                hanging_requests: HashSet::new(),
                failing_requests: HashMap::new(),
            }),
        }
    }

    // --- Builders ---

    pub fn with_current_epoch(self, epoch: Epoch) -> Self {
        self.set_current_epoch(epoch);
        self
    }

    /// Make a past epoch readable through `get_epoch`.
    pub fn with_epoch(self, epoch: Epoch) -> Self {
        self.state.lock().unwrap().epochs.insert(epoch.number, epoch);
        self
    }

    pub fn with_last_finalized_block(self, block_number: u64) -> Self {
        self.set_last_finalized_block(block_number);
        self
    }

    pub fn with_events(self, events: Vec<EboEvent>) -> Self {
        self.push_events(events);
        self
    }

    pub fn with_available_chains(self, chains: Vec<ChainId>) -> Self {
        self.state.lock().unwrap().available_chains = chains;
        self
    }

    pub fn with_approved_modules(self, modules: Vec<Address>) -> Self {
        self.state.lock().unwrap().approved_modules = modules;
        self
    }

    // --- Runtime control ---

    pub fn set_current_epoch(&self, epoch: Epoch) {
        let mut state = self.state.lock().unwrap();
        state.epochs.insert(epoch.number, epoch.clone());
        state.current_epoch = epoch;
    }

    pub fn set_last_finalized_block(&self, block_number: u64) {
        self.state.lock().unwrap().last_finalized_block = block_number;
    }

    pub fn push_events(&self, events: Vec<EboEvent>) {
        self.state.lock().unwrap().events.extend(events);
    }

    /// Fail the next call of `action` with `error`.
    pub fn fail_next(&self, action: &'static str, error: ProtocolError) {
        self.state
            .lock()
            .unwrap()
            .next_failures
            .entry(action)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `action` until `recover` is called.
    pub fn fail_always(&self, action: &'static str, error: ProtocolError) {
        self.state
            .lock()
            .unwrap()
            .persistent_failures
            .insert(action, error);
    }

    pub fn recover(&self, action: &'static str) {
        let mut state = self.state.lock().unwrap();
        state.persistent_failures.remove(action);
        state.next_failures.remove(action);
    }

    /// Proposals for this request are recorded and then never complete.
    pub fn hang_on_propose(&self, request_id: RequestId) {
        self.state.lock().unwrap().hanging_requests.insert(request_id);
    }

    /// Every write for this request fails with `error` until `recover_request`.
    pub fn fail_request(&self, request_id: RequestId, error: ProtocolError) {
        self.state
            .lock()
            .unwrap()
            .failing_requests
            .insert(request_id, error);
    }

    pub fn recover_request(&self, request_id: &RequestId) {
        self.state.lock().unwrap().failing_requests.remove(request_id);
    }

    // --- Inspection ---

    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, request_id: &RequestId) -> Vec<ProtocolCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.request_id() == Some(request_id))
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.action() == action)
            .count()
    }

    /// `(from, to)` of every `get_events` call.
    pub fn event_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().event_ranges.clone()
    }

    // --- Internals ---

    fn failure(&self, action: &'static str) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state
            .next_failures
            .get_mut(action)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        match state.persistent_failures.get(action) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, call: ProtocolCall) -> Result<(), ProtocolError> {
        let action = call.action();
        let request_failure = {
            let mut state = self.state.lock().unwrap();
            let failure = call
                .request_id()
                .and_then(|id| state.failing_requests.get(id).cloned());
            state.calls.push(call);
            failure
        };
        match request_failure {
            Some(error) => Err(error),
            None => self.failure(action),
        }
    }
}

impl Default for MockProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolProvider for MockProtocol {
    async fn get_current_epoch(&self) -> Result<Epoch, ProtocolError> {
        self.failure("get_current_epoch")?;
        Ok(self.state.lock().unwrap().current_epoch.clone())
    }

    async fn get_epoch(&self, number: u64) -> Result<Epoch, ProtocolError> {
        self.failure("get_epoch")?;
        self.state
            .lock()
            .unwrap()
            .epochs
            .get(&number)
            .cloned()
            .ok_or_else(|| ProtocolError::Rpc(format!("unknown epoch {number}")))
    }

    async fn get_last_finalized_block(&self) -> Result<u64, ProtocolError> {
        self.failure("get_last_finalized_block")?;
        Ok(self.state.lock().unwrap().last_finalized_block)
    }

    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EboEvent>, ProtocolError> {
        self.state
            .lock()
            .unwrap()
            .event_ranges
            .push((from_block, to_block));
        self.failure("get_events")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn get_available_chains(&self) -> Result<Vec<ChainId>, ProtocolError> {
        self.failure("get_available_chains")?;
        Ok(self.state.lock().unwrap().available_chains.clone())
    }

    async fn get_accounting_approved_modules(&self) -> Result<Vec<Address>, ProtocolError> {
        self.failure("get_accounting_approved_modules")?;
        Ok(self.state.lock().unwrap().approved_modules.clone())
    }

    async fn get_accounting_module_address(&self) -> Result<Address, ProtocolError> {
        self.failure("get_accounting_module_address")?;
        Ok(self.state.lock().unwrap().accounting_module.clone())
    }

    async fn create_request(&self, epoch: u64, chain_id: &ChainId) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::CreateRequest {
            epoch,
            chain_id: chain_id.clone(),
        })
    }

    async fn propose_response(
        &self,
        request: &Request,
        response: &ResponseBody,
    ) -> Result<(), ProtocolError> {
        let result = self.record(ProtocolCall::ProposeResponse {
            request_id: request.id.clone(),
            block: response.block,
        });
        let hangs = self
            .state
            .lock()
            .unwrap()
            .hanging_requests
            .contains(&request.id);
        if hangs {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn dispute_response(
        &self,
        request_id: &RequestId,
        response_id: &ResponseId,
        proposer: &Address,
    ) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::DisputeResponse {
            request_id: request_id.clone(),
            response_id: response_id.clone(),
            proposer: proposer.clone(),
        })
    }

    async fn pledge_for_dispute(
        &self,
        request: &Request,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::PledgeForDispute {
            request_id: request.id.clone(),
            dispute_id: dispute.id.clone(),
        })
    }

    async fn pledge_against_dispute(
        &self,
        request: &Request,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::PledgeAgainstDispute {
            request_id: request.id.clone(),
            dispute_id: dispute.id.clone(),
        })
    }

    async fn settle_dispute(
        &self,
        request: &Request,
        _response: &Response,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::SettleDispute {
            request_id: request.id.clone(),
            dispute_id: dispute.id.clone(),
        })
    }

    async fn escalate_dispute(
        &self,
        request: &Request,
        _response: &Response,
        dispute: &Dispute,
    ) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::EscalateDispute {
            request_id: request.id.clone(),
            dispute_id: dispute.id.clone(),
        })
    }

    async fn finalize(&self, request: &Request, response: &Response) -> Result<(), ProtocolError> {
        self.record(ProtocolCall::Finalize {
            request_id: request.id.clone(),
            response_id: response.id.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// FixedBlockNumberService
// ---------------------------------------------------------------------------

/// Answers every lookup with a fixed block, optionally per chain.
pub struct FixedBlockNumberService {
    default_block: u64,
    blocks: HashMap<ChainId, u64>,
    calls: Mutex<Vec<(ChainId, DateTime<Utc>)>>,
}

impl FixedBlockNumberService {
    pub fn new(default_block: u64) -> Self {
        Self {
            default_block,
            blocks: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_chain(mut self, chain_id: ChainId, block_number: u64) -> Self {
        self.blocks.insert(chain_id, block_number);
        self
    }

    pub fn calls(&self) -> Vec<(ChainId, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockNumberService for FixedBlockNumberService {
    async fn get_epoch_block_number(
        &self,
        chain_id: &ChainId,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.calls.lock().unwrap().push((chain_id.clone(), timestamp));
        Ok(self
            .blocks
            .get(chain_id)
            .copied()
            .unwrap_or(self.default_block))
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Keeps every notification. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(String, ErrorContext)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Notifier` writing into this recorder.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(Box::new(self.clone()))
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<(String, ErrorContext)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyBackend for RecordingNotifier {
    async fn notify_error(&self, error: &str, context: &ErrorContext) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((error.to_string(), context.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

pub fn request_id(n: u64) -> RequestId {
    RequestId::new(&format!("0x{n:064x}")).unwrap()
}

pub fn response_id(n: u64) -> ResponseId {
    ResponseId::new(&format!("0x{:064x}", 0x1000 + n)).unwrap()
}

pub fn dispute_id(n: u64) -> DisputeId {
    DisputeId::new(&format!("0x{:064x}", 0x2000 + n)).unwrap()
}

pub fn address(n: u64) -> Address {
    Address::new(&format!("0x{n:040x}")).unwrap()
}

/// Proposer of every fixture response.
pub fn proposer() -> Address {
    address(1)
}

/// Disputer of every fixture dispute.
pub fn disputer() -> Address {
    address(2)
}

pub fn arbitrum() -> ChainId {
    ChainId::new("eip155:42161").unwrap()
}

pub fn ethereum() -> ChainId {
    ChainId::new("eip155:1").unwrap()
}

pub fn polygon() -> ChainId {
    ChainId::new("eip155:137").unwrap()
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

pub fn block_timestamp(block_number: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(GENESIS_TIMESTAMP + block_number as i64 * BLOCK_TIME_SECS, 0)
        .unwrap()
}

pub fn provenance(block_number: u64, log_index: u64) -> Provenance {
    Provenance {
        block_number,
        log_index,
        timestamp: block_timestamp(block_number),
    }
}

pub fn epoch_fixture(number: u64, first_block_number: u64) -> Epoch {
    Epoch {
        number,
        first_block_number,
        start_timestamp: block_timestamp(first_block_number),
    }
}

/// 100-block proposal window, 50-block dispute window, 20-block escalation window.
pub fn default_params() -> RequestParams {
    RequestParams {
        response_deadline: 100,
        dispute_window: 50,
        bond_escalation_deadline: 20,
    }
}

pub fn actor_request(id: RequestId, chain_id: ChainId, epoch: u64) -> ActorRequest {
    ActorRequest { id, epoch, chain_id }
}

/// Active request created at block 100.
pub fn request_fixture(id: RequestId, chain_id: ChainId, epoch: u64) -> Request {
    let params = default_params();
    Request {
        id,
        chain_id,
        epoch,
        created_at: provenance(100, 0),
        params,
        prophet_data: ProphetCodec::encode_request_params(&params),
        status: RequestStatus::Active,
    }
}

/// Undisputed response proposed at block 110.
pub fn response_fixture(request_id: RequestId, id: ResponseId, block: u64) -> Response {
    let body = ResponseBody { block };
    Response {
        id,
        request_id,
        proposer: proposer(),
        created_at: provenance(110, 0),
        body,
        prophet_data: ProphetCodec::encode_response(&body),
        disputed: false,
    }
}

/// Active dispute raised at block 120.
pub fn dispute_fixture(request_id: RequestId, response_id: ResponseId, id: DisputeId) -> Dispute {
    Dispute {
        id,
        status: DisputeStatus::Active,
        created_at: provenance(120, 0),
        request_id,
        response_id,
        disputer: disputer(),
        proposer: proposer(),
    }
}

/// Registry holding request `id` (arbitrum, epoch 3) and its response `response_id(1)`.
pub fn seeded_registry(id: RequestId) -> EboMemoryRegistry {
    let mut registry = EboMemoryRegistry::new();
    registry.add_request(request_fixture(id.clone(), arbitrum(), CURRENT_EPOCH));
    registry.add_response(response_fixture(id, response_id(1), 1000));
    registry
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn event(request_id: RequestId, block_number: u64, log_index: u64, metadata: EventMetadata) -> EboEvent {
    EboEvent {
        block_number,
        log_index,
        timestamp: block_timestamp(block_number),
        request_id,
        metadata,
    }
}

pub fn request_created(
    request_id: RequestId,
    chain_id: ChainId,
    epoch: u64,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    let params = default_params();
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::RequestCreated {
            chain_id,
            epoch,
            params,
            prophet_data: ProphetCodec::encode_request_params(&params),
        },
    )
}

/// `answer` is the block the response proposes.
pub fn response_proposed(
    request_id: RequestId,
    response_id: ResponseId,
    answer: u64,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    let body = ResponseBody { block: answer };
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::ResponseProposed {
            response_id,
            proposer: proposer(),
            body,
            prophet_data: ProphetCodec::encode_response(&body),
        },
    )
}

pub fn response_disputed(
    request_id: RequestId,
    response_id: ResponseId,
    dispute_id: DisputeId,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::ResponseDisputed {
            dispute_id,
            response_id,
            disputer: disputer(),
            proposer: proposer(),
        },
    )
}

pub fn request_finalized(
    request_id: RequestId,
    response_id: Option<ResponseId>,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::RequestFinalized {
            response_id,
            caller: address(3),
        },
    )
}

/// `status` is the raw on-chain code.
pub fn dispute_status_updated(
    request_id: RequestId,
    dispute_id: DisputeId,
    status: u8,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::DisputeStatusUpdated { dispute_id, status },
    )
}

pub fn dispute_escalated(
    request_id: RequestId,
    dispute_id: DisputeId,
    block_number: u64,
    log_index: u64,
) -> EboEvent {
    event(
        request_id,
        block_number,
        log_index,
        EventMetadata::DisputeEscalated {
            dispute_id,
            caller: address(3),
        },
    )
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn actor_deps(
    protocol: Arc<MockProtocol>,
    block_number_service: Arc<FixedBlockNumberService>,
) -> ActorDeps {
    ActorDeps::builder()
        .protocol(protocol)
        .block_number_service(block_number_service)
        .build()
}

pub fn processor_config(required_modules: Vec<Address>) -> ProcessorConfig {
    ProcessorConfig {
        required_modules,
        max_event_attempts: 5,
    }
}

pub fn noop_terminate_hook() -> TerminateHook {
    Arc::new(|_: &Request| -> anyhow::Result<()> { Ok(()) })
}

/// Hook that counts its invocations.
pub fn counting_terminate_hook() -> (TerminateHook, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let hook: TerminateHook = Arc::new(move |_: &Request| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hook, calls)
}
