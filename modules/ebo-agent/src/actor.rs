//! The per-request actor.
//!
//! An actor owns one request end to end: an ordered event queue, a private
//! registry, and the logic that turns each observed event into a registry
//! command plus a protocol action. Draining the queue is serialized by an
//! async mutex; enqueueing never waits on it.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use typed_builder::TypedBuilder;

use ebo_common::{
    ActorRequest, Dispute, DisputeId, DisputeStatus, EboEvent, EventKey, EventMetadata, Request,
    RequestId, RequestStatus, Response, ResponseBody, ResponseId,
};

use crate::commands::{Command, CommandError, RegistryCommand};
use crate::errors::{CompensatingAction, ErrorHandler, StrategyTable};
use crate::notify::{ErrorContext, Notifier};
use crate::protocol::{BlockNumberService, ProtocolError, ProtocolProvider};
use crate::registry::EboRegistry;

/// Default number of attempts before an event is dead-lettered.
pub const DEFAULT_MAX_EVENT_ATTEMPTS: u32 = 5;

/// Called once the actor observes its request being finalized.
pub type TerminateHook = Arc<dyn Fn(&Request) -> anyhow::Result<()> + Send + Sync>;

#[derive(Error, Debug)]
pub enum ActorError {
    #[error("event for request {event_request_id} enqueued on actor of request {actor_request_id}")]
    RequestMismatch {
        actor_request_id: RequestId,
        event_request_id: RequestId,
    },

    #[error("event at {event} is older than the last applied event at {last_applied}")]
    PastEventEnqueueError {
        last_applied: EventKey,
        event: EventKey,
    },

    #[error("a response with block {block} was already proposed for request {request_id}")]
    ResponseAlreadyProposed { request_id: RequestId, block: u64 },

    #[error("dispute {dispute_id} cannot move to status {status}")]
    InvalidDisputeStatus {
        dispute_id: DisputeId,
        status: DisputeStatus,
    },

    #[error("invalid actor state: {0}")]
    InvalidActorState(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{action} failed: {source}")]
    Protocol {
        action: &'static str,
        #[source]
        source: ProtocolError,
        /// Whether the triggering event goes back on the queue.
        requeue: bool,
    },

    #[error("block number resolution failed: {0}")]
    BlockNumber(anyhow::Error),
}

impl ActorError {
    /// Collaborator failures; the event was re-enqueued and the next
    /// `process_events` call retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::BlockNumber(_))
    }

    /// False only for protocol errors whose strategy drops the event.
    pub fn should_requeue(&self) -> bool {
        match self {
            Self::Protocol { requeue, .. } => *requeue,
            _ => true,
        }
    }
}

/// Collaborators shared by every actor of a processor.
#[derive(Clone, TypedBuilder)]
pub struct ActorDeps {
    pub protocol: Arc<dyn ProtocolProvider>,
    pub block_number_service: Arc<dyn BlockNumberService>,
    #[builder(default = Arc::new(Notifier::noop()))]
    pub notifier: Arc<Notifier>,
    #[builder(default)]
    pub strategies: Arc<StrategyTable>,
    #[builder(default = DEFAULT_MAX_EVENT_ATTEMPTS)]
    pub max_event_attempts: u32,
}

/// An event that exhausted its attempts and was taken off the queue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: EboEvent,
    pub attempts: u32,
    pub error: String,
}

struct QueuedEvent {
    event: EboEvent,
    attempts: u32,
}

/// Deadline-driven actions already sent, so a lagging event feed does not
/// make the actor send them again every block update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IssuedAction {
    Settle(DisputeId),
    Finalize,
}

struct DisputeTarget<'a> {
    request: &'a Request,
    response: &'a Response,
    dispute: &'a Dispute,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct EboActor {
    actor_request: ActorRequest,
    deps: ActorDeps,
    error_handler: ErrorHandler,
    on_terminate: TerminateHook,
    registry: Mutex<Box<dyn EboRegistry>>,
    queue: Mutex<VecDeque<QueuedEvent>>,
    last_applied: Mutex<Option<EventKey>>,
    last_block: Mutex<Option<u64>>,
    issued: Mutex<HashSet<IssuedAction>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    terminate_requested: AtomicBool,
    processing: AsyncMutex<()>,
    span: Span,
}

impl EboActor {
    pub fn new(
        actor_request: ActorRequest,
        deps: ActorDeps,
        registry: Box<dyn EboRegistry>,
        on_terminate: TerminateHook,
    ) -> Self {
        let span = info_span!(
            "ebo_actor",
            request_id = %actor_request.id,
            chain_id = %actor_request.chain_id,
            epoch = actor_request.epoch,
        );
        let error_handler = ErrorHandler::new(deps.strategies.clone(), deps.notifier.clone());

        Self {
            actor_request,
            deps,
            error_handler,
            on_terminate,
            registry: Mutex::new(registry),
            queue: Mutex::new(VecDeque::new()),
            last_applied: Mutex::new(None),
            last_block: Mutex::new(None),
            issued: Mutex::new(HashSet::new()),
            dead_letters: Mutex::new(Vec::new()),
            terminate_requested: AtomicBool::new(false),
            processing: AsyncMutex::new(()),
            span,
        }
    }

    pub fn actor_request(&self) -> &ActorRequest {
        &self.actor_request
    }

    // --- Queue ---

    /// Append an event to the tail of the queue.
    pub fn enqueue(&self, event: EboEvent) -> Result<(), ActorError> {
        if event.request_id != self.actor_request.id {
            return Err(ActorError::RequestMismatch {
                actor_request_id: self.actor_request.id.clone(),
                event_request_id: event.request_id,
            });
        }

        let last_applied = *lock(&self.last_applied);
        if let Some(last_applied) = last_applied {
            if event.key() < last_applied {
                return Err(ActorError::PastEventEnqueueError {
                    last_applied,
                    event: event.key(),
                });
            }
        }

        lock(&self.queue).push_back(QueuedEvent { event, attempts: 0 });
        Ok(())
    }

    pub fn pending_events(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn last_applied(&self) -> Option<EventKey> {
        *lock(&self.last_applied)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.dead_letters).clone()
    }

    /// Drain the queue, one event at a time.
    ///
    /// On failure the event goes back to the head of the queue with its
    /// registry mutation undone, and the error is returned. The next call
    /// retries it. An event that exhausts its attempts is dead-lettered with
    /// its registry mutation kept; one whose protocol error strategy forbids
    /// a retry is dropped the same way.
    pub async fn process_events(&self) -> Result<(), ActorError> {
        let _guard = self.processing.lock().await;
        self.drain_queue().instrument(self.span.clone()).await
    }

    async fn drain_queue(&self) -> Result<(), ActorError> {
        while let Some(mut queued) = self.pop_front() {
            let key = queued.event.key();
            let event_name = queued.event.name();
            debug!(event = event_name, %key, attempt = queued.attempts + 1, "Processing event");

            let command = match self.apply_command(&queued.event) {
                Ok(command) => command,
                Err(err) => {
                    error!(event = event_name, %key, error = %err, "Failed to apply registry command");
                    let err = ActorError::from(err);
                    queued.attempts += 1;
                    if self.attempts_exhausted(&queued) {
                        self.dead_letter(queued, &err).await;
                        *lock(&self.last_applied) = Some(key);
                        continue;
                    }
                    self.push_front(queued);
                    return Err(err);
                }
            };

            match self.on_event(&queued.event).await {
                Ok(()) => {
                    *lock(&self.last_applied) = Some(key);
                }
                Err(err) if !err.should_requeue() => {
                    // The chain-observed mutation stays; only the reaction is dropped.
                    warn!(event = event_name, %key, error = %err, "Event handling failed, event dropped");
                    *lock(&self.last_applied) = Some(key);
                    return Err(err);
                }
                Err(err) => {
                    queued.attempts += 1;

                    if self.attempts_exhausted(&queued) {
                        self.dead_letter(queued, &err).await;
                        *lock(&self.last_applied) = Some(key);
                        continue;
                    }

                    self.revert(command);
                    warn!(
                        event = event_name,
                        %key,
                        attempts = queued.attempts,
                        error = %err,
                        "Event handling failed, re-enqueued at head"
                    );
                    self.push_front(queued);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    fn attempts_exhausted(&self, queued: &QueuedEvent) -> bool {
        !self.is_terminate_requested() && queued.attempts >= self.deps.max_event_attempts
    }

    fn pop_front(&self) -> Option<QueuedEvent> {
        lock(&self.queue).pop_front()
    }

    fn push_front(&self, queued: QueuedEvent) {
        lock(&self.queue).push_front(queued);
    }

    fn apply_command(&self, event: &EboEvent) -> Result<RegistryCommand, CommandError> {
        let mut registry = lock(&self.registry);
        let mut command = RegistryCommand::build_from_event(event, &**registry)?;
        command.run(&mut **registry)?;
        debug!(command = command.name(), "Applied registry command");
        Ok(command)
    }

    fn revert(&self, command: RegistryCommand) {
        let name = command.name();
        let mut registry = lock(&self.registry);
        if let Err(err) = command.undo(&mut **registry) {
            error!(command = name, error = %err, "Failed to undo registry command");
        }
    }

    async fn dead_letter(&self, queued: QueuedEvent, err: &ActorError) {
        error!(
            event = queued.event.name(),
            key = %queued.event.key(),
            attempts = queued.attempts,
            error = %err,
            "Event exhausted its attempts, dead-lettered"
        );

        let context = ErrorContext::action("process_events")
            .with_request(self.actor_request.id.clone())
            .with_event(queued.event.name());
        self.deps.notifier.notify_error(err, &context).await;

        lock(&self.dead_letters).push(DeadLetter {
            event: queued.event,
            attempts: queued.attempts,
            error: err.to_string(),
        });
    }

    // --- Event handlers ---

    async fn on_event(&self, event: &EboEvent) -> Result<(), ActorError> {
        match &event.metadata {
            EventMetadata::RequestCreated { .. } => self.on_request_created(event).await,
            EventMetadata::ResponseProposed { response_id, .. } => {
                self.on_response_proposed(event, response_id).await
            }
            EventMetadata::ResponseDisputed { dispute_id, .. } => {
                self.on_response_disputed(event, dispute_id).await
            }
            EventMetadata::RequestFinalized { .. } => self.on_request_finalized(),
            EventMetadata::DisputeStatusUpdated { dispute_id, .. } => {
                self.on_dispute_status_updated(event, dispute_id).await
            }
            EventMetadata::DisputeEscalated { dispute_id, .. } => {
                info!(%dispute_id, "Dispute escalated");
                Ok(())
            }
        }
    }

    async fn on_request_created(&self, event: &EboEvent) -> Result<(), ActorError> {
        match self.propose_response(event.name()).await {
            Err(ActorError::ResponseAlreadyProposed { request_id, block }) => {
                warn!(%request_id, block, "Response already proposed, skipping proposal");
                Ok(())
            }
            other => other,
        }
    }

    async fn on_response_proposed(
        &self,
        event: &EboEvent,
        response_id: &ResponseId,
    ) -> Result<(), ActorError> {
        let request = self.get_request()?;
        let response = self.get_response(response_id)?;
        let correct = self.correct_response(&request).await?;

        if response.body == correct {
            info!(%response_id, block = correct.block, "Proposed response is correct");
            return Ok(());
        }

        let disputed = self
            .run_action(
                "dispute_response",
                Some(event.name()),
                None,
                self.deps
                    .protocol
                    .dispute_response(&request.id, &response.id, &response.proposer),
            )
            .await?;

        if disputed {
            info!(
                %response_id,
                proposed_block = response.body.block,
                correct_block = correct.block,
                "Disputed response"
            );
        }
        Ok(())
    }

    async fn on_response_disputed(
        &self,
        event: &EboEvent,
        dispute_id: &DisputeId,
    ) -> Result<(), ActorError> {
        let request = self.get_request()?;
        let dispute = self.get_dispute(dispute_id)?;
        let response = self.get_response(&dispute.response_id)?;
        let correct = self.correct_response(&request).await?;

        if response.body != correct {
            let pledged = self
                .run_action(
                    "pledge_for_dispute",
                    Some(event.name()),
                    None,
                    self.deps.protocol.pledge_for_dispute(&request, &dispute),
                )
                .await?;
            if pledged {
                info!(%dispute_id, "Pledged for dispute");
            }
        } else {
            let pledged = self
                .run_action(
                    "pledge_against_dispute",
                    Some(event.name()),
                    None,
                    self.deps.protocol.pledge_against_dispute(&request, &dispute),
                )
                .await?;
            if pledged {
                info!(%dispute_id, "Pledged against dispute");
            }
        }
        Ok(())
    }

    fn on_request_finalized(&self) -> Result<(), ActorError> {
        let request = self.get_request()?;
        (self.on_terminate)(&request).map_err(|e| {
            ActorError::InvalidActorState(format!("termination callback failed: {e}"))
        })?;
        info!("Request finalized");
        Ok(())
    }

    async fn on_dispute_status_updated(
        &self,
        event: &EboEvent,
        dispute_id: &DisputeId,
    ) -> Result<(), ActorError> {
        let dispute = self.get_dispute(dispute_id)?;

        match dispute.status {
            DisputeStatus::None => Err(ActorError::InvalidDisputeStatus {
                dispute_id: dispute_id.clone(),
                status: dispute.status,
            }),
            DisputeStatus::Won => {
                info!(%dispute_id, "Dispute won, disputed response rejected");
                let request = self.get_request()?;
                if request.status != RequestStatus::Active {
                    return Ok(());
                }
                match self.propose_response(event.name()).await {
                    Err(ActorError::ResponseAlreadyProposed { request_id, block }) => {
                        warn!(%request_id, block, "Response already proposed after won dispute");
                        Ok(())
                    }
                    other => other,
                }
            }
            status => {
                info!(%dispute_id, %status, "Dispute status updated");
                Ok(())
            }
        }
    }

    async fn propose_response(&self, event_name: &'static str) -> Result<(), ActorError> {
        let request = self.get_request()?;
        let body = self.correct_response(&request).await?;

        let already_proposed = self.with_registry(|registry| {
            registry
                .get_responses()
                .iter()
                .any(|response| response.request_id == request.id && response.body == body)
        });
        if already_proposed {
            return Err(ActorError::ResponseAlreadyProposed {
                request_id: request.id.clone(),
                block: body.block,
            });
        }

        let proposed = self
            .run_action(
                "propose_response",
                Some(event_name),
                None,
                self.deps.protocol.propose_response(&request, &body),
            )
            .await?;

        if proposed {
            info!(block = body.block, "Proposed response");
        }
        Ok(())
    }

    /// The answer this agent believes is correct for the request.
    async fn correct_response(&self, request: &Request) -> Result<ResponseBody, ActorError> {
        let epoch = self
            .deps
            .protocol
            .get_epoch(request.epoch)
            .await
            .map_err(|source| ActorError::Protocol {
                action: "get_epoch",
                source,
                requeue: true,
            })?;

        let block = self
            .deps
            .block_number_service
            .get_epoch_block_number(&request.chain_id, epoch.start_timestamp)
            .await
            .map_err(ActorError::BlockNumber)?;

        Ok(ResponseBody { block })
    }

    // --- Protocol actions ---

    /// Await a protocol write, routing a failure through the error handler.
    ///
    /// Returns `Ok(true)` when the action went through, `Ok(false)` when it
    /// failed but the strategy says to carry on, and `Err` when the caller
    /// must treat it as a failure.
    async fn run_action<F>(
        &self,
        action: &'static str,
        event: Option<&'static str>,
        target: Option<DisputeTarget<'_>>,
        call: F,
    ) -> Result<bool, ActorError>
    where
        F: Future<Output = Result<(), ProtocolError>>,
    {
        let source = match call.await {
            Ok(()) => return Ok(true),
            Err(source) => source,
        };

        let mut context =
            ErrorContext::action(action).with_request(self.actor_request.id.clone());
        if let Some(event) = event {
            context = context.with_event(event);
        }

        let directive = self.error_handler.handle(&source, &context).await;

        if let Some(compensation) = directive.compensation {
            self.compensate(compensation, target, &context).await?;
        }

        if directive.terminate {
            warn!(action, "Actor flagged for termination");
            self.terminate_requested.store(true, Ordering::SeqCst);
        }

        if directive.is_failure() {
            Err(ActorError::Protocol {
                action,
                source,
                requeue: directive.reenqueue,
            })
        } else {
            Ok(false)
        }
    }

    async fn compensate(
        &self,
        compensation: CompensatingAction,
        target: Option<DisputeTarget<'_>>,
        context: &ErrorContext,
    ) -> Result<(), ActorError> {
        match compensation {
            CompensatingAction::EscalateDispute => {
                let Some(target) = target else {
                    warn!(%compensation, %context, "No dispute to escalate, skipping compensation");
                    return Ok(());
                };

                let result = self
                    .deps
                    .protocol
                    .escalate_dispute(target.request, target.response, target.dispute)
                    .await;

                match result {
                    Ok(()) => {
                        info!(dispute_id = %target.dispute.id, "Escalated dispute");
                        self.mark_issued(IssuedAction::Settle(target.dispute.id.clone()));
                        Ok(())
                    }
                    Err(source) => {
                        let context = ErrorContext::action("escalate_dispute")
                            .with_request(self.actor_request.id.clone());
                        let directive = self.error_handler.handle(&source, &context).await;
                        if directive.terminate {
                            self.terminate_requested.store(true, Ordering::SeqCst);
                        }
                        if directive.is_failure() {
                            Err(ActorError::Protocol {
                                action: "escalate_dispute",
                                source,
                                requeue: directive.reenqueue,
                            })
                        } else {
                            Ok(())
                        }
                    }
                }
            }
        }
    }

    // --- Block updates ---

    /// Record the latest finalized height and run the actions that only
    /// depend on time passing: settling disputes whose escalation deadline is
    /// over and finalizing the request once an accepted response exists.
    pub async fn on_last_block_updated(&self, block_number: u64) -> Result<(), ActorError> {
        let _guard = self.processing.lock().await;
        *lock(&self.last_block) = Some(block_number);

        async {
            self.settle_expired_disputes(block_number).await?;
            self.finalize_if_ready(block_number).await
        }
        .instrument(self.span.clone())
        .await
    }

    pub fn last_block(&self) -> Option<u64> {
        *lock(&self.last_block)
    }

    async fn settle_expired_disputes(&self, block_number: u64) -> Result<(), ActorError> {
        let Some(request) = self.request() else {
            return Ok(());
        };

        let mut expired: Vec<(Dispute, Response)> = self.with_registry(|registry| {
            registry
                .get_disputes()
                .into_iter()
                .filter(|d| d.request_id == request.id)
                .filter(|d| d.status == DisputeStatus::Active)
                .filter(|d| d.escalation_deadline(&request.params) < block_number)
                .filter_map(|d| {
                    registry
                        .get_response(&d.response_id)
                        .map(|r| (d.clone(), r.clone()))
                })
                .collect()
        });
        expired.sort_by_key(|(d, _)| (d.created_at.block_number, d.created_at.log_index));

        for (dispute, response) in expired {
            if self.was_issued(&IssuedAction::Settle(dispute.id.clone())) {
                continue;
            }

            let target = DisputeTarget {
                request: &request,
                response: &response,
                dispute: &dispute,
            };
            let result = self
                .run_action(
                    "settle_dispute",
                    None,
                    Some(target),
                    self.deps
                        .protocol
                        .settle_dispute(&request, &response, &dispute),
                )
                .await;

            match result {
                Ok(true) => {
                    info!(dispute_id = %dispute.id, "Settled dispute");
                    self.mark_issued(IssuedAction::Settle(dispute.id.clone()));
                }
                Ok(false) => {}
                Err(err) if self.is_terminate_requested() => return Err(err),
                Err(err) => {
                    warn!(dispute_id = %dispute.id, error = %err, "Settlement failed, retrying on next block update");
                }
            }
        }

        Ok(())
    }

    async fn finalize_if_ready(&self, block_number: u64) -> Result<(), ActorError> {
        let Some(request) = self.request() else {
            return Ok(());
        };
        if request.status != RequestStatus::Active
            || block_number <= request.proposal_deadline()
            || self.was_issued(&IssuedAction::Finalize)
        {
            return Ok(());
        }

        let Some(response) = self.accepted_response(&request, block_number) else {
            debug!(block_number, "No accepted response to finalize with yet");
            return Ok(());
        };

        let result = self
            .run_action(
                "finalize",
                None,
                None,
                self.deps.protocol.finalize(&request, &response),
            )
            .await;

        match result {
            Ok(finalized) => {
                if finalized {
                    info!(response_id = %response.id, "Finalized request");
                }
                self.mark_issued(IssuedAction::Finalize);
                Ok(())
            }
            Err(err) if self.is_terminate_requested() => Err(err),
            Err(err) => {
                warn!(error = %err, "Finalization failed, retrying on next block update");
                Ok(())
            }
        }
    }

    /// Earliest response that survived its dispute window: never disputed, or
    /// its dispute was lost by the disputer.
    fn accepted_response(&self, request: &Request, block_number: u64) -> Option<Response> {
        self.with_registry(|registry| {
            registry
                .get_responses()
                .into_iter()
                .filter(|r| r.request_id == request.id)
                .filter(|r| r.dispute_deadline(&request.params) < block_number)
                .filter(|r| match registry.get_response_dispute(&r.id) {
                    None => true,
                    Some(dispute) => dispute.status == DisputeStatus::Lost,
                })
                .min_by_key(|r| (r.created_at.block_number, r.created_at.log_index))
                .cloned()
        })
    }

    fn was_issued(&self, action: &IssuedAction) -> bool {
        lock(&self.issued).contains(action)
    }

    fn mark_issued(&self, action: IssuedAction) {
        lock(&self.issued).insert(action);
    }

    // --- Termination ---

    fn is_terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }

    /// Whether the actor has nothing left to do and may be evicted.
    ///
    /// True when the error handler flagged the actor for termination, or when
    /// all of the following hold: the request belongs to an epoch before
    /// `current_epoch`, it is finalized, none of its disputes is still open,
    /// the queue is empty, and the actor already saw `last_finalized_block`.
    pub fn can_be_terminated(&self, current_epoch: u64, last_finalized_block: u64) -> bool {
        if self.is_terminate_requested() {
            return true;
        }

        let observed = self
            .last_block()
            .is_some_and(|block| block >= last_finalized_block);
        if !observed || self.pending_events() > 0 {
            return false;
        }

        self.with_registry(|registry| {
            let Some(request) = registry.get_request(&self.actor_request.id) else {
                return false;
            };
            let open_disputes = registry
                .get_disputes()
                .iter()
                .any(|d| d.request_id == request.id && d.status.is_open());

            request.epoch < current_epoch
                && request.status == RequestStatus::Finalized
                && !open_disputes
        })
    }

    // --- Registry access ---

    /// Read-only access to the actor's registry.
    pub fn with_registry<R>(&self, f: impl FnOnce(&dyn EboRegistry) -> R) -> R {
        let registry = lock(&self.registry);
        f(&**registry)
    }

    /// Snapshot of the actor's request, if already registered.
    pub fn request(&self) -> Option<Request> {
        self.with_registry(|registry| registry.get_request(&self.actor_request.id).cloned())
    }

    fn get_request(&self) -> Result<Request, ActorError> {
        self.request()
            .ok_or_else(|| CommandError::RequestNotFound(self.actor_request.id.clone()).into())
    }

    fn get_response(&self, id: &ResponseId) -> Result<Response, ActorError> {
        self.with_registry(|registry| registry.get_response(id).cloned())
            .ok_or_else(|| CommandError::ResponseNotFound(id.clone()).into())
    }

    fn get_dispute(&self, id: &DisputeId) -> Result<Dispute, ActorError> {
        self.with_registry(|registry| registry.get_dispute(id).cloned())
            .ok_or_else(|| CommandError::DisputeNotFound(id.clone()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EboMemoryRegistry;
    use crate::testing::*;

    const CORRECT_BLOCK: u64 = 1000;

    fn new_actor(protocol: &Arc<MockProtocol>) -> EboActor {
        new_actor_with(protocol, noop_terminate_hook(), DEFAULT_MAX_EVENT_ATTEMPTS)
    }

    fn new_actor_with(
        protocol: &Arc<MockProtocol>,
        hook: TerminateHook,
        max_event_attempts: u32,
    ) -> EboActor {
        let deps = ActorDeps::builder()
            .protocol(protocol.clone())
            .block_number_service(Arc::new(FixedBlockNumberService::new(CORRECT_BLOCK)))
            .max_event_attempts(max_event_attempts)
            .build();
        EboActor::new(
            actor_request(request_id(1), arbitrum(), 3),
            deps,
            Box::new(EboMemoryRegistry::new()),
            hook,
        )
    }

    /// Actor with its request registered and the initial proposal done.
    async fn created_actor(protocol: &Arc<MockProtocol>) -> EboActor {
        let actor = new_actor(protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        actor.process_events().await.unwrap();
        actor
    }

    // --- enqueue ---

    #[tokio::test]
    async fn enqueue_rejects_foreign_request() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);

        let err = actor
            .enqueue(request_created(request_id(2), arbitrum(), 3, 100, 0))
            .unwrap_err();
        assert!(matches!(err, ActorError::RequestMismatch { .. }));

        let err = actor
            .enqueue(dispute_escalated(request_id(2), dispute_id(1), 100, 0))
            .unwrap_err();
        assert!(matches!(err, ActorError::RequestMismatch { .. }));
    }

    #[tokio::test]
    async fn enqueue_rejects_events_older_than_last_applied() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 5))
            .unwrap();
        actor.process_events().await.unwrap();

        let err = actor
            .enqueue(response_proposed(request_id(1), response_id(1), 7, 100, 4))
            .unwrap_err();
        assert!(matches!(err, ActorError::PastEventEnqueueError { .. }));

        let err = actor
            .enqueue(response_proposed(request_id(1), response_id(1), 7, 99, 9))
            .unwrap_err();
        assert!(matches!(err, ActorError::PastEventEnqueueError { .. }));

        // Same key and later keys are accepted.
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 7, 100, 6))
            .unwrap();
        assert_eq!(actor.pending_events(), 1);
    }

    // --- RequestCreated ---

    #[tokio::test]
    async fn request_created_proposes_correct_block() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;

        assert_eq!(
            protocol.calls(),
            vec![ProtocolCall::ProposeResponse {
                request_id: request_id(1),
                block: CORRECT_BLOCK,
            }]
        );
        assert_eq!(actor.request().unwrap().status, RequestStatus::Active);
        assert_eq!(
            actor.last_applied(),
            Some(EventKey {
                block_number: 100,
                log_index: 0
            })
        );
    }

    #[tokio::test]
    async fn won_dispute_skips_reproposal_when_correct_response_exists() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), CORRECT_BLOCK, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor
            .enqueue(dispute_status_updated(request_id(1), dispute_id(1), 3, 103, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        // Won dispute triggers a re-proposal, which is skipped because a
        // response with the same block already exists.
        assert_eq!(protocol.count("propose_response"), 1);
        assert_eq!(
            actor.with_registry(|r| r.get_dispute(&dispute_id(1)).map(|d| d.status)),
            Some(DisputeStatus::Won)
        );
    }

    // --- ResponseProposed ---

    #[tokio::test]
    async fn wrong_response_is_disputed() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;

        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(
            protocol.calls().last(),
            Some(&ProtocolCall::DisputeResponse {
                request_id: request_id(1),
                response_id: response_id(1),
                proposer: proposer(),
            })
        );
    }

    #[tokio::test]
    async fn correct_response_is_not_disputed() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;

        actor
            .enqueue(response_proposed(request_id(1), response_id(1), CORRECT_BLOCK, 101, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(protocol.count("dispute_response"), 0);
        assert!(actor.with_registry(|r| r.get_response(&response_id(1)).is_some()));
    }

    // --- ResponseDisputed ---

    #[tokio::test]
    async fn pledges_for_dispute_against_wrong_response() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;

        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(protocol.count("pledge_for_dispute"), 1);
        assert_eq!(protocol.count("pledge_against_dispute"), 0);
    }

    #[tokio::test]
    async fn pledges_against_dispute_of_correct_response() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;

        actor
            .enqueue(response_proposed(request_id(1), response_id(1), CORRECT_BLOCK, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(protocol.count("pledge_for_dispute"), 0);
        assert_eq!(protocol.count("pledge_against_dispute"), 1);
    }

    // --- RequestFinalized ---

    #[tokio::test]
    async fn finalization_invokes_terminate_hook() {
        let protocol = Arc::new(MockProtocol::new());
        let (hook, calls) = counting_terminate_hook();
        let actor = new_actor_with(&protocol, hook, DEFAULT_MAX_EVENT_ATTEMPTS);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        actor
            .enqueue(request_finalized(request_id(1), None, 250, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(actor.request().unwrap().status, RequestStatus::Finalized);
    }

    #[tokio::test]
    async fn failing_terminate_hook_is_invalid_actor_state() {
        let protocol = Arc::new(MockProtocol::new());
        let hook: TerminateHook =
            Arc::new(|_: &Request| -> anyhow::Result<()> { anyhow::bail!("directory unavailable") });
        let actor = new_actor_with(&protocol, hook, DEFAULT_MAX_EVENT_ATTEMPTS);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        actor
            .enqueue(request_finalized(request_id(1), None, 250, 0))
            .unwrap();

        let err = actor.process_events().await.unwrap_err();
        assert!(matches!(err, ActorError::InvalidActorState(_)));

        // The finalize event stays at the head with its mutation undone.
        assert_eq!(actor.pending_events(), 1);
        assert_eq!(actor.request().unwrap().status, RequestStatus::Active);
    }

    // --- Failure handling ---

    #[tokio::test]
    async fn failed_action_requeues_event_at_head_and_undoes_command() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();

        protocol.fail_next("propose_response", ProtocolError::Rpc("timeout".into()));
        let err = actor.process_events().await.unwrap_err();
        assert!(matches!(err, ActorError::Protocol { action: "propose_response", .. }));
        assert_eq!(actor.pending_events(), 2);
        assert!(actor.request().is_none());
        assert_eq!(actor.last_applied(), None);

        actor.process_events().await.unwrap();
        assert_eq!(actor.pending_events(), 0);
        assert_eq!(protocol.count("propose_response"), 2);
        assert_eq!(protocol.count("dispute_response"), 1);
    }

    #[tokio::test]
    async fn ignored_revert_consumes_event() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();

        protocol.fail_next(
            "propose_response",
            ProtocolError::revert("BondedResponseModule_AlreadyResponded", ""),
        );
        actor.process_events().await.unwrap();

        assert_eq!(actor.pending_events(), 0);
        assert!(actor.request().is_some());
    }

    #[tokio::test]
    async fn event_is_dead_lettered_after_max_attempts() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor_with(&protocol, noop_terminate_hook(), 2);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        protocol.fail_always(
            "propose_response",
            ProtocolError::revert("AccountingExtension_InsufficientFunds", ""),
        );

        assert!(actor.process_events().await.is_err());
        actor.process_events().await.unwrap();

        let dead = actor.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(actor.pending_events(), 0);
        // The request was observed on chain: it stays registered.
        assert!(actor.request().is_some());
    }

    #[tokio::test]
    async fn request_is_still_defended_after_its_proposal_is_dead_lettered() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor_with(&protocol, noop_terminate_hook(), 2);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        protocol.fail_always(
            "propose_response",
            ProtocolError::revert("AccountingExtension_InsufficientFunds", ""),
        );
        assert!(actor.process_events().await.is_err());
        actor.process_events().await.unwrap();
        protocol.recover("propose_response");

        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(protocol.count("dispute_response"), 1);
        assert_eq!(actor.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn failed_command_counts_towards_max_attempts() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor_with(&protocol, noop_terminate_hook(), 2);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        actor
            .enqueue(dispute_status_updated(request_id(1), dispute_id(9), 3, 101, 0))
            .unwrap();
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 102, 0))
            .unwrap();

        let err = actor.process_events().await.unwrap_err();
        assert!(matches!(
            err,
            ActorError::Command(CommandError::DisputeNotFound(_))
        ));
        assert_eq!(actor.pending_events(), 2);

        // Second failure exhausts the attempts; the queue moves on.
        actor.process_events().await.unwrap();
        let dead = actor.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].event.name(), "DisputeStatusUpdated");
        assert_eq!(actor.pending_events(), 0);
        assert_eq!(protocol.count("dispute_response"), 1);
    }

    #[tokio::test]
    async fn terminating_revert_flags_actor() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        protocol.fail_next(
            "propose_response",
            ProtocolError::revert("Oracle_InvalidRequest", ""),
        );

        let err = actor.process_events().await.unwrap_err();
        assert!(!err.should_requeue());
        assert!(actor.can_be_terminated(0, 0));

        // Not re-enqueued: the strategy says the event must not be retried.
        assert_eq!(actor.pending_events(), 0);
        assert!(actor.request().is_some());
        assert!(actor.dead_letters().is_empty());
        assert_eq!(
            actor.last_applied(),
            Some(EventKey {
                block_number: 100,
                log_index: 0
            })
        );
    }

    #[tokio::test]
    async fn concurrent_drains_are_serialized() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();

        let (a, b) = tokio::join!(actor.process_events(), actor.process_events());
        a.unwrap();
        b.unwrap();

        assert_eq!(protocol.count("propose_response"), 1);
    }

    // --- Dispute status ---

    #[tokio::test]
    async fn status_update_to_none_is_invalid() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        actor
            .enqueue(dispute_status_updated(request_id(1), dispute_id(1), 0, 103, 0))
            .unwrap();
        let err = actor.process_events().await.unwrap_err();
        assert!(matches!(err, ActorError::InvalidDisputeStatus { .. }));
        assert_eq!(
            actor.with_registry(|r| r.get_dispute(&dispute_id(1)).map(|d| d.status)),
            Some(DisputeStatus::Active)
        );
    }

    #[tokio::test]
    async fn unknown_status_code_surfaces() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor
            .enqueue(dispute_status_updated(request_id(1), dispute_id(1), 77, 103, 0))
            .unwrap();

        let err = actor.process_events().await.unwrap_err();
        assert!(matches!(
            err,
            ActorError::Command(CommandError::UnknownDisputeStatus(77))
        ));
        assert_eq!(actor.pending_events(), 1);
    }

    #[tokio::test]
    async fn won_dispute_reproposes_when_no_valid_response() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = new_actor(&protocol);
        actor
            .enqueue(request_created(request_id(1), arbitrum(), 3, 100, 0))
            .unwrap();
        // Our first proposal is rejected by the chain and ignored.
        protocol.fail_next(
            "propose_response",
            ProtocolError::revert("BondedResponseModule_AlreadyResponded", ""),
        );
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor
            .enqueue(dispute_status_updated(request_id(1), dispute_id(1), 3, 103, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        assert_eq!(protocol.count("propose_response"), 2);
    }

    // --- Block updates ---

    #[tokio::test]
    async fn expired_dispute_is_settled_once() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        let deadline = 102 + default_params().bond_escalation_deadline;
        actor.on_last_block_updated(deadline).await.unwrap();
        assert_eq!(protocol.count("settle_dispute"), 0);

        actor.on_last_block_updated(deadline + 1).await.unwrap();
        actor.on_last_block_updated(deadline + 2).await.unwrap();
        assert_eq!(protocol.count("settle_dispute"), 1);
        assert_eq!(actor.last_block(), Some(deadline + 2));
    }

    #[tokio::test]
    async fn unsettleable_dispute_is_escalated() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        protocol.fail_next(
            "settle_dispute",
            ProtocolError::revert("BondEscalationModule_ShouldBeEscalated", ""),
        );
        let block = 102 + default_params().bond_escalation_deadline + 1;
        actor.on_last_block_updated(block).await.unwrap();
        actor.on_last_block_updated(block + 1).await.unwrap();

        assert_eq!(protocol.count("settle_dispute"), 1);
        assert_eq!(protocol.count("escalate_dispute"), 1);
    }

    #[tokio::test]
    async fn accepted_response_is_finalized_after_windows() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), CORRECT_BLOCK, 101, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        let params = default_params();
        let proposal_deadline = 100 + params.response_deadline;
        actor.on_last_block_updated(proposal_deadline).await.unwrap();
        assert_eq!(protocol.count("finalize"), 0);

        actor.on_last_block_updated(proposal_deadline + 1).await.unwrap();
        actor.on_last_block_updated(proposal_deadline + 2).await.unwrap();
        assert_eq!(
            protocol.calls().last(),
            Some(&ProtocolCall::Finalize {
                request_id: request_id(1),
                response_id: response_id(1),
            })
        );
        assert_eq!(protocol.count("finalize"), 1);
    }

    #[tokio::test]
    async fn disputed_response_is_not_finalized() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor
            .enqueue(dispute_escalated(request_id(1), dispute_id(1), 103, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        actor.on_last_block_updated(10_000).await.unwrap();
        assert_eq!(protocol.count("finalize"), 0);
        assert_eq!(protocol.count("settle_dispute"), 0);
    }

    // --- Termination predicate ---

    #[tokio::test]
    async fn termination_requires_past_epoch_finalized_and_observed_block() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(request_finalized(request_id(1), None, 250, 0))
            .unwrap();
        actor.process_events().await.unwrap();

        // Block not observed yet.
        assert!(!actor.can_be_terminated(4, 300));

        actor.on_last_block_updated(300).await.unwrap();
        // Same epoch as the request.
        assert!(!actor.can_be_terminated(3, 300));
        // Later height not observed.
        assert!(!actor.can_be_terminated(4, 301));

        assert!(actor.can_be_terminated(4, 300));
    }

    #[tokio::test]
    async fn active_request_is_not_terminable() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor.on_last_block_updated(150).await.unwrap();

        assert!(!actor.can_be_terminated(10, 150));
    }

    #[tokio::test]
    async fn open_dispute_blocks_termination() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(response_proposed(request_id(1), response_id(1), 999, 101, 0))
            .unwrap();
        actor
            .enqueue(response_disputed(request_id(1), response_id(1), dispute_id(1), 102, 0))
            .unwrap();
        actor
            .enqueue(dispute_escalated(request_id(1), dispute_id(1), 103, 0))
            .unwrap();
        actor
            .enqueue(request_finalized(request_id(1), None, 250, 0))
            .unwrap();
        actor.process_events().await.unwrap();
        actor.on_last_block_updated(300).await.unwrap();

        assert!(!actor.can_be_terminated(4, 300));
    }

    #[tokio::test]
    async fn pending_events_block_termination() {
        let protocol = Arc::new(MockProtocol::new());
        let actor = created_actor(&protocol).await;
        actor
            .enqueue(request_finalized(request_id(1), None, 250, 0))
            .unwrap();
        actor.on_last_block_updated(300).await.unwrap();

        assert!(!actor.can_be_terminated(4, 300));
    }
}
