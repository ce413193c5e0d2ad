//! The reconciliation loop.
//!
//! Each tick reads the chain up to its last finalized block, fans the new
//! events out to one actor per request, lets every actor drain its queue and
//! react to the new height, evicts the ones that are done, and finally asks
//! the protocol to create the requests the current epoch is still missing.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument, Span};

use ebo_common::{
    ActorRequest, Address, AgentConfig, ChainId, EboEvent, EventMetadata, Request, RequestId,
};

use crate::actor::{ActorDeps, ActorError, EboActor, TerminateHook};
use crate::actors_manager::EboActorsManager;
use crate::errors::StrategyTable;
use crate::notify::{ErrorContext, Notifier};
use crate::protocol::{BlockNumberService, ProtocolError, ProtocolProvider};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("processor already started")]
    ProcessorAlreadyStarted,

    #[error("accounting module {accounting_module} is missing approval for {pending:?}")]
    PendingModulesApproval {
        accounting_module: Address,
        approved: Vec<Address>,
        pending: Vec<Address>,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("processor task failed: {0}")]
    TaskFailed(String),
}

impl ProcessorError {
    /// Errors that stop the loop instead of just aborting one tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Modules the accounting extension must have approved before the loop starts.
    pub required_modules: Vec<Address>,
    pub max_event_attempts: u32,
}

impl From<&AgentConfig> for ProcessorConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            required_modules: config.accounting_required_modules.clone(),
            max_event_attempts: config.max_event_attempts,
        }
    }
}

/// Stats from one sync tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub events_fetched: u64,
    pub requests_synced: u64,
    pub actors_created: u64,
    pub actors_terminated: u64,
    pub request_failures: u64,
    pub missing_requests_created: u64,
    pub missing_request_failures: u64,
    pub ticks_skipped: u64,
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events_fetched={} requests_synced={} actors_created={} actors_terminated={} request_failures={} missing_requests_created={} missing_request_failures={} ticks_skipped={}",
            self.events_fetched, self.requests_synced, self.actors_created,
            self.actors_terminated, self.request_failures,
            self.missing_requests_created, self.missing_request_failures,
            self.ticks_skipped,
        )
    }
}

struct ProcessorState {
    /// Last block whose events were fetched. `None` until the first tick.
    last_checked_block: Option<u64>,
    actors: EboActorsManager,
    /// (epoch, chain) pairs already sent to `create_request`, awaiting their event.
    requested: HashSet<(u64, ChainId)>,
}

/// Owner's handle on a started processor.
///
/// Dropping the handle stops the loop at its next wake-up.
pub struct ProcessorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), ProcessorError>>,
}

impl ProcessorHandle {
    /// Cancel the schedule. A tick already in flight runs to completion.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the loop to end. Returns the fatal error that stopped it, if any.
    pub async fn join(self) -> Result<(), ProcessorError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ProcessorError::TaskFailed(e.to_string())),
        }
    }
}

pub struct EboProcessor {
    config: ProcessorConfig,
    protocol: Arc<dyn ProtocolProvider>,
    notifier: Arc<Notifier>,
    deps: ActorDeps,
    state: Mutex<ProcessorState>,
    running: AtomicBool,
    span: Span,
}

impl EboProcessor {
    pub fn new(
        config: ProcessorConfig,
        protocol: Arc<dyn ProtocolProvider>,
        block_number_service: Arc<dyn BlockNumberService>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let deps = ActorDeps::builder()
            .protocol(protocol.clone())
            .block_number_service(block_number_service)
            .notifier(notifier.clone())
            .max_event_attempts(config.max_event_attempts)
            .build();

        Self {
            config,
            protocol,
            notifier,
            deps,
            state: Mutex::new(ProcessorState {
                last_checked_block: None,
                actors: EboActorsManager::new(),
                requested: HashSet::new(),
            }),
            running: AtomicBool::new(false),
            span: info_span!("ebo_processor"),
        }
    }

    /// Resume from a known watermark instead of the current epoch's first block.
    pub fn with_last_checked_block(mut self, block_number: u64) -> Self {
        self.state.get_mut().last_checked_block = Some(block_number);
        self
    }

    /// Replace the default protocol error strategies.
    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.deps.strategies = Arc::new(strategies);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn last_checked_block(&self) -> Option<u64> {
        self.state.lock().await.last_checked_block
    }

    pub async fn get_actor(&self, request_id: &RequestId) -> Option<Arc<EboActor>> {
        self.state.lock().await.actors.get_actor(request_id)
    }

    pub async fn actor_requests(&self) -> Vec<ActorRequest> {
        self.state.lock().await.actors.get_actors_requests()
    }

    // --- Lifecycle ---

    /// Check module approvals, run one tick, then keep ticking every `interval`.
    pub async fn start(self: &Arc<Self>, interval: Duration) -> Result<ProcessorHandle, ProcessorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProcessorError::ProcessorAlreadyStarted);
        }

        let first_tick = async {
            self.check_modules_approval().await?;
            info!(interval_ms = interval.as_millis() as u64, "Processor starting");
            self.tick().await
        }
        .instrument(self.span.clone())
        .await;

        if let Err(err) = first_tick {
            self.running.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let processor = Arc::clone(self);
        let span = self.span.clone();

        let task = tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(err) = processor.tick().await {
                                processor.running.store(false, Ordering::SeqCst);
                                return Err(err);
                            }
                        }
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }

                processor.running.store(false, Ordering::SeqCst);
                info!("Processor stopped");
                Ok(())
            }
            .instrument(span),
        );

        Ok(ProcessorHandle { stop_tx, task })
    }

    /// Fail with `PendingModulesApproval` unless every required module is approved.
    pub async fn check_modules_approval(&self) -> Result<(), ProcessorError> {
        let approved_modules = self.protocol.get_accounting_approved_modules().await?;

        let (approved, pending): (Vec<Address>, Vec<Address>) = self
            .config
            .required_modules
            .iter()
            .cloned()
            .partition(|module| approved_modules.contains(module));

        if !pending.is_empty() {
            let accounting_module = self.protocol.get_accounting_module_address().await?;
            error!(
                %accounting_module,
                approved = approved.len(),
                pending = pending.len(),
                "Required modules are not approved"
            );
            return Err(ProcessorError::PendingModulesApproval {
                accounting_module,
                approved,
                pending,
            });
        }

        info!(modules = approved.len(), "All required modules approved");
        Ok(())
    }

    /// Run one sync, keeping only fatal errors.
    async fn tick(&self) -> Result<(), ProcessorError> {
        match self.sync().await {
            Ok(stats) => {
                info!("Sync complete. {stats}");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "Fatal processor error, stopping");
                self.notifier
                    .notify_error(&err, &ErrorContext::action("sync"))
                    .await;
                Err(err)
            }
            Err(err) => {
                error!(error = %err, "Sync failed, retrying on next tick");
                Ok(())
            }
        }
    }

    // --- Sync ---

    /// One reconciliation pass. The watermark only moves when the pass gets
    /// past the per-request phase.
    pub async fn sync(&self) -> Result<SyncStats, ProcessorError> {
        self.sync_inner().instrument(self.span.clone()).await
    }

    async fn sync_inner(&self) -> Result<SyncStats, ProcessorError> {
        let mut state = self.state.lock().await;
        let mut stats = SyncStats::default();

        let epoch = self.protocol.get_current_epoch().await?;
        let finalized = self.protocol.get_last_finalized_block().await?;

        let from = match state.last_checked_block {
            None => {
                info!(
                    epoch = epoch.number,
                    block = epoch.first_block_number,
                    "First sync: starting from the current epoch's first block"
                );
                epoch.first_block_number
            }
            Some(watermark) if finalized < watermark => {
                // Lagging RPC node: wait for it to catch up.
                warn!(
                    finalized,
                    watermark,
                    "Last finalized block is behind the watermark, skipping tick"
                );
                stats.ticks_skipped = 1;
                return Ok(stats);
            }
            Some(watermark) => watermark + 1,
        };

        let events = if from <= finalized {
            self.protocol.get_events(from, finalized).await?
        } else {
            Vec::new()
        };
        stats.events_fetched = events.len() as u64;
        info!(
            epoch = epoch.number,
            from,
            to = finalized,
            events = events.len(),
            "Fetched events"
        );

        let mut batches: BTreeMap<RequestId, Vec<EboEvent>> = BTreeMap::new();
        for event in events {
            batches.entry(event.request_id.clone()).or_default().push(event);
        }
        for batch in batches.values_mut() {
            batch.sort_by_key(EboEvent::key);
        }

        let available: BTreeSet<ChainId> = self
            .protocol
            .get_available_chains()
            .await?
            .into_iter()
            .collect();

        let mut synchable: BTreeSet<RequestId> = batches.keys().cloned().collect();
        synchable.extend(state.actors.get_request_ids());

        let mut work = Vec::with_capacity(synchable.len());
        for request_id in synchable {
            let events = batches.remove(&request_id).unwrap_or_default();
            let actor = match state.actors.get_actor(&request_id) {
                Some(actor) => actor,
                None => {
                    let Some(actor) =
                        self.create_actor(&mut state.actors, &request_id, &events, &available)
                    else {
                        continue;
                    };
                    stats.actors_created += 1;
                    actor
                }
            };
            work.push(sync_actor(actor, events, epoch.number, finalized));
        }

        for (actor, result) in join_all(work).await {
            let request_id = actor.actor_request().id.clone();
            stats.requests_synced += 1;

            match result {
                Ok(false) => {}
                Ok(true) => {
                    info!(%request_id, "Actor settled, evicting");
                    state.actors.delete_actor(&request_id);
                    stats.actors_terminated += 1;
                }
                Err(err) => {
                    stats.request_failures += 1;
                    error!(%request_id, error = %err, "Request sync failed");
                    let context = ErrorContext::action("sync_request").with_request(request_id.clone());
                    self.notifier.notify_error(&err, &context).await;

                    if actor.can_be_terminated(epoch.number, finalized) || !err.is_retryable() {
                        warn!(%request_id, "Evicting failed actor");
                        state.actors.delete_actor(&request_id);
                        stats.actors_terminated += 1;
                    }
                }
            }
        }

        state.last_checked_block = Some(finalized);

        let live = state.actors.get_actors_requests();
        state.requested.retain(|(requested_epoch, _)| *requested_epoch == epoch.number);
        for request in &live {
            state.requested.remove(&(request.epoch, request.chain_id.clone()));
        }

        let covered: HashSet<&ChainId> = live
            .iter()
            .filter(|request| request.epoch == epoch.number)
            .map(|request| &request.chain_id)
            .collect();
        let missing: Vec<ChainId> = available
            .iter()
            .filter(|chain_id| !covered.contains(chain_id))
            .filter(|chain_id| !state.requested.contains(&(epoch.number, (*chain_id).clone())))
            .cloned()
            .collect();

        for chain_id in missing {
            match self.protocol.create_request(epoch.number, &chain_id).await {
                Ok(()) => {
                    info!(%chain_id, epoch = epoch.number, "Created missing request");
                    stats.missing_requests_created += 1;
                    state.requested.insert((epoch.number, chain_id));
                }
                Err(err) => {
                    warn!(%chain_id, epoch = epoch.number, error = %err, "Failed to create missing request, retrying on next tick");
                    stats.missing_request_failures += 1;
                }
            }
        }

        Ok(stats)
    }

    /// A new actor for a request seen for the first time, or `None` when its
    /// events are dropped.
    fn create_actor(
        &self,
        actors: &mut EboActorsManager,
        request_id: &RequestId,
        events: &[EboEvent],
        available: &BTreeSet<ChainId>,
    ) -> Option<Arc<EboActor>> {
        let first = events.first()?;

        let EventMetadata::RequestCreated {
            chain_id, epoch, ..
        } = &first.metadata
        else {
            warn!(
                %request_id,
                event = first.name(),
                dropped = events.len(),
                "No actor and first event is not RequestCreated, dropping events"
            );
            return None;
        };

        if !available.contains(chain_id) {
            warn!(%request_id, %chain_id, "Unsupported chain, dropping request");
            return None;
        }

        let actor_request = ActorRequest {
            id: request_id.clone(),
            epoch: *epoch,
            chain_id: chain_id.clone(),
        };

        match actors.create_actor(actor_request, self.deps.clone(), terminate_hook()) {
            Ok(actor) => Some(actor),
            Err(err) => {
                warn!(%request_id, error = %err, "Failed to create actor");
                None
            }
        }
    }
}

/// Feed one actor its events and the new height. Returns whether the actor
/// can be evicted.
async fn sync_actor(
    actor: Arc<EboActor>,
    events: Vec<EboEvent>,
    current_epoch: u64,
    last_finalized_block: u64,
) -> (Arc<EboActor>, Result<bool, ActorError>) {
    let result = async {
        for event in events {
            let key = event.key();
            if let Err(err) = actor.enqueue(event) {
                warn!(request_id = %actor.actor_request().id, %key, error = %err, "Dropping event");
            }
        }

        actor.process_events().await?;
        actor.on_last_block_updated(last_finalized_block).await?;
        Ok(actor.can_be_terminated(current_epoch, last_finalized_block))
    }
    .await;

    (actor, result)
}

fn terminate_hook() -> TerminateHook {
    Arc::new(|request: &Request| -> anyhow::Result<()> {
        info!(request_id = %request.id, "Request finalized on chain");
        Ok(())
    })
}
