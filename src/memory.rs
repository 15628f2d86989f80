//! In-memory (centralized) root hash backend.
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use slog::{debug, error, info, o, warn, Logger};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, Sleep},
};
use tokio_util::sync::CancellationToken;

use crate::{
    block::{Block, HeaderType},
    commitment::{Commitment, OpaqueCommitment},
    common::{logger::get_logger, namespace::Namespace, process, time::insecure_posix_time},
    pubsub::{Broker, Subscription},
    registry::{Registry, Runtime},
    round::{NodeInfo, Round, State},
    scheduler::{Committee, CommitteeKind, Scheduler},
    Error, Event, PrunedBlock,
};

/// Maximum number of pending commit commands per runtime.
const COMMAND_BACKLOG: usize = 1000;

/// Sentinel timeout used while the round timer is disarmed.
const INFINITE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 3600);

fn far_future() -> Instant {
    Instant::now() + INFINITE_TIMEOUT
}

struct CommitCmd {
    commitment: Commitment,
    reply: oneshot::Sender<Result<(), Error>>,
}

/// Per-runtime state shared between the worker and the query API.
struct RuntimeState {
    logger: Logger,
    runtime_id: Namespace,
    /// The runtime's block chain, indexed by round number.
    blocks: RwLock<Vec<Block>>,
    block_notifier: Broker<Block>,
    event_notifier: Broker<Event>,
    /// Commit command channel; taken on shutdown so the worker drains
    /// and terminates.
    command_tx: Mutex<Option<mpsc::Sender<CommitCmd>>>,
}

impl RuntimeState {
    fn latest_block(&self) -> Result<Block, Error> {
        self.blocks
            .read()
            .unwrap()
            .last()
            .cloned()
            .ok_or(Error::NoSuchBlocks)
    }
}

/// Single-owner event loop advancing one runtime's rounds.
///
/// The worker is the only mutator of the round and the block chain; all
/// round-mutating events are serialized through its select loop.
struct RuntimeWorker {
    state: Arc<RuntimeState>,
    registry: Arc<dyn Registry>,
    all_block_notifier: Arc<Broker<Block>>,
    round_timeout: Duration,
    runtime: Runtime,
    round: Option<Round>,
}

impl RuntimeWorker {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<CommitCmd>, scheduler: Arc<dyn Scheduler>) {
        let mut committees = scheduler.watch_committees();

        let timer = time::sleep(INFINITE_TIMEOUT);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                committee = committees.recv() => {
                    let committee = match committee {
                        Some(committee) => committee,
                        None => {
                            debug!(self.state.logger, "worker: terminating, scheduler disappeared");
                            return;
                        }
                    };

                    // Ignore unrelated committees.
                    if committee.runtime_id != self.state.runtime_id {
                        continue;
                    }
                    if committee.kind != CommitteeKind::Compute {
                        continue;
                    }

                    self.on_new_committee(committee, timer.as_mut());
                }
                cmd = cmd_rx.recv() => {
                    let cmd = match cmd {
                        Some(cmd) => cmd,
                        None => return,
                    };
                    self.on_commit(cmd, timer.as_mut());
                }
                _ = &mut timer => {
                    warn!(self.state.logger, "worker: round timeout expired, forcing finalization");
                    self.round
                        .as_mut()
                        .expect("timer is only armed while a round is in progress")
                        .did_timeout = true;
                    self.try_finalize(true, timer.as_mut());
                }
            }
        }
    }

    fn on_new_committee(&mut self, committee: Committee, mut timer: Pin<&mut Sleep>) {
        // If the committee is the "same", ignore this.
        if let Some(round) = &self.round {
            if round.committee.valid_for == committee.valid_for {
                debug!(self.state.logger, "worker: duplicate committee or reschedule, ignoring";
                    "epoch" => committee.valid_for);
                return;
            }
        }

        let block = self.latest_block();
        info!(self.state.logger, "worker: new committee, transitioning round";
            "epoch" => committee.valid_for, "round" => block.header.round);

        // Stop and disarm the timer.
        timer.as_mut().reset(far_future());

        // Retrieve nodes for their runtime-specific information.
        let nodes = match self.registry.get_nodes() {
            Ok(nodes) => nodes,
            Err(err) => {
                error!(self.state.logger, "worker: new committee, failed to fetch nodes";
                    "err" => %err);
                process::abort();
            }
        };
        let mut computation_group = HashMap::new();
        for member in &committee.members {
            computation_group.insert(
                member.public_key,
                NodeInfo {
                    committee_node: member.clone(),
                    runtime: None,
                },
            );
        }
        for node in &nodes {
            if let Some(info) = computation_group.get_mut(&node.id) {
                info.runtime = node.get_runtime(&self.state.runtime_id).cloned();
            }
        }
        for (id, info) in &computation_group {
            if info.runtime.is_none() {
                warn!(self.state.logger, "worker: committee member without runtime descriptor";
                    "node_id" => %id);
            }
        }

        self.round = Some(Round::new(
            self.runtime.clone(),
            committee,
            computation_group,
            block.clone(),
        ));

        // Emit an empty epoch transition block in the new round. This is
        // required so that the clients can be sure what state is final
        // when an epoch transition occurs.
        self.emit_empty_block(&block, HeaderType::EpochTransition);

        // Update the runtime descriptor to pick up parameter changes.
        match self.registry.get_runtime(&self.state.runtime_id) {
            Ok(runtime) => self.runtime = runtime,
            Err(err) => {
                error!(self.state.logger, "worker: new committee, failed to update runtime";
                    "err" => %err);
                process::abort();
            }
        }
    }

    fn on_commit(&mut self, cmd: CommitCmd, timer: Pin<&mut Sleep>) {
        if self.round.is_none() {
            error!(self.state.logger, "worker: commitment received while no round in progress");
            let _ = cmd.reply.send(Err(Error::NoRoundInProgress));
            return;
        }

        let block = self.latest_block();

        // If the round was finalized, transition to a new round on top of
        // the new latest block, inheriting the installed committee.
        {
            let round = self.round.as_ref().expect("round is in progress");
            if round.is_finalized() || round.current_block != block {
                debug!(self.state.logger, "worker: round was finalized, transitioning round";
                    "round" => block.header.round);

                let committee = round.committee.clone();
                let computation_group = round.computation_group.clone();
                self.round = Some(Round::new(
                    self.runtime.clone(),
                    committee,
                    computation_group,
                    block,
                ));
            }
        }

        let round = self.round.as_mut().expect("round is in progress");
        match round.add_commitment(cmd.commitment) {
            Ok(()) => {
                // Acknowledge before finalization; a commit that crosses
                // the threshold observes the new block through the block
                // stream, not the reply.
                let _ = cmd.reply.send(Ok(()));
            }
            Err(err) => {
                debug!(self.state.logger, "worker: failed to add commitment to round";
                    "err" => %err);
                let _ = cmd.reply.send(Err(err));
                return;
            }
        }

        self.try_finalize(false, timer);
    }

    fn try_finalize(&mut self, forced: bool, mut timer: Pin<&mut Sleep>) {
        let block = self.latest_block();
        let block_nr = block.header.round;

        let round = self
            .round
            .as_mut()
            .expect("round must be in progress to finalize");
        let state = round.state();
        let num_commitments = round.num_commitments();
        let result = round.try_finalize(insecure_posix_time() as u64);

        match result {
            Ok(new_block) => {
                debug!(self.state.logger, "worker: finalized round"; "round" => block_nr);
                self.append_block(new_block);
                debug!(self.state.logger, "worker: disarming round timeout");
                timer.as_mut().reset(far_future());
            }
            Err(Error::StillWaiting) if forced => {
                if state == State::DiscrepancyWaitingCommitments {
                    // The discrepancy resolution round timed out; there is
                    // no further committee to escalate to, give up.
                    error!(self.state.logger, "worker: failed to finalize discrepancy committee on timeout";
                        "round" => block_nr, "num_commitments" => num_commitments);
                    self.emit_empty_block(&block, HeaderType::RoundFailed);
                    debug!(self.state.logger, "worker: disarming round timeout");
                    timer.as_mut().reset(far_future());
                    return;
                }

                error!(self.state.logger, "worker: failed to finalize committee on timeout";
                    "round" => block_nr, "num_commitments" => num_commitments);

                // Transition to the discrepancy state so the backup
                // workers process the round.
                let round = self.round.as_mut().expect("round is in progress");
                match round.force_backup_transition() {
                    Ok(()) => {
                        debug!(self.state.logger, "worker: (re-)arming round timeout");
                        timer.as_mut().reset(Instant::now() + self.round_timeout);
                    }
                    Err(err) => {
                        error!(self.state.logger, "worker: round failed";
                            "round" => block_nr, "err" => %err);
                        self.emit_empty_block(&block, HeaderType::RoundFailed);
                        debug!(self.state.logger, "worker: disarming round timeout");
                        timer.as_mut().reset(far_future());
                    }
                }
            }
            Err(Error::StillWaiting) => {
                let round = self.round.as_ref().expect("round is in progress");
                debug!(self.state.logger, "worker: insufficient commitments for finality, waiting";
                    "round" => block_nr,
                    "num_commitments" => round.num_commitments(),
                    "did_timeout" => round.did_timeout);

                // Push the deadline back on every commit that makes
                // forward progress, so that a slow trickle of commitments
                // still triggers escalation eventually.
                debug!(self.state.logger, "worker: (re-)arming round timeout");
                timer.as_mut().reset(Instant::now() + self.round_timeout);
            }
            Err(Error::DiscrepancyDetected(io_root)) => {
                warn!(self.state.logger, "worker: discrepancy detected";
                    "round" => block_nr, "io_root" => %io_root);

                self.state.event_notifier.broadcast(Event::DiscrepancyDetected {
                    io_root,
                    block_header: block.header.clone(),
                });

                // Re-arm the timer now rather than waiting for the first
                // backup commitment; there is no guarantee one arrives.
                debug!(self.state.logger, "worker: (re-)arming round timeout");
                timer.as_mut().reset(Instant::now() + self.round_timeout);
            }
            Err(err) => {
                // Something else went wrong, emit empty error block.
                error!(self.state.logger, "worker: round failed";
                    "round" => block_nr, "err" => %err);
                self.emit_empty_block(&block, HeaderType::RoundFailed);
                debug!(self.state.logger, "worker: disarming round timeout");
                timer.as_mut().reset(far_future());
            }
        }
    }

    fn emit_empty_block(&mut self, latest: &Block, header_type: HeaderType) {
        let block = Block::new_empty_block(latest, insecure_posix_time() as u64, header_type);
        if let Some(round) = self.round.as_mut() {
            round.populate_finalized_block(block.clone());
        }
        self.append_block(block);
    }

    fn append_block(&mut self, block: Block) {
        {
            let mut blocks = self.state.blocks.write().unwrap();
            blocks.push(block.clone());
        }

        // The global stream is notified first; within a runtime, blocks
        // are never reordered.
        self.all_block_notifier.broadcast(block.clone());
        self.state.block_notifier.broadcast(block);
    }

    fn latest_block(&self) -> Block {
        match self.state.latest_block() {
            Ok(block) => block,
            Err(err) => {
                error!(self.state.logger, "worker: failed to fetch latest block"; "err" => %err);
                process::abort();
            }
        }
    }
}

struct Inner {
    logger: Logger,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<dyn Registry>,
    runtimes: Mutex<HashMap<Namespace, Arc<RuntimeState>>>,
    /// If a runtime with one of these ids is registered, start with the
    /// given block as the genesis block. Other runtimes generate an
    /// "empty" genesis block.
    genesis_blocks: HashMap<Namespace, Block>,
    all_block_notifier: Arc<Broker<Block>>,
    prune_notifier: Broker<PrunedBlock>,
    round_timeout: Duration,
    /// Spawned task handles; taken exactly once by `cleanup`.
    workers: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Inner {
    fn get_runtime_state(&self, id: &Namespace) -> Result<Arc<RuntimeState>, Error> {
        self.runtimes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(Error::NoSuchRuntime)
    }
}

/// An in-memory root hash backend.
///
/// This backend is centralized: it keeps all chains and round state in
/// process memory, and a crash loses everything but the genesis blocks.
pub struct MemoryRootHash {
    inner: Arc<Inner>,
}

impl MemoryRootHash {
    /// Create a new in-memory root hash backend.
    ///
    /// Cancelling `ctx` stops runtime registration processing and shuts
    /// down all per-runtime workers; `cleanup` then waits for them to
    /// terminate.
    pub fn new(
        ctx: CancellationToken,
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<dyn Registry>,
        genesis_blocks: HashMap<Namespace, Block>,
        round_timeout: Duration,
    ) -> Self {
        let inner = Arc::new(Inner {
            logger: get_logger("roothash/memory"),
            scheduler,
            registry,
            runtimes: Mutex::new(HashMap::new()),
            genesis_blocks,
            all_block_notifier: Arc::new(Broker::new()),
            prune_notifier: Broker::new(),
            round_timeout,
            workers: Mutex::new(Some(Vec::new())),
        });

        let watcher = tokio::spawn(Self::watch_registrations(inner.clone(), ctx));
        inner
            .workers
            .lock()
            .unwrap()
            .as_mut()
            .expect("worker set is live at construction")
            .push(watcher);

        Self { inner }
    }

    async fn watch_registrations(inner: Arc<Inner>, ctx: CancellationToken) {
        let mut registrations = inner.registry.watch_runtimes();

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                runtime = registrations.recv() => {
                    let runtime = match runtime {
                        Some(runtime) => runtime,
                        None => break,
                    };
                    match Self::on_runtime_registration(&inner, runtime) {
                        Ok(()) => {}
                        Err(err) => {
                            debug!(inner.logger, "ignoring runtime registration"; "err" => %err);
                        }
                    }
                }
            }
        }

        // Close the command channels so every worker drains and
        // terminates.
        let runtimes = inner.runtimes.lock().unwrap();
        for state in runtimes.values() {
            state.command_tx.lock().unwrap().take();
        }
    }

    fn on_runtime_registration(inner: &Arc<Inner>, runtime: Runtime) -> Result<(), Error> {
        if !runtime.is_compute() {
            warn!(inner.logger, "worker: ignoring non-compute runtime";
                "runtime_id" => %runtime.id);
            return Ok(());
        }

        let mut runtimes = inner.runtimes.lock().unwrap();
        if runtimes.contains_key(&runtime.id) {
            return Err(Error::RuntimeExists);
        }

        // Create genesis block.
        let genesis_block = inner
            .genesis_blocks
            .get(&runtime.id)
            .cloned()
            .unwrap_or_else(|| Block::new_genesis_block(runtime.id, insecure_posix_time() as u64));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BACKLOG);
        let state = Arc::new(RuntimeState {
            logger: inner.logger.new(o!("runtime_id" => runtime.id.to_string())),
            runtime_id: runtime.id,
            blocks: RwLock::new(vec![genesis_block]),
            block_notifier: Broker::new(),
            event_notifier: Broker::new(),
            command_tx: Mutex::new(Some(command_tx)),
        });

        let worker = RuntimeWorker {
            state: state.clone(),
            registry: inner.registry.clone(),
            all_block_notifier: inner.all_block_notifier.clone(),
            round_timeout: inner.round_timeout,
            runtime: runtime.clone(),
            round: None,
        };
        let handle = tokio::spawn(worker.run(command_rx, inner.scheduler.clone()));
        if let Some(workers) = inner.workers.lock().unwrap().as_mut() {
            workers.push(handle);
        }

        runtimes.insert(runtime.id, state);
        debug!(inner.logger, "worker: runtime registered"; "runtime_id" => %runtime.id);

        Ok(())
    }

    /// Return the latest block for the given runtime.
    pub fn latest_block(&self, id: &Namespace) -> Result<Block, Error> {
        self.inner.get_runtime_state(id)?.latest_block()
    }

    /// Return the block produced in the given round.
    ///
    /// # Panics
    ///
    /// Panics if the stored block's round does not match its index; the
    /// chain index is no longer trustworthy at that point.
    pub fn block(&self, id: &Namespace, round: u64) -> Result<Block, Error> {
        let state = self.inner.get_runtime_state(id)?;
        let blocks = state.blocks.read().unwrap();
        let block = blocks.get(round as usize).ok_or(Error::NotFound)?;
        if block.header.round != round {
            panic!("roothash: inconsistent state");
        }

        Ok(block.clone())
    }

    /// Submit a commitment for the runtime's current round.
    ///
    /// Cancelling `cancel` abandons the wait for the reply; the commit
    /// itself may or may not have been applied.
    pub async fn commit(
        &self,
        id: &Namespace,
        commitment: OpaqueCommitment,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let state = self.inner.get_runtime_state(id)?;
        let commitment = Commitment::from_opaque(&commitment)?;

        let sender = state.command_tx.lock().unwrap().clone();
        let sender = sender.ok_or(Error::Canceled)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = CommitCmd {
            commitment,
            reply: reply_tx,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            result = sender.send(cmd) => {
                if result.is_err() {
                    return Err(Error::Canceled);
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Canceled),
            result = reply_rx => result.unwrap_or(Err(Error::Canceled)),
        }
    }

    /// Subscribe to the runtime's block stream.
    ///
    /// The latest block is replayed to the new subscriber before any live
    /// block.
    pub fn watch_blocks(&self, id: &Namespace) -> Result<Subscription<Block>, Error> {
        let state = self.inner.get_runtime_state(id)?;
        let subscription = state.block_notifier.subscribe_ex(|sender| {
            // Replay the latest block if it exists.
            if let Ok(block) = state.latest_block() {
                let _ = sender.send(block);
            }
        });

        Ok(subscription)
    }

    /// Subscribe to the runtime's block stream, replaying all retained
    /// blocks from the given round onward before any live block.
    pub fn watch_blocks_since(
        &self,
        id: &Namespace,
        round: u64,
    ) -> Result<Subscription<Block>, Error> {
        let state = self.inner.get_runtime_state(id)?;

        let mut found = false;
        let subscription = state.block_notifier.subscribe_ex(|sender| {
            let blocks = state.blocks.read().unwrap();
            if (round as usize) < blocks.len() {
                found = true;
                for block in &blocks[round as usize..] {
                    let _ = sender.send(block.clone());
                }
            }
        });
        if !found {
            return Err(Error::NotFound);
        }

        Ok(subscription)
    }

    /// Subscribe to the runtime's protocol events.
    pub fn watch_events(&self, id: &Namespace) -> Result<Subscription<Event>, Error> {
        let state = self.inner.get_runtime_state(id)?;

        Ok(state.event_notifier.subscribe())
    }

    /// Subscribe to finalized blocks across all runtimes.
    pub fn watch_all_blocks(&self) -> Subscription<Block> {
        self.inner.all_block_notifier.subscribe()
    }

    /// Subscribe to pruned block notifications.
    pub fn watch_pruned_blocks(&self) -> Subscription<PrunedBlock> {
        self.inner.prune_notifier.subscribe()
    }

    /// Wait for all per-runtime workers to terminate.
    ///
    /// Only the first call waits; subsequent calls return immediately.
    pub async fn cleanup(&self) {
        let workers = self.inner.workers.lock().unwrap().take();
        if let Some(workers) = workers {
            for worker in workers {
                let _ = worker.await;
            }
        }
    }
}
