//! Round state machine.
use std::collections::HashMap;

use crate::{
    block::{Block, Header, HeaderType},
    commitment::Commitment,
    common::crypto::{hash::Hash, signature::PublicKey},
    registry::{NodeRuntime, Runtime},
    scheduler::{Committee, CommitteeNode, Role},
    Error,
};

/// Round state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    WaitingCommitments,
    DiscrepancyWaitingCommitments,
}

/// Committee member enriched with the node's runtime-specific registry
/// metadata.
#[derive(Clone, Debug)]
pub(crate) struct NodeInfo {
    /// Scheduled committee membership.
    pub committee_node: CommitteeNode,
    /// Runtime-specific node metadata, if the node advertises the runtime.
    pub runtime: Option<NodeRuntime>,
}

/// State of a single round in progress.
///
/// A round takes the current latest block as its base and collects
/// commitments until it can produce the next block. Rounds are replaced,
/// not reused: epoch transitions, finalization and failure all cause the
/// worker to construct a fresh round.
pub(crate) struct Round {
    /// Runtime descriptor as of round construction.
    runtime: Runtime,
    /// Computation committee.
    pub committee: Committee,
    /// Computation group, keyed by node public key.
    pub computation_group: HashMap<PublicKey, NodeInfo>,
    /// Commitments from computation group nodes.
    commitments: HashMap<PublicKey, Commitment>,
    /// The block this round is based on.
    pub current_block: Block,
    /// Round state.
    state: State,
    /// Whether the round timer has expired at least once.
    pub did_timeout: bool,
    /// The block this round produced, if any.
    finalized_block: Option<Block>,
}

impl Round {
    /// Create a new round on top of the given block.
    pub fn new(
        runtime: Runtime,
        committee: Committee,
        computation_group: HashMap<PublicKey, NodeInfo>,
        current_block: Block,
    ) -> Self {
        Self {
            runtime,
            committee,
            computation_group,
            commitments: HashMap::new(),
            current_block,
            state: State::WaitingCommitments,
            did_timeout: false,
            finalized_block: None,
        }
    }

    /// Current round state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Number of commitments collected so far.
    pub fn num_commitments(&self) -> usize {
        self.commitments.len()
    }

    /// Returns true iff the round has already produced a block.
    pub fn is_finalized(&self) -> bool {
        self.finalized_block.is_some()
    }

    /// Record an externally produced block (epoch transition, failure) as
    /// this round's result.
    pub fn populate_finalized_block(&mut self, block: Block) {
        self.finalized_block = Some(block);
    }

    /// Validate and store a commitment.
    ///
    /// A later commitment from the same node overwrites the earlier one.
    pub fn add_commitment(&mut self, commitment: Commitment) -> Result<(), Error> {
        let node = self
            .computation_group
            .get(&commitment.node_id)
            .ok_or(Error::NotInComputationGroup)?;

        match (node.committee_node.role, self.state) {
            (Role::Worker, State::WaitingCommitments) => {}
            (Role::BackupWorker, State::DiscrepancyWaitingCommitments) => {}
            _ => return Err(Error::IncorrectRole),
        }

        let header = commitment.open()?;

        // Check if the proposed block is based on the current block.
        if header.round != self.current_block.header.round + 1
            || !self.current_block.header.is_parent_of(&header)
        {
            return Err(Error::NotBasedOnCorrectBlock);
        }

        self.commitments.insert(commitment.node_id, commitment);

        Ok(())
    }

    /// Try to finalize the round.
    ///
    /// On success the finalized block is returned; `StillWaiting` and
    /// `DiscrepancyDetected` are returned through the error channel. A
    /// detected discrepancy transitions the round to the discrepancy
    /// state as a side effect.
    pub fn try_finalize(&mut self, timestamp: u64) -> Result<Block, Error> {
        match self.state {
            State::WaitingCommitments => self.try_finalize_fast(timestamp),
            State::DiscrepancyWaitingCommitments => self.try_finalize_discrepancy(timestamp),
        }
    }

    /// Transition to the discrepancy state without a detected
    /// discrepancy (round timeout in the fast path).
    pub fn force_backup_transition(&mut self) -> Result<(), Error> {
        if self.state == State::DiscrepancyWaitingCommitments {
            return Err(Error::BackupAlreadyActive);
        }
        self.state = State::DiscrepancyWaitingCommitments;

        Ok(())
    }

    fn try_finalize_fast(&mut self, timestamp: u64) -> Result<Block, Error> {
        let mut proposed_header: Option<&Header> = None;
        let mut io_root: Option<Hash> = None;
        let mut agreeing = 0u64;

        // Check for discrepancies between the primary workers' results.
        // Committee member order keeps the reported I/O root deterministic.
        for member in &self.committee.members {
            if member.role != Role::Worker {
                continue;
            }
            let commitment = match self.commitments.get(&member.public_key) {
                Some(commitment) => commitment,
                None => continue,
            };

            if io_root.is_none() {
                io_root = Some(commitment.header.io_root);
            }

            match proposed_header {
                None => {
                    proposed_header = Some(&commitment.header);
                    agreeing = 1;
                }
                Some(header) if header == &commitment.header => agreeing += 1,
                Some(_) => {
                    // At least one node reported different results;
                    // activate the backup workers.
                    self.state = State::DiscrepancyWaitingCommitments;
                    return Err(Error::DiscrepancyDetected(
                        io_root.expect("io root recorded with the first commitment"),
                    ));
                }
            }
        }

        if agreeing < self.required_primary_count() {
            return Err(Error::StillWaiting);
        }

        let header = proposed_header
            .expect("threshold is at least one, so an agreeing header exists")
            .clone();
        Ok(self.finalize_block(header, timestamp))
    }

    fn try_finalize_discrepancy(&mut self, timestamp: u64) -> Result<Block, Error> {
        // Tally votes among the backup workers.
        let mut votes: HashMap<&Header, u64> = HashMap::new();
        for member in &self.committee.members {
            if member.role != Role::BackupWorker {
                continue;
            }
            let commitment = match self.commitments.get(&member.public_key) {
                Some(commitment) => commitment,
                None => continue,
            };

            *votes.entry(&commitment.header).or_insert(0) += 1;
        }

        let min_votes = self.backup_node_count() / 2 + 1;
        let winner = votes
            .into_iter()
            .filter(|&(_, count)| count >= min_votes)
            .map(|(header, _)| header.clone())
            .next();

        // Disagreement among the backup workers is not a second
        // discrepancy; keep waiting until a majority forms or the worker
        // gives up on timeout.
        match winner {
            Some(header) => Ok(self.finalize_block(header, timestamp)),
            None => Err(Error::StillWaiting),
        }
    }

    fn finalize_block(&mut self, proposed: Header, timestamp: u64) -> Block {
        let mut header = proposed;
        header.timestamp = timestamp;
        header.header_type = HeaderType::Normal;

        let block = Block { header };
        self.finalized_block = Some(block.clone());

        block
    }

    fn required_primary_count(&self) -> u64 {
        let required = self
            .runtime
            .replica_group_size
            .saturating_sub(self.runtime.replica_allowed_stragglers);
        required.max(1)
    }

    fn backup_node_count(&self) -> u64 {
        self.committee
            .members
            .iter()
            .filter(|member| member.role == Role::BackupWorker)
            .count() as u64
    }
}
