//! Transaction manager: the live UTXO index and pending queue
//!
//! All chain state sits behind one mutex. Submissions, block assembly,
//! root-chain events and reads all take it, so no two of them interleave
//! their validate→mutate sequences and every read sees a consistent state.
//! Work under the lock is in-memory only (hashing, accumulator folding,
//! map and queue updates).
//!
//! # Optimistic keying
//!
//! Outputs of a submitted transaction enter the index immediately, keyed
//! `(last_block + 1, queue position, output index)`, i.e. exactly where
//! the next block will put them. Assembly therefore only advances the chain
//! head; it never rewrites keys. Inputs must come from finalized blocks
//! (`block_index <= last_block`), so a pending output becomes spendable
//! once its block is assembled.
//!
//! # Root-chain updates
//!
//! Deposits and withdrawals change the index at once and are queued as
//! [`RootChainUpdate`]s next to the pending transactions. The next block
//! records and folds them, so a stored chain alone replays to the same index.

use crate::accumulator::Accumulator;
use crate::block::{Block, BlockPolicy, RootChainUpdate};
use crate::crypto::genesis_hash;
use crate::metrics::Metrics;
use crate::monitor::{DepositEvent, EventId, EventOutcome, WithdrawalEvent};
use crate::transaction::Transaction;
use crate::types::{
    Address, Hash256, LedgerEntry, Output, UtxoKey, DEPOSIT_TX_INDEX_BASE,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Unknown, stale and future-reference checks for one claimed entry
fn check_entry(
    index: &BTreeMap<UtxoKey, LedgerEntry>,
    last_block: u32,
    claimed: &LedgerEntry,
) -> Result<()> {
    let key = claimed.key();
    let indexed = index.get(&key).ok_or(Error::UnknownUtxo(key))?;

    if !indexed.same_claim(claimed) {
        return Err(Error::StaleInput(key));
    }

    if claimed.block_index > last_block {
        return Err(Error::FutureReference {
            key,
            block_index: claimed.block_index,
            last_block,
        });
    }

    Ok(())
}

/// State guarded by the manager's lock
#[derive(Debug)]
struct ChainState {
    utxo_index: BTreeMap<UtxoKey, LedgerEntry>,
    pending: Vec<Transaction>,
    pending_updates: Vec<RootChainUpdate>,
    last_block: u32,
    last_hash: Hash256,
    last_accumulator: Accumulator,
    processed_events: HashSet<EventId>,
    deposit_nonce: u32,
}

impl ChainState {
    fn genesis() -> Self {
        Self {
            utxo_index: BTreeMap::new(),
            pending: Vec::new(),
            pending_updates: Vec::new(),
            last_block: 0,
            last_hash: genesis_hash(),
            last_accumulator: Accumulator::genesis(),
            processed_events: HashSet::new(),
            deposit_nonce: 0,
        }
    }

    fn check_entry(&self, claimed: &LedgerEntry) -> Result<()> {
        check_entry(&self.utxo_index, self.last_block, claimed)
    }

    fn next_block(&self) -> Result<u32> {
        self.last_block.checked_add(1).ok_or_else(|| {
            Error::ChainLinkage(format!("block {} is the last block number", self.last_block))
        })
    }

    /// Check every input against the live index, in input order. Read-only.
    fn validate_against_ledger(&self, tx: &Transaction) -> Result<()> {
        tx.inputs.iter().try_for_each(|input| self.check_entry(input))
    }

    fn status(&self) -> ChainStatus {
        ChainStatus {
            last_block: self.last_block,
            last_hash: self.last_hash,
            pending_transactions: self.pending.len(),
            pending_updates: self.pending_updates.len(),
            utxo_count: self.utxo_index.len(),
        }
    }
}

/// Chain head summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Last assembled block number (0 at genesis)
    pub last_block: u32,
    /// Hash of the last assembled block (genesis hash at genesis)
    pub last_hash: Hash256,
    /// Transactions waiting for the next block
    pub pending_transactions: usize,
    /// Root-chain updates waiting for the next block
    pub pending_updates: usize,
    /// Entries in the UTXO index
    pub utxo_count: usize,
}

/// Complete manager state, pending queue included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Last assembled block number
    pub last_block: u32,
    /// Hash of the last assembled block
    pub last_hash: Hash256,
    /// Accumulator after the last assembled block
    pub last_accumulator: Accumulator,
    /// UTXO index in key order
    pub entries: Vec<LedgerEntry>,
    /// Pending queue in submission order
    pub pending: Vec<Transaction>,
    /// Root-chain updates not yet in a block, in application order
    pub pending_updates: Vec<RootChainUpdate>,
    /// Root-chain events already applied
    pub processed_events: Vec<EventId>,
    /// Next deposit nonce
    pub deposit_nonce: u32,
}

/// Owner of the live ledger state
#[derive(Debug)]
pub struct TransactionManager {
    state: Mutex<ChainState>,
    policy: BlockPolicy,
    metrics: Metrics,
}

impl TransactionManager {
    /// Manager at genesis
    pub fn new(policy: BlockPolicy) -> Self {
        Self::with_metrics(policy, Metrics::default())
    }

    /// Manager at genesis reporting into `metrics`
    pub fn with_metrics(policy: BlockPolicy, metrics: Metrics) -> Self {
        Self {
            state: Mutex::new(ChainState::genesis()),
            policy,
            metrics,
        }
    }

    /// Restore a manager from a snapshot
    pub fn from_snapshot(snapshot: ChainSnapshot, policy: BlockPolicy, metrics: Metrics) -> Result<Self> {
        let mut utxo_index = BTreeMap::new();
        for entry in snapshot.entries {
            if utxo_index.insert(entry.key(), entry).is_some() {
                return Err(Error::Storage(format!(
                    "snapshot holds UTXO {} twice",
                    entry.key()
                )));
            }
        }

        let state = ChainState {
            utxo_index,
            pending: snapshot.pending,
            pending_updates: snapshot.pending_updates,
            last_block: snapshot.last_block,
            last_hash: snapshot.last_hash,
            last_accumulator: snapshot.last_accumulator,
            processed_events: snapshot.processed_events.into_iter().collect(),
            deposit_nonce: snapshot.deposit_nonce,
        };
        metrics.set_sizes(state.utxo_index.len(), state.pending.len());

        tracing::info!(
            last_block = state.last_block,
            utxo_count = state.utxo_index.len(),
            pending = state.pending.len(),
            "Restored chain state from snapshot"
        );

        Ok(Self {
            state: Mutex::new(state),
            policy,
            metrics,
        })
    }

    /// Block construction policy
    pub fn policy(&self) -> &BlockPolicy {
        &self.policy
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validate `tx` and admit it to the pending queue.
    ///
    /// Spends its inputs and inserts its outputs at their next-block keys.
    /// On error nothing changes.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        let mut state = self.state.lock();

        let checked = tx
            .validate()
            .and_then(|()| state.validate_against_ledger(&tx))
            .and_then(|()| state.next_block());
        let block_index = match checked {
            Ok(block_index) => block_index,
            Err(e) => {
                self.metrics.record_rejected();
                tracing::debug!(tx_hash = %tx.hash(), error = %e, "Transaction rejected");
                return Err(e);
            }
        };

        for input in &tx.inputs {
            state.utxo_index.remove(&input.key());
        }

        let tx_index = state.pending.len() as u32;
        for (i, output) in tx.outputs.iter().enumerate() {
            let entry = LedgerEntry::new(*output, UtxoKey::new(block_index, tx_index, i as u8));
            state.utxo_index.insert(entry.key(), entry);
        }

        tracing::debug!(
            tx_hash = %tx.hash(),
            block_index,
            tx_index,
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            "Transaction accepted"
        );

        state.pending.push(tx);
        self.metrics
            .record_accepted(state.utxo_index.len(), state.pending.len());

        Ok(())
    }

    /// Turn the pending queue and root-chain updates into the next block
    /// and advance the head.
    ///
    /// A failed construction leaves head, accumulator and queues untouched,
    /// so the call can simply be retried.
    pub fn assemble_block(&self) -> Result<Block> {
        let started = Instant::now();
        let mut state = self.state.lock();

        let built = state.next_block().and_then(|number| {
            Block::with_updates(
                number,
                state.last_hash,
                &state.last_accumulator,
                state.pending.clone(),
                state.pending_updates.clone(),
                &self.policy,
            )
        });
        let block = match built {
            Ok(block) => block,
            Err(e) => {
                self.metrics.record_assembly_failure();
                return Err(e);
            }
        };

        state.last_block = block.number;
        state.last_hash = block.hash();
        state.last_accumulator = block.accumulator.clone();
        state.pending.clear();
        state.pending_updates.clear();

        self.metrics
            .record_block_assembled(started.elapsed().as_secs_f64(), state.utxo_index.len());
        tracing::info!(
            number = block.number,
            hash = %block.hash(),
            transactions = block.transactions.len(),
            updates = block.updates.len(),
            "Block assembled"
        );

        Ok(block)
    }

    /// Re-apply a stored block on top of restored state.
    ///
    /// The block must continue the head and start with the restored pending
    /// updates and transactions, whose effects are already in the index. The
    /// remaining updates are applied in order, then the remaining
    /// transactions are validated and applied at their block keys. The block
    /// is rebuilt from the current accumulator and must reproduce its hash.
    /// All or nothing.
    pub fn replay_block(&self, block: &Block) -> Result<()> {
        let mut state = self.state.lock();

        if Some(block.number) != state.last_block.checked_add(1)
            || block.previous_hash != state.last_hash
        {
            return Err(Error::ChainLinkage(format!(
                "block {} does not continue head {} ({})",
                block.number, state.last_block, state.last_hash
            )));
        }

        let queued = state.pending.len();
        if block.transactions.get(..queued) != Some(state.pending.as_slice()) {
            return Err(Error::ChainLinkage(format!(
                "block {} does not start with the {} pending transactions",
                block.number, queued
            )));
        }
        let applied = state.pending_updates.len();
        if block.updates.get(..applied) != Some(state.pending_updates.as_slice()) {
            return Err(Error::ChainLinkage(format!(
                "block {} does not start with the {} pending root-chain updates",
                block.number, applied
            )));
        }

        let rebuilt = Block::with_updates(
            block.number,
            state.last_hash,
            &state.last_accumulator,
            block.transactions.clone(),
            block.updates.clone(),
            &BlockPolicy { allow_empty: true },
        )?;
        if rebuilt.hash() != block.hash() {
            return Err(Error::ChainLinkage(format!(
                "block {} does not rebuild to its hash",
                block.number
            )));
        }

        // Recovery path only; work on copies to stay all-or-nothing
        let mut index = state.utxo_index.clone();
        let mut processed = state.processed_events.clone();
        let mut deposit_nonce = state.deposit_nonce;

        for update in &block.updates[applied..] {
            let event_id = update.event_id();
            if !processed.insert(event_id) {
                return Err(Error::ChainLinkage(format!(
                    "block {} repeats root-chain event {}",
                    block.number, event_id
                )));
            }

            match update {
                RootChainUpdate::Deposit { entry, .. } => {
                    let key = entry.key();
                    if !key.is_deposit() || index.contains_key(&key) {
                        return Err(Error::ChainLinkage(format!(
                            "block {} credits deposit at unusable key {}",
                            block.number, key
                        )));
                    }
                    index.insert(key, *entry);
                    let next_nonce = (key.tx_index - DEPOSIT_TX_INDEX_BASE).saturating_add(1);
                    deposit_nonce = deposit_nonce.max(next_nonce);
                }
                RootChainUpdate::Withdrawal { entry, .. } => {
                    check_entry(&index, state.last_block, entry)?;
                    index.remove(&entry.key());
                }
            }
        }

        for (tx_index, tx) in block.transactions.iter().enumerate().skip(queued) {
            tx.validate()?;
            for input in &tx.inputs {
                check_entry(&index, state.last_block, input)?;
                index.remove(&input.key());
            }
            for (i, output) in tx.outputs.iter().enumerate() {
                let key = UtxoKey::new(block.number, tx_index as u32, i as u8);
                index.insert(key, LedgerEntry::new(*output, key));
            }
        }

        state.utxo_index = index;
        state.processed_events = processed;
        state.deposit_nonce = deposit_nonce;
        state.last_block = block.number;
        state.last_hash = block.hash();
        state.last_accumulator = block.accumulator.clone();
        state.pending.clear();
        state.pending_updates.clear();
        self.metrics.set_sizes(state.utxo_index.len(), 0);

        tracing::info!(
            number = block.number,
            transactions = block.transactions.len(),
            updates = block.updates.len(),
            "Block replayed"
        );

        Ok(())
    }

    /// Credit a root-chain deposit.
    ///
    /// The entry is keyed in the deposit range of the last finalized block,
    /// so it is spendable at once, and folded into the next block. Replays of
    /// the same event are no-ops.
    pub fn apply_deposit(&self, event: &DepositEvent) -> Result<EventOutcome> {
        let mut state = self.state.lock();

        if state.processed_events.contains(&event.event_id) {
            tracing::warn!(event_id = %event.event_id, "Deposit already processed");
            return Ok(EventOutcome::AlreadyProcessed);
        }
        if !event.slice.is_well_formed() {
            return Err(Error::Structural(format!(
                "deposit {} has malformed slice {}",
                event.event_id, event.slice
            )));
        }

        let tx_index = DEPOSIT_TX_INDEX_BASE
            .checked_add(state.deposit_nonce)
            .ok_or_else(|| Error::ChainLinkage("deposit index space exhausted".to_string()))?;

        let entry = LedgerEntry::new(
            Output::new(event.owner, event.slice),
            UtxoKey::new(state.last_block, tx_index, 0),
        );
        state.utxo_index.insert(entry.key(), entry);
        state.deposit_nonce += 1;
        state.processed_events.insert(event.event_id);
        state.pending_updates.push(RootChainUpdate::Deposit {
            event_id: event.event_id,
            entry,
        });

        self.metrics.record_root_chain_event(state.utxo_index.len());
        tracing::info!(
            event_id = %event.event_id,
            key = %entry.key(),
            owner = %event.owner,
            slice = %event.slice,
            "Deposit credited"
        );

        Ok(EventOutcome::Deposited(entry))
    }

    /// Remove an entry exited on the root chain.
    ///
    /// The entry must match the index exactly and come from a finalized
    /// block. Its spend is folded into the next block. Replays of the same
    /// event are no-ops.
    pub fn apply_withdrawal(&self, event: &WithdrawalEvent) -> Result<EventOutcome> {
        let mut state = self.state.lock();

        if state.processed_events.contains(&event.event_id) {
            tracing::warn!(event_id = %event.event_id, "Withdrawal already processed");
            return Ok(EventOutcome::AlreadyProcessed);
        }

        state.check_entry(&event.entry)?;
        state.utxo_index.remove(&event.entry.key());
        state.processed_events.insert(event.event_id);
        state.pending_updates.push(RootChainUpdate::Withdrawal {
            event_id: event.event_id,
            entry: event.entry,
        });

        self.metrics.record_root_chain_event(state.utxo_index.len());
        tracing::info!(
            event_id = %event.event_id,
            key = %event.entry.key(),
            "Withdrawal applied"
        );

        Ok(EventOutcome::Withdrawn(event.entry))
    }

    /// Entries owned by `owner`, in key order
    pub fn list_entries_for_owner(&self, owner: &Address) -> Vec<LedgerEntry> {
        let state = self.state.lock();
        state
            .utxo_index
            .values()
            .filter(|entry| entry.output.owner == *owner)
            .copied()
            .collect()
    }

    /// Entry under `key`, if unspent
    pub fn get_entry(&self, key: &UtxoKey) -> Option<LedgerEntry> {
        self.state.lock().utxo_index.get(key).copied()
    }

    /// Chain head summary
    pub fn status(&self) -> ChainStatus {
        self.state.lock().status()
    }

    /// Accumulator after the last assembled block
    pub fn last_accumulator(&self) -> Accumulator {
        self.state.lock().last_accumulator.clone()
    }

    /// Consistent copy of the full state
    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.lock();
        let mut processed_events: Vec<EventId> = state.processed_events.iter().copied().collect();
        processed_events.sort();

        ChainSnapshot {
            last_block: state.last_block,
            last_hash: state.last_hash,
            last_accumulator: state.last_accumulator.clone(),
            entries: state.utxo_index.values().copied().collect(),
            pending: state.pending.clone(),
            pending_updates: state.pending_updates.clone(),
            processed_events,
            deposit_nonce: state.deposit_nonce,
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(BlockPolicy::default())
    }
}
