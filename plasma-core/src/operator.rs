//! Operator node orchestration layer
//!
//! This module ties together storage, the transaction manager, the
//! accumulator history and the publisher and monitor tasks into one
//! high-level API.
//!
//! # Example
//!
//! ```no_run
//! use plasma_core::{Config, Operator};
//!
//! #[tokio::main]
//! async fn main() -> plasma_core::Result<()> {
//!     let operator = Operator::open(Config::default()).await?;
//!
//!     // let tx = ...;
//!     // operator.submit_transaction(tx)?;
//!
//!     operator.shutdown().await
//! }
//! ```

use crate::{
    accumulator::{
        Accumulator, AccumulatorElement, AccumulatorHistory, HistorySegment, MembershipWitness,
        NonMembershipWitness,
    },
    block::Block,
    manager::{ChainSnapshot, ChainStatus, TransactionManager},
    monitor::{spawn_monitor, EventOutcome, MonitorHandle, RootChainEvent},
    publisher::{spawn_publisher, PublisherHandle},
    storage::BlockStore,
    transaction::Transaction,
    types::{Address, LedgerEntry, UtxoKey},
    Config, Error, Metrics, Result, Storage,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Accumulator witness together with the state it is valid against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorProof<W> {
    /// Block whose accumulator the witness refers to
    pub block: u32,
    /// Accumulator value after that block
    pub accumulator: Accumulator,
    /// Block the proof covers history after
    pub since: u32,
    /// Accumulator value after `since`
    pub since_accumulator: Accumulator,
    /// The witness
    pub witness: W,
}

/// Running operator node
pub struct Operator {
    manager: Arc<TransactionManager>,
    history: Arc<RwLock<AccumulatorHistory>>,
    storage: Option<Arc<Storage>>,
    publisher: PublisherHandle,
    monitor: MonitorHandle,
    blocks: broadcast::Sender<Block>,
    tasks: Vec<JoinHandle<()>>,
    config: Config,
}

impl Operator {
    /// Open operator with configuration
    ///
    /// Restores the newest snapshot (or genesis), replays stored blocks
    /// after it, rebuilds the accumulator history and starts the tasks.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        let policy = config.chain.block_policy();

        let storage = if config.persistence_enabled {
            Some(Arc::new(Storage::open(&config)?))
        } else {
            None
        };

        let snapshot = match &storage {
            Some(storage) => storage.latest_snapshot()?,
            None => None,
        };
        let manager = match snapshot {
            Some(snapshot) => TransactionManager::from_snapshot(snapshot, policy, metrics)?,
            None => TransactionManager::with_metrics(policy, metrics),
        };

        let mut history = AccumulatorHistory::with_retention(
            Accumulator::genesis(),
            config.accumulator.retain_blocks,
        );
        if let Some(storage) = &storage {
            Self::recover(&manager, &mut history, storage)?;
        }

        let manager = Arc::new(manager);
        let history = Arc::new(RwLock::new(history));
        let (blocks, _) = broadcast::channel(config.chain.broadcast_capacity);

        let (publisher, publisher_task) = spawn_publisher(
            Arc::clone(&manager),
            storage.clone().map(|s| s as Arc<dyn BlockStore>),
            Arc::clone(&history),
            blocks.clone(),
            &config,
        );
        let (monitor, monitor_task) =
            spawn_monitor(Arc::clone(&manager), config.monitor.channel_capacity);

        let status = manager.status();
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            last_block = status.last_block,
            last_hash = %status.last_hash,
            utxo_count = status.utxo_count,
            persistence = storage.is_some(),
            "Operator started"
        );

        Ok(Self {
            manager,
            history,
            storage,
            publisher,
            monitor,
            blocks,
            tasks: vec![publisher_task, monitor_task],
            config,
        })
    }

    /// Walk stored blocks: check linkage, rebuild history, replay past the snapshot
    fn recover(
        manager: &TransactionManager,
        history: &mut AccumulatorHistory,
        storage: &Storage,
    ) -> Result<()> {
        let restored_head = manager.status().last_block;
        let mut previous: Option<Block> = None;

        for block in storage.iter_blocks(1)? {
            block.verify_linkage(previous.as_ref())?;
            history.ingest(&block)?;
            if block.number > restored_head {
                manager.replay_block(&block)?;
            }
            previous = Some(block);
        }

        let head = manager.status().last_block;
        if history.last_block() != head {
            return Err(Error::Storage(format!(
                "stored blocks end at {} but restored state is at block {}",
                history.last_block(),
                head
            )));
        }

        Ok(())
    }

    /// Validate and queue a transaction for the next block
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        self.manager.submit_transaction(tx)
    }

    /// Entries owned by `owner`, in key order
    pub fn list_entries_for_owner(&self, owner: &Address) -> Vec<LedgerEntry> {
        self.manager.list_entries_for_owner(owner)
    }

    /// Entry under `key`, if unspent
    pub fn get_entry(&self, key: &UtxoKey) -> Option<LedgerEntry> {
        self.manager.get_entry(key)
    }

    /// Chain head summary
    pub fn status(&self) -> ChainStatus {
        self.manager.status()
    }

    /// Consistent copy of the manager state
    pub fn snapshot(&self) -> ChainSnapshot {
        self.manager.snapshot()
    }

    /// Stored block by number
    pub fn get_block(&self, number: u32) -> Result<Block> {
        match &self.storage {
            Some(storage) => storage.get_block(number),
            None => Err(Error::BlockNotFound(number)),
        }
    }

    /// Assemble and publish a block without waiting for the next tick
    pub async fn publish_now(&self) -> Result<Block> {
        self.publisher.publish_now().await
    }

    /// Apply a root-chain event and wait for the outcome
    pub async fn apply_event(&self, event: RootChainEvent) -> Result<EventOutcome> {
        self.monitor.apply(event).await
    }

    /// Handle for the root-chain watcher
    pub fn root_chain_events(&self) -> MonitorHandle {
        self.monitor.clone()
    }

    /// Receive every block published from now on
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.blocks.subscribe()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        self.manager.metrics()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Proof that `entry` was created, as of the latest published block
    pub fn prove_created(&self, entry: &LedgerEntry) -> Result<AccumulatorProof<MembershipWitness>> {
        // Outputs are folded by the block they are keyed at, deposits by the next one
        let since = if entry.key().is_deposit() {
            entry.block_index
        } else {
            entry.block_index.saturating_sub(1)
        };
        let element = AccumulatorElement::Created(*entry);
        self.prove(
            |history| since.max(history.checkpoint()),
            |segment| segment.prove_membership(&element),
        )
    }

    /// Proof that `entry` was spent, as of the latest published block
    pub fn prove_spent(&self, entry: &LedgerEntry) -> Result<AccumulatorProof<MembershipWitness>> {
        let element = AccumulatorElement::Spent(*entry);
        self.prove(
            |history| entry.block_index.max(history.checkpoint()),
            |segment| segment.prove_membership(&element),
        )
    }

    /// Proof that `entry` was not spent or withdrawn, as of the latest
    /// published block.
    ///
    /// Anchored at the entry's own block: no spend can be folded earlier.
    pub fn prove_unspent(
        &self,
        entry: &LedgerEntry,
    ) -> Result<AccumulatorProof<NonMembershipWitness>> {
        let element = AccumulatorElement::Spent(*entry);
        self.prove(
            |_| entry.block_index,
            |segment| segment.prove_non_membership(&element),
        )
    }

    /// Take the history after `since` under the read lock, then prove
    /// against the detached segment.
    fn prove<W>(
        &self,
        since: impl FnOnce(&AccumulatorHistory) -> u32,
        witness: impl FnOnce(&HistorySegment) -> Result<W>,
    ) -> Result<AccumulatorProof<W>> {
        let segment = {
            let history = self.history.read();
            let last = history.last_block();
            history.segment(since(&*history).min(last), last)?
        };

        Ok(AccumulatorProof {
            block: segment.last_block(),
            accumulator: segment.accumulator().clone(),
            since: segment.base(),
            since_accumulator: segment.base_accumulator().clone(),
            witness: witness(&segment)?,
        })
    }

    /// Shutdown operator
    pub async fn shutdown(self) -> Result<()> {
        self.publisher.shutdown().await?;
        self.monitor.shutdown().await?;

        for task in self.tasks {
            task.await
                .map_err(|e| Error::Concurrency(format!("Task failed: {}", e)))?;
        }

        drop(self.manager);
        if let Some(storage) = self.storage {
            match Arc::try_unwrap(storage) {
                Ok(storage) => storage.close()?,
                Err(_) => tracing::warn!("Storage still shared at shutdown"),
            }
        }

        tracing::info!("Operator stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("status", &self.manager.status())
            .field("persistence", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keccak256, KeyPair};
    use crate::monitor::{DepositEvent, EventId, WithdrawalEvent};
    use crate::types::{CoinSlice, Output};
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        // Tests drive block production explicitly
        config.chain.block_interval_ms = 60_000;
        config
    }

    async fn deposit(operator: &Operator, owner: &KeyPair, begin: u32, end: u32, n: u32) -> LedgerEntry {
        let event = RootChainEvent::Deposit(DepositEvent {
            event_id: EventId::new(keccak256(b"deposits"), n),
            owner: owner.address(),
            slice: CoinSlice::new(begin, end),
        });
        match operator.apply_event(event).await.unwrap() {
            EventOutcome::Deposited(entry) => entry,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn transfer(input: LedgerEntry, from: &KeyPair, to: &KeyPair) -> Transaction {
        Transaction::new(vec![input], vec![Output::new(to.address(), input.output.slice)])
            .sign(&[from])
            .unwrap()
    }

    #[tokio::test]
    async fn test_operator_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let operator = Operator::open(test_config(&temp_dir)).await.unwrap();
        assert_eq!(operator.status().last_block, 0);
        operator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_publish_and_prove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let operator = Operator::open(test_config(&temp_dir)).await.unwrap();
        let mut blocks = operator.subscribe_blocks();
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);

        let deposited = deposit(&operator, &alice, 0, 100, 0).await;
        operator.submit_transaction(transfer(deposited, &alice, &bob)).unwrap();
        let block = operator.publish_now().await.unwrap();
        assert_eq!(blocks.recv().await.unwrap(), block);
        assert_eq!(operator.get_block(1).unwrap(), block);

        let created = operator.get_entry(&UtxoKey::new(1, 0, 0)).unwrap();
        let proof = operator.prove_created(&created).unwrap();
        assert_eq!(proof.block, 1);
        assert_eq!(proof.accumulator, block.accumulator);
        assert!(proof
            .witness
            .verify(&proof.accumulator, &AccumulatorElement::Created(created)));

        // The deposit is folded by the block that records it
        let credited = operator.prove_created(&deposited).unwrap();
        assert!(credited
            .witness
            .verify(&credited.accumulator, &AccumulatorElement::Created(deposited)));

        let spent = operator.prove_spent(&deposited).unwrap();
        assert!(spent
            .witness
            .verify(&spent.accumulator, &AccumulatorElement::Spent(deposited)));

        let unspent = operator.prove_unspent(&created).unwrap();
        assert_eq!(unspent.since, 1);
        assert!(unspent.witness.verify(
            &unspent.accumulator,
            &AccumulatorElement::Spent(created),
            &unspent.since_accumulator
        ));
        assert!(operator.prove_unspent(&deposited).is_err());

        operator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_restores_state_and_history() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&temp_dir);
        config.snapshot.interval_blocks = 2;
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);

        let before = {
            let operator = Operator::open(config.clone()).await.unwrap();
            let d1 = deposit(&operator, &alice, 0, 10, 0).await;
            let d2 = deposit(&operator, &alice, 10, 20, 1).await;
            operator.submit_transaction(transfer(d1, &alice, &bob)).unwrap();
            operator.publish_now().await.unwrap();
            operator.publish_now().await.unwrap(); // snapshot at 2
            operator.submit_transaction(transfer(d2, &alice, &bob)).unwrap();
            operator.publish_now().await.unwrap(); // replayed on restart
            let status = operator.status();
            operator.shutdown().await.unwrap();
            status
        };

        let operator = Operator::open(config).await.unwrap();
        assert_eq!(operator.status(), before);
        assert_eq!(operator.list_entries_for_owner(&bob.address()).len(), 2);

        // History covers every stored block
        let created = operator.get_entry(&UtxoKey::new(3, 0, 0)).unwrap();
        assert_eq!(operator.prove_created(&created).unwrap().block, 3);

        // Chain continues from the restored head
        let next = operator.publish_now().await.unwrap();
        next.verify_linkage(Some(&operator.get_block(3).unwrap())).unwrap();

        operator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawn_entry_is_not_unspent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let operator = Operator::open(test_config(&temp_dir)).await.unwrap();
        let alice = KeyPair::from_seed(&[1u8; 32]);

        let deposited = deposit(&operator, &alice, 0, 50, 0).await;
        operator.publish_now().await.unwrap();
        let before = operator.prove_unspent(&deposited).unwrap();
        assert!(before.witness.verify(
            &before.accumulator,
            &AccumulatorElement::Spent(deposited),
            &before.since_accumulator
        ));

        let outcome = operator
            .apply_event(RootChainEvent::Withdrawal(WithdrawalEvent {
                event_id: EventId::new(keccak256(b"exits"), 0),
                entry: deposited,
            }))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Withdrawn(deposited));
        let block = operator.publish_now().await.unwrap();
        assert_eq!(block.updates.len(), 1);

        assert!(matches!(
            operator.prove_unspent(&deposited),
            Err(Error::Accumulator(_))
        ));
        let exited = operator.prove_spent(&deposited).unwrap();
        assert_eq!(exited.block, 2);
        assert!(exited
            .witness
            .verify(&exited.accumulator, &AccumulatorElement::Spent(deposited)));

        // The stale witness no longer matches the current accumulator
        assert!(!before.witness.verify(
            &exited.accumulator,
            &AccumulatorElement::Spent(deposited),
            &before.since_accumulator
        ));

        operator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_deposit_past_snapshot() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);

        for interval in [0, 2] {
            let temp_dir = tempfile::tempdir().unwrap();
            let mut config = test_config(&temp_dir);
            config.snapshot.interval_blocks = interval;

            let before = {
                let operator = Operator::open(config.clone()).await.unwrap();
                operator.publish_now().await.unwrap();
                operator.publish_now().await.unwrap(); // snapshot at 2 when enabled
                let late = deposit(&operator, &alice, 0, 10, 7).await;
                operator.submit_transaction(transfer(late, &alice, &bob)).unwrap();
                operator.publish_now().await.unwrap();
                let snapshot = operator.snapshot();
                operator.shutdown().await.unwrap();
                snapshot
            };

            let operator = Operator::open(config).await.unwrap();
            assert_eq!(operator.snapshot(), before);
            assert!(operator.get_entry(&UtxoKey::new(3, 0, 0)).is_some());

            // Redelivered by the watcher after restart
            let again = RootChainEvent::Deposit(DepositEvent {
                event_id: EventId::new(keccak256(b"deposits"), 7),
                owner: alice.address(),
                slice: CoinSlice::new(0, 10),
            });
            assert_eq!(
                operator.apply_event(again).await.unwrap(),
                EventOutcome::AlreadyProcessed
            );

            operator.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_memory_operator() {
        let mut config = Config::default();
        config.persistence_enabled = false;
        config.chain.block_interval_ms = 60_000;

        let operator = Operator::open(config).await.unwrap();
        let block = operator.publish_now().await.unwrap();
        assert_eq!(block.number, 1);
        assert!(matches!(operator.get_block(1), Err(Error::BlockNotFound(1))));
        operator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.chain.block_interval_ms = 0;
        assert!(matches!(
            Operator::open(config).await,
            Err(Error::Config(_))
        ));
    }
}
