//! Block publisher task
//!
//! One task owns block production. It assembles a block on every tick of
//! the block interval (or on demand), then hands the block on:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            PublisherHandle (Clone)                   │
//! │        PublishNow / Shutdown into the mailbox        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             BlockPublisher (single task)             │
//! │  tick / PublishNow → TransactionManager::assemble    │
//! │        │                                             │
//! │        ├─► BlockStore::commit_block (+ snapshot)     │
//! │        ├─► AccumulatorHistory::ingest                │
//! │        └─► broadcast to subscribers                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Assembly is the only step that touches ledger state. A refused assembly
//! (empty block with empty blocks disabled) is skipped until the next tick.
//!
//! A block is stored before anyone else sees it. When storing fails, the
//! block is held back and block production stops: every later tick retries
//! the same block and assembles nothing new until it is stored, so the
//! stored chain never has a gap.

use crate::accumulator::AccumulatorHistory;
use crate::block::Block;
use crate::manager::{ChainSnapshot, TransactionManager};
use crate::storage::BlockStore;
use crate::{Config, Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Message sent to the publisher
#[derive(Debug)]
pub enum PublisherMessage {
    /// Assemble and publish a block immediately
    PublishNow {
        /// Receives the published block or the reason there is none
        response: oneshot::Sender<Result<Block>>,
    },

    /// Stop the publisher
    Shutdown,
}

/// Task that assembles and distributes blocks
#[derive(Debug)]
pub struct BlockPublisher {
    manager: Arc<TransactionManager>,
    store: Option<Arc<dyn BlockStore>>,
    history: Arc<RwLock<AccumulatorHistory>>,
    blocks: broadcast::Sender<Block>,
    mailbox: mpsc::Receiver<PublisherMessage>,
    block_interval: Duration,
    snapshot_interval: u32,
    unstored: Option<(Block, Option<ChainSnapshot>)>,
}

impl BlockPublisher {
    /// Create new publisher
    pub fn new(
        manager: Arc<TransactionManager>,
        store: Option<Arc<dyn BlockStore>>,
        history: Arc<RwLock<AccumulatorHistory>>,
        blocks: broadcast::Sender<Block>,
        mailbox: mpsc::Receiver<PublisherMessage>,
        config: &Config,
    ) -> Self {
        Self {
            manager,
            store,
            history,
            blocks,
            mailbox,
            block_interval: config.chain.block_interval(),
            snapshot_interval: config.snapshot.interval_blocks,
            unstored: None,
        }
    }

    /// Run the publisher event loop
    pub async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.block_interval, self.block_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.mailbox.recv() => {
                    match msg {
                        Some(PublisherMessage::PublishNow { response }) => {
                            let _ = response.send(self.publish());
                        }
                        Some(PublisherMessage::Shutdown) | None => break,
                    }
                }

                _ = ticker.tick() => {
                    match self.publish() {
                        Ok(_) => {}
                        Err(Error::EmptyBlock) => {
                            tracing::debug!("No pending transactions, block skipped");
                        }
                        Err(e) => {
                            tracing::error!("Error publishing block: {}", e);
                        }
                    }
                }
            }
        }

        if let Some((block, _)) = &self.unstored {
            tracing::error!(number = block.number, "Publisher stopped with an unstored block");
        }
        tracing::info!("Block publisher stopped");
    }

    /// Publish the held-back block, or assemble and publish a new one
    fn publish(&mut self) -> Result<Block> {
        let (block, snapshot) = match self.unstored.take() {
            Some(held) => held,
            None => {
                let block = self.manager.assemble_block()?;
                let snapshot = (self.store.is_some()
                    && self.snapshot_interval > 0
                    && block.number % self.snapshot_interval == 0)
                    .then(|| self.manager.snapshot());
                (block, snapshot)
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.commit_block(&block, snapshot.as_ref()) {
                tracing::error!(
                    number = block.number,
                    "Block not stored, production halted until it is: {}",
                    e
                );
                self.unstored = Some((block, snapshot));
                return Err(e);
            }
        }

        if let Err(e) = self.history.write().ingest(&block) {
            tracing::error!(number = block.number, "Accumulator history rejected block: {}", e);
        }

        // No subscribers is fine
        let _ = self.blocks.send(block.clone());

        Ok(block)
    }
}

/// Handle for controlling the publisher
#[derive(Clone, Debug)]
pub struct PublisherHandle {
    sender: mpsc::Sender<PublisherMessage>,
}

impl PublisherHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<PublisherMessage>) -> Self {
        Self { sender }
    }

    /// Publish a block now instead of waiting for the next tick
    pub async fn publish_now(&self) -> Result<Block> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PublisherMessage::PublishNow { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Publisher mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown publisher
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PublisherMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Publisher mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the publisher task
pub fn spawn_publisher(
    manager: Arc<TransactionManager>,
    store: Option<Arc<dyn BlockStore>>,
    history: Arc<RwLock<AccumulatorHistory>>,
    blocks: broadcast::Sender<Block>,
    config: &Config,
) -> (PublisherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let publisher = BlockPublisher::new(manager, store, history, blocks, rx, config);

    let task = tokio::spawn(async move {
        publisher.run().await;
    });

    (PublisherHandle::new(tx), task)
}
