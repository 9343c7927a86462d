//! Root-chain event ingestion
//!
//! A watcher of the root-chain contract (outside this crate) feeds deposit
//! and withdrawal events into a [`MonitorHandle`]. A single task applies them
//! to the [`TransactionManager`] in arrival order.
//!
//! ```text
//! root-chain watcher ──► MonitorHandle ──mpsc──► monitor task ──► TransactionManager
//! ```
//!
//! Every event carries a root-chain identity. The manager remembers applied
//! identities, so re-delivery after a watcher restart is harmless.

use crate::manager::TransactionManager;
use crate::types::{Address, CoinSlice, Hash256, LedgerEntry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Root-chain identity of an event: transaction hash and log index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    /// Root-chain transaction hash
    pub tx_hash: Hash256,
    /// Position of the log within that transaction
    pub log_index: u32,
}

impl EventId {
    /// Create an event identity
    pub fn new(tx_hash: Hash256, log_index: u32) -> Self {
        Self { tx_hash, log_index }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.log_index)
    }
}

/// Coins locked in the root-chain contract for `owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Root-chain identity
    pub event_id: EventId,
    /// Owner credited on the child chain
    pub owner: Address,
    /// Deposited coins
    pub slice: CoinSlice,
}

/// Entry exited to the root chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    /// Root-chain identity
    pub event_id: EventId,
    /// Exited entry, as claimed on the root chain
    pub entry: LedgerEntry,
}

/// Event observed on the root chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootChainEvent {
    /// Coins entered the child chain
    Deposit(DepositEvent),
    /// Coins left the child chain
    Withdrawal(WithdrawalEvent),
}

impl RootChainEvent {
    /// Root-chain identity of the event
    pub fn event_id(&self) -> EventId {
        match self {
            RootChainEvent::Deposit(d) => d.event_id,
            RootChainEvent::Withdrawal(w) => w.event_id,
        }
    }
}

/// Result of applying a root-chain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOutcome {
    /// New entry credited
    Deposited(LedgerEntry),
    /// Entry removed from the index
    Withdrawn(LedgerEntry),
    /// Identity seen before; nothing changed
    AlreadyProcessed,
}

/// Message sent to the monitor task
#[derive(Debug)]
pub enum MonitorMessage {
    /// Apply an event
    Apply {
        /// Event to apply
        event: RootChainEvent,
        /// Receives the outcome; `None` when the sender does not wait
        response: Option<oneshot::Sender<Result<EventOutcome>>>,
    },

    /// Stop after draining earlier messages
    Shutdown,
}

/// Task that applies root-chain events
#[derive(Debug)]
pub struct RootChainMonitor {
    manager: Arc<TransactionManager>,
    mailbox: mpsc::Receiver<MonitorMessage>,
}

impl RootChainMonitor {
    /// Create new monitor
    pub fn new(manager: Arc<TransactionManager>, mailbox: mpsc::Receiver<MonitorMessage>) -> Self {
        Self { manager, mailbox }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                MonitorMessage::Apply { event, response } => {
                    let result = self.apply(&event);
                    if let Some(response) = response {
                        let _ = response.send(result);
                    }
                }
                MonitorMessage::Shutdown => break,
            }
        }

        tracing::info!("Root-chain monitor stopped");
    }

    fn apply(&self, event: &RootChainEvent) -> Result<EventOutcome> {
        let result = match event {
            RootChainEvent::Deposit(deposit) => self.manager.apply_deposit(deposit),
            RootChainEvent::Withdrawal(withdrawal) => self.manager.apply_withdrawal(withdrawal),
        };

        if let Err(e) = &result {
            tracing::warn!(event_id = %event.event_id(), error = %e, "Root-chain event refused");
        }
        result
    }
}

/// Handle for feeding events to the monitor task
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorMessage>,
}

impl MonitorHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<MonitorMessage>) -> Self {
        Self { sender }
    }

    /// Apply an event and wait for the outcome
    pub async fn apply(&self, event: RootChainEvent) -> Result<EventOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorMessage::Apply {
                event,
                response: Some(tx),
            })
            .await
            .map_err(|_| Error::Concurrency("Monitor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Queue an event without waiting; refusals are only logged
    pub async fn notify(&self, event: RootChainEvent) -> Result<()> {
        self.sender
            .send(MonitorMessage::Apply {
                event,
                response: None,
            })
            .await
            .map_err(|_| Error::Concurrency("Monitor mailbox closed".to_string()))
    }

    /// Shutdown monitor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Monitor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the monitor task
pub fn spawn_monitor(
    manager: Arc<TransactionManager>,
    channel_capacity: usize,
) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(channel_capacity);
    let monitor = RootChainMonitor::new(manager, rx);

    let task = tokio::spawn(async move {
        monitor.run().await;
    });

    (MonitorHandle::new(tx), task)
}
