//! Plasma Child Chain Core
//!
//! Range-based UTXO ledger for a Plasma child chain operator.
//!
//! # Architecture
//!
//! - **Single Critical Section**: One mutex serializes every validate→mutate sequence
//! - **Optimistic Keying**: Pending outputs are indexed at their next-block keys
//! - **RSA Accumulator**: Each block folds its spent and created entries
//! - **Hash Chain**: Every block commits to its predecessor's hash
//!
//! # Invariants
//!
//! - No double spend: an entry is consumed by at most one accepted transaction
//! - Range conservation: outputs exactly partition a subset of input ranges
//! - Failed assembly leaves head, accumulator and pending queue untouched
//! - Inputs only reference finalized blocks

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod crypto;
pub mod merkle;
pub mod accumulator;
pub mod transaction;
pub mod block;
pub mod manager;
pub mod monitor;
pub mod publisher;
pub mod storage;
pub mod operator;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Address, CoinSlice, Hash256, LedgerEntry, Output, Signature, UtxoKey, COIN_SUPPLY,
    DEPOSIT_TX_INDEX_BASE,
};
pub use accumulator::{Accumulator, AccumulatorElement, AccumulatorHistory};
pub use transaction::Transaction;
pub use block::{Block, BlockPolicy};
pub use manager::{ChainSnapshot, ChainStatus, TransactionManager};
pub use monitor::{DepositEvent, EventId, EventOutcome, RootChainEvent, WithdrawalEvent};
pub use storage::{BlockStore, Storage};
pub use operator::Operator;
pub use config::Config;
pub use metrics::Metrics;
