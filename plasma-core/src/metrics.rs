//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger manager and publisher.
//!
//! # Metrics
//!
//! - `plasma_transactions_accepted_total` - Transactions admitted to the pending queue
//! - `plasma_transactions_rejected_total` - Submissions rejected by validation
//! - `plasma_blocks_assembled_total` - Blocks assembled
//! - `plasma_block_assembly_failures_total` - Failed assembly attempts
//! - `plasma_block_assembly_duration_seconds` - Histogram of assembly latencies
//! - `plasma_utxo_count` - Entries in the UTXO index
//! - `plasma_pending_transactions` - Pending queue length
//! - `plasma_root_chain_events_total` - Deposits and withdrawals applied

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its registry, so several managers can coexist in one
/// process.
#[derive(Clone)]
pub struct Metrics {
    /// Transactions admitted
    pub transactions_accepted: IntCounter,

    /// Transactions rejected
    pub transactions_rejected: IntCounter,

    /// Blocks assembled
    pub blocks_assembled: IntCounter,

    /// Failed assembly attempts
    pub assembly_failures: IntCounter,

    /// Assembly duration histogram
    pub assembly_duration: Histogram,

    /// UTXO index size
    pub utxo_count: IntGauge,

    /// Pending queue length
    pub pending_transactions: IntGauge,

    /// Root-chain events applied
    pub root_chain_events: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_accepted = IntCounter::new(
            "plasma_transactions_accepted_total",
            "Transactions admitted to the pending queue",
        )?;
        registry.register(Box::new(transactions_accepted.clone()))?;

        let transactions_rejected = IntCounter::new(
            "plasma_transactions_rejected_total",
            "Submissions rejected by validation",
        )?;
        registry.register(Box::new(transactions_rejected.clone()))?;

        let blocks_assembled =
            IntCounter::new("plasma_blocks_assembled_total", "Blocks assembled")?;
        registry.register(Box::new(blocks_assembled.clone()))?;

        let assembly_failures = IntCounter::new(
            "plasma_block_assembly_failures_total",
            "Failed block assembly attempts",
        )?;
        registry.register(Box::new(assembly_failures.clone()))?;

        let assembly_duration = Histogram::with_opts(
            HistogramOpts::new(
                "plasma_block_assembly_duration_seconds",
                "Histogram of block assembly latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(assembly_duration.clone()))?;

        let utxo_count = IntGauge::new("plasma_utxo_count", "Entries in the UTXO index")?;
        registry.register(Box::new(utxo_count.clone()))?;

        let pending_transactions =
            IntGauge::new("plasma_pending_transactions", "Pending queue length")?;
        registry.register(Box::new(pending_transactions.clone()))?;

        let root_chain_events = IntCounter::new(
            "plasma_root_chain_events_total",
            "Deposits and withdrawals applied",
        )?;
        registry.register(Box::new(root_chain_events.clone()))?;

        Ok(Self {
            transactions_accepted,
            transactions_rejected,
            blocks_assembled,
            assembly_failures,
            assembly_duration,
            utxo_count,
            pending_transactions,
            root_chain_events,
            registry,
        })
    }

    /// Record an admitted transaction and the resulting index sizes
    pub fn record_accepted(&self, utxo_count: usize, pending: usize) {
        self.transactions_accepted.inc();
        self.set_sizes(utxo_count, pending);
    }

    /// Record a rejected submission
    pub fn record_rejected(&self) {
        self.transactions_rejected.inc();
    }

    /// Record a successful assembly
    pub fn record_block_assembled(&self, duration_seconds: f64, utxo_count: usize) {
        self.blocks_assembled.inc();
        self.assembly_duration.observe(duration_seconds);
        self.set_sizes(utxo_count, 0);
    }

    /// Record a failed assembly
    pub fn record_assembly_failure(&self) {
        self.assembly_failures.inc();
    }

    /// Record an applied root-chain event
    pub fn record_root_chain_event(&self, utxo_count: usize) {
        self.root_chain_events.inc();
        self.utxo_count.set(utxo_count as i64);
    }

    /// Update size gauges
    pub fn set_sizes(&self, utxo_count: usize, pending: usize) {
        self.utxo_count.set(utxo_count as i64);
        self.pending_transactions.set(pending as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_accepted", &self.transactions_accepted.get())
            .field("blocks_assembled", &self.blocks_assembled.get())
            .field("utxo_count", &self.utxo_count.get())
            .finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| unreachable!("static metric definitions are valid: {}", e))
    }
}
