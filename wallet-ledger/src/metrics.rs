//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger engine.
//!
//! # Metrics
//!
//! - `<ns>_operations_total{operation, outcome}` - Engine calls by result
//! - `<ns>_transactions_total` - Transactions appended to the log
//! - `<ns>_conflict_retries_total` - Operations re-run after a commit conflict
//! - `<ns>_lock_wait_seconds` - Histogram of wallet lock acquisition time
//! - `<ns>_commit_duration_seconds` - Histogram of atomic commit latency
//!
//! Collectors live in a registry owned by the [`Metrics`] value, so several
//! engines can coexist in one process (tests do this constantly).

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Engine calls by operation and outcome
    pub operations: IntCounterVec,

    /// Transactions appended
    pub transactions_total: IntCounter,

    /// Conflict-driven retries
    pub conflict_retries: IntCounter,

    /// Lock wait histogram
    pub lock_wait: Histogram,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new(namespace: &str) -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Ledger engine operations by outcome")
                .namespace(namespace),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let transactions_total = IntCounter::with_opts(
            Opts::new("transactions_total", "Transactions appended to the log")
                .namespace(namespace),
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let conflict_retries = IntCounter::with_opts(
            Opts::new(
                "conflict_retries_total",
                "Operations re-run after an optimistic commit conflict",
            )
            .namespace(namespace),
        )?;
        registry.register(Box::new(conflict_retries.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("lock_wait_seconds", "Histogram of wallet lock wait time")
                .namespace(namespace)
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("commit_duration_seconds", "Histogram of commit latencies")
                .namespace(namespace)
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            operations,
            transactions_total,
            conflict_retries,
            lock_wait,
            commit_duration,
            registry,
        })
    }

    /// Record an engine call
    pub fn record_operation(&self, operation: &str, outcome: &str) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Record appended transactions
    pub fn record_transactions(&self, count: usize) {
        self.transactions_total.inc_by(count as u64);
    }

    /// Record a conflict retry
    pub fn record_conflict_retry(&self) {
        self.conflict_retries.inc();
    }

    /// Record lock wait
    pub fn record_lock_wait(&self, duration_seconds: f64) {
        self.lock_wait.observe(duration_seconds);
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Count for one operation/outcome pair
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
