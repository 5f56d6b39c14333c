//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger:
//!
//! - `ledger_payments_total` - Payment records written
//! - `ledger_escrow_holds_total` - Escrows created
//! - `ledger_escrow_releases_total` - Escrows released
//! - `ledger_escrow_refunds_total` - Escrows refunded
//! - `ledger_job_transitions_total` - Job status transitions applied
//! - `ledger_commit_duration_seconds` - Atomic commit latency
//! - `ledger_write_conflicts_total` - Commits aborted by a version guard

use crate::error::{Error, Result};
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Payment records written
    pub payments_total: IntCounter,

    /// Escrows created
    pub escrow_holds_total: IntCounter,

    /// Escrows released
    pub escrow_releases_total: IntCounter,

    /// Escrows refunded
    pub escrow_refunds_total: IntCounter,

    /// Job status transitions applied
    pub job_transitions_total: IntCounter,

    /// Commits aborted by a version guard
    pub write_conflicts_total: IntCounter,

    /// Atomic commit latency
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let payments_total = Self::counter(&registry, "ledger_payments_total", "Payment records written")?;
        let escrow_holds_total =
            Self::counter(&registry, "ledger_escrow_holds_total", "Escrows created")?;
        let escrow_releases_total =
            Self::counter(&registry, "ledger_escrow_releases_total", "Escrows released")?;
        let escrow_refunds_total =
            Self::counter(&registry, "ledger_escrow_refunds_total", "Escrows refunded")?;
        let job_transitions_total = Self::counter(
            &registry,
            "ledger_job_transitions_total",
            "Job status transitions applied",
        )?;
        let write_conflicts_total = Self::counter(
            &registry,
            "ledger_write_conflicts_total",
            "Commits aborted by a version guard",
        )?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_commit_duration_seconds", "Atomic commit latency").buckets(
                vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0],
            ),
        )
        .map_err(|e| Error::InvalidState(format!("metrics: {}", e)))?;
        registry
            .register(Box::new(commit_duration.clone()))
            .map_err(|e| Error::InvalidState(format!("metrics: {}", e)))?;

        Ok(Self {
            payments_total,
            escrow_holds_total,
            escrow_releases_total,
            escrow_refunds_total,
            job_transitions_total,
            write_conflicts_total,
            commit_duration,
            registry,
        })
    }

    fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
        let counter = IntCounter::with_opts(Opts::new(name, help))
            .map_err(|e| Error::InvalidState(format!("metrics: {}", e)))?;
        registry
            .register(Box::new(counter.clone()))
            .map_err(|e| Error::InvalidState(format!("metrics: {}", e)))?;
        Ok(counter)
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
