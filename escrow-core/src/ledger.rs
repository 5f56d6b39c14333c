//! Main ledger orchestration layer
//!
//! Ties together storage, the transaction coordinator, and the wallet /
//! escrow / job-lifecycle managers into the operation surface consumed by
//! the UI layer.
//!
//! # Example
//!
//! ```no_run
//! use escrow_core::{Config, EscrowLedger, JobRequest, Location, UserId};
//!
//! #[tokio::main]
//! async fn main() -> escrow_core::Result<()> {
//!     let ledger = EscrowLedger::open(Config::default()).await?;
//!
//!     let client = UserId::new("client-1");
//!     ledger.deposit(client.clone(), 50_000, "mobile money").await?;
//!
//!     let job = ledger
//!         .create_job(
//!             client,
//!             JobRequest {
//!                 pickup: Location::new(-1.286, 36.817),
//!                 dropoff: Location::new(-4.043, 39.668),
//!                 description: None,
//!                 distance_km: None,
//!             },
//!         )
//!         .await?;
//!     let job = ledger.publish(job.id, 50_000).await?;
//!     println!("published: {}", job.status);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_command_actor, CommandHandle},
    error::{Error, Result},
    escrow::EscrowManager,
    jobs::JobLifecycle,
    metrics::Metrics,
    notify::{BroadcastNotifier, Notice},
    storage::{Storage, StorageStats},
    types::{
        Actor, Escrow, Job, JobRequest, JobStatus, Location, Payment, Role, TrackingRecord,
        UserId, Wallet,
    },
    wallet::WalletLedger,
    Config,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;
use uuid::Uuid;

/// Main ledger interface
///
/// Mutations are serialized through the command actor, each as one atomic
/// scope; reads hit storage directly. Every mutation returns the updated
/// entity or a typed [`Error`], never a raw lower-level fault.
pub struct EscrowLedger {
    /// Actor handle for mutations
    handle: CommandHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Post-commit notification dispatcher
    notifier: BroadcastNotifier,

    /// Metrics collector
    metrics: Metrics,
}

impl EscrowLedger {
    /// Open the ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let notifier = BroadcastNotifier::new(config.notify.channel_capacity);

        let wallets = WalletLedger::new(config.default_currency);
        let jobs = JobLifecycle::new(EscrowManager::new(wallets.clone()));

        let handle = spawn_command_actor(
            storage.clone(),
            wallets,
            jobs,
            Arc::new(notifier.clone()),
            metrics.clone(),
            config.store.command_queue_depth,
            Duration::from_millis(config.store.op_timeout_ms),
        );

        Ok(Self { handle, storage, notifier, metrics })
    }

    // Wallet operations

    /// Credit a wallet from an external payment method
    pub async fn deposit(&self, user_id: UserId, amount: u64, method: &str) -> Result<Payment> {
        self.handle.deposit(user_id, amount, method.to_string()).await
    }

    /// Move wallet funds out to an external bank reference
    pub async fn withdraw(&self, user_id: UserId, amount: u64, bank_ref: &str) -> Result<Payment> {
        self.handle.withdraw(user_id, amount, bank_ref.to_string()).await
    }

    /// Get a wallet
    pub fn get_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.storage
            .get_wallet(user_id)?
            .ok_or_else(|| Error::NotFound(format!("wallet for user {}", user_id)))
    }

    /// Payments for a user, newest first
    pub fn list_payments(&self, user_id: &UserId) -> Result<Vec<Payment>> {
        let mut payments = self.storage.payments_for_user(user_id)?;
        payments.reverse();
        Ok(payments)
    }

    // Job operations

    /// Insert a draft job; no funds move
    pub async fn create_job(&self, client_id: UserId, request: JobRequest) -> Result<Job> {
        self.handle.create_job(client_id, request).await
    }

    /// Fund a draft job: hold escrow and make it `pending`, atomically
    pub async fn publish(&self, job_id: Uuid, amount: u64) -> Result<Job> {
        self.handle.publish(job_id, amount).await
    }

    /// Apply one status transition, with its escrow side effects
    pub async fn advance_status(
        &self,
        job_id: Uuid,
        target: JobStatus,
        actor: Actor,
    ) -> Result<Job> {
        self.handle.advance_status(job_id, target, actor).await
    }

    /// Append a tracking breadcrumb and update the job's current location
    pub async fn record_location(
        &self,
        job_id: Uuid,
        location: Location,
        actor: Actor,
    ) -> Result<()> {
        self.handle.record_location(job_id, location, actor).await
    }

    /// Record the client's rating of a completed job
    pub async fn rate_job(&self, job_id: Uuid, rating: u8, actor: Actor) -> Result<Job> {
        self.handle.rate_job(job_id, rating, actor).await
    }

    /// Get a job
    pub fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.storage
            .get_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Get the escrow for a job
    pub fn get_escrow(&self, job_id: Uuid) -> Result<Escrow> {
        self.storage
            .get_escrow(job_id)?
            .ok_or_else(|| Error::NotFound(format!("escrow for job {}", job_id)))
    }

    /// Jobs visible to a user, newest first.
    ///
    /// Clients see their own jobs. Transporters see their assigned jobs plus
    /// the unclaimed `pending` pool.
    pub fn list_jobs(
        &self,
        user_id: &UserId,
        role: Role,
        status_filter: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let mut jobs = match role {
            Role::Client => self.storage.jobs_for_client(user_id)?,
            Role::Transporter => {
                let mut jobs = self.storage.jobs_for_transporter(user_id)?;
                jobs.extend(self.storage.jobs_with_status(JobStatus::Pending)?);
                jobs
            }
        };

        if let Some(status) = status_filter {
            jobs.retain(|job| job.status == status);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    /// Tracking breadcrumbs for a job, oldest first
    pub fn tracking_history(&self, job_id: Uuid) -> Result<Vec<TrackingRecord>> {
        self.storage.tracking_for_job(job_id)
    }

    // Observability

    /// Subscribe to committed notices (best-effort; never blocks commits)
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Approximate record counts
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Shutdown the ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}
