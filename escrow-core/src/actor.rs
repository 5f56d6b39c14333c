//! Single-writer command actor
//!
//! All mutating operations are funneled through one Tokio task: concurrent
//! callers enqueue commands, the actor executes each in its own transaction
//! scope, and the per-entity version guards in the scope are the backstop
//! should a second writer process ever share the store.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            EscrowLedger (facade, Clone-able)          │
//! │      wraps every call in the operation timeout        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            CommandActor (single task)                 │
//! │   per command: Txn::begin → managers → Txn::commit    │
//! │   then: metrics + best-effort notices                 │
//! └─────────────────────┬────────────────────────────────┘
//!                       ▼
//!            Storage::commit (atomic WriteBatch)
//! ```
//!
//! Reads do not pass through the actor; they hit storage directly, which is
//! safe because commits are atomic.

use crate::{
    error::{Error, Result},
    jobs::JobLifecycle,
    metrics::Metrics,
    notify::{Notice, Notifier},
    storage::Storage,
    txn::Txn,
    types::{Actor, EscrowStatus, Job, JobRequest, JobStatus, Location, Payment, UserId},
    wallet::WalletLedger,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use uuid::Uuid;

/// Message sent to the command actor
pub(crate) enum Command {
    /// Credit a wallet from an external payment method
    Deposit {
        user_id: UserId,
        amount: u64,
        method: String,
        response: oneshot::Sender<Result<Payment>>,
    },

    /// Move funds out to an external bank reference
    Withdraw {
        user_id: UserId,
        amount: u64,
        bank_ref: String,
        response: oneshot::Sender<Result<Payment>>,
    },

    /// Insert a draft job
    CreateJob {
        client_id: UserId,
        request: JobRequest,
        response: oneshot::Sender<Result<Job>>,
    },

    /// Fund a draft job (escrow hold + draft -> pending)
    Publish {
        job_id: Uuid,
        amount: u64,
        response: oneshot::Sender<Result<Job>>,
    },

    /// Apply one status transition
    AdvanceStatus {
        job_id: Uuid,
        target: JobStatus,
        actor: Actor,
        response: oneshot::Sender<Result<Job>>,
    },

    /// Append a tracking breadcrumb
    RecordLocation {
        job_id: Uuid,
        location: Location,
        actor: Actor,
        response: oneshot::Sender<Result<()>>,
    },

    /// Rate a completed job
    RateJob {
        job_id: Uuid,
        rating: u8,
        actor: Actor,
        response: oneshot::Sender<Result<Job>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that serializes all ledger mutations
pub(crate) struct CommandActor {
    storage: Arc<Storage>,
    wallets: WalletLedger,
    jobs: JobLifecycle,
    mailbox: mpsc::Receiver<Command>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
}

impl CommandActor {
    pub fn new(
        storage: Arc<Storage>,
        wallets: WalletLedger,
        jobs: JobLifecycle,
        mailbox: mpsc::Receiver<Command>,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
    ) -> Self {
        Self { storage, wallets, jobs, mailbox, notifier, metrics }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            match command {
                Command::Shutdown => break,
                other => self.handle_command(other),
            }
        }
        tracing::info!("command actor stopped");
    }

    fn handle_command(&self, command: Command) {
        match command {
            Command::Deposit { user_id, amount, method, response } => {
                let result = self
                    .execute(|txn| self.wallets.deposit(txn, &user_id, amount, &method));
                let _ = response.send(result);
            }

            Command::Withdraw { user_id, amount, bank_ref, response } => {
                let result = self
                    .execute(|txn| self.wallets.withdraw(txn, &user_id, amount, &bank_ref));
                let _ = response.send(result);
            }

            Command::CreateJob { client_id, request, response } => {
                let result = self.execute(|txn| self.jobs.create_job(txn, &client_id, request));
                let _ = response.send(result);
            }

            Command::Publish { job_id, amount, response } => {
                let result = self.execute(|txn| self.jobs.publish(txn, job_id, amount));
                let _ = response.send(result);
            }

            Command::AdvanceStatus { job_id, target, actor, response } => {
                let result =
                    self.execute(|txn| self.jobs.advance_status(txn, job_id, target, &actor));
                let _ = response.send(result);
            }

            Command::RecordLocation { job_id, location, actor, response } => {
                let result = self
                    .execute(|txn| self.jobs.record_location(txn, job_id, location, &actor))
                    .map(|_| ());
                let _ = response.send(result);
            }

            Command::RateJob { job_id, rating, actor, response } => {
                let result = self.execute(|txn| self.jobs.rate_job(txn, job_id, rating, &actor));
                let _ = response.send(result);
            }

            Command::Shutdown => {}
        }
    }

    /// Run one operation in its own transaction scope.
    ///
    /// An error anywhere before commit aborts the scope with no partial
    /// state. After a successful commit, metrics are updated and notices go
    /// out best-effort.
    fn execute<T>(&self, op: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        let mut txn = Txn::begin(&self.storage);
        let out = op(&mut txn)?;

        let started = Instant::now();
        let notices = txn.commit().map_err(|e| {
            if let Error::StoreUnavailable(msg) = &e {
                if msg.starts_with("write conflict") {
                    self.metrics.write_conflicts_total.inc();
                }
            }
            e
        })?;
        self.metrics.commit_duration.observe(started.elapsed().as_secs_f64());

        for notice in notices {
            self.record_notice(&notice);
            self.notifier.notify(notice);
        }

        Ok(out)
    }

    fn record_notice(&self, notice: &Notice) {
        match notice {
            Notice::PaymentRecorded { .. } => self.metrics.payments_total.inc(),
            Notice::JobStatusChanged { .. } => self.metrics.job_transitions_total.inc(),
            Notice::EscrowChanged { status, .. } => match status {
                EscrowStatus::Held => self.metrics.escrow_holds_total.inc(),
                EscrowStatus::Released => self.metrics.escrow_releases_total.inc(),
                EscrowStatus::Refunded => self.metrics.escrow_refunds_total.inc(),
            },
        }
    }
}

/// Handle for sending commands to the actor
#[derive(Clone)]
pub(crate) struct CommandHandle {
    sender: mpsc::Sender<Command>,
    op_timeout: Duration,
}

impl CommandHandle {
    pub fn new(sender: mpsc::Sender<Command>, op_timeout: Duration) -> Self {
        Self { sender, op_timeout }
    }

    async fn call<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(command)
            .await
            .map_err(|_| Error::StoreUnavailable("command mailbox closed".to_string()))?;

        match tokio::time::timeout(self.op_timeout, rx).await {
            Err(_) => Err(Error::StoreUnavailable("operation timed out".to_string())),
            Ok(Err(_)) => Err(Error::StoreUnavailable("response channel closed".to_string())),
            Ok(Ok(result)) => result,
        }
    }

    /// Credit a wallet
    pub async fn deposit(&self, user_id: UserId, amount: u64, method: String) -> Result<Payment> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::Deposit { user_id, amount, method, response: tx }, rx).await
    }

    /// Withdraw from a wallet
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: u64,
        bank_ref: String,
    ) -> Result<Payment> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::Withdraw { user_id, amount, bank_ref, response: tx }, rx).await
    }

    /// Insert a draft job
    pub async fn create_job(&self, client_id: UserId, request: JobRequest) -> Result<Job> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::CreateJob { client_id, request, response: tx }, rx).await
    }

    /// Fund a draft job
    pub async fn publish(&self, job_id: Uuid, amount: u64) -> Result<Job> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::Publish { job_id, amount, response: tx }, rx).await
    }

    /// Apply one status transition
    pub async fn advance_status(
        &self,
        job_id: Uuid,
        target: JobStatus,
        actor: Actor,
    ) -> Result<Job> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::AdvanceStatus { job_id, target, actor, response: tx }, rx).await
    }

    /// Append a tracking breadcrumb
    pub async fn record_location(
        &self,
        job_id: Uuid,
        location: Location,
        actor: Actor,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::RecordLocation { job_id, location, actor, response: tx }, rx).await
    }

    /// Rate a completed job
    pub async fn rate_job(&self, job_id: Uuid, rating: u8, actor: Actor) -> Result<Job> {
        let (tx, rx) = oneshot::channel();
        self.call(Command::RateJob { job_id, rating, actor, response: tx }, rx).await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::StoreUnavailable("command mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the command actor
pub(crate) fn spawn_command_actor(
    storage: Arc<Storage>,
    wallets: WalletLedger,
    jobs: JobLifecycle,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    queue_depth: usize,
    op_timeout: Duration,
) -> CommandHandle {
    let (tx, rx) = mpsc::channel(queue_depth);
    let actor = CommandActor::new(storage, wallets, jobs, rx, notifier, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    CommandHandle::new(tx, op_timeout)
}
