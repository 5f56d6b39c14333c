//! Transaction coordinator
//!
//! A [`Txn`] is one atomic scope: reads go through an overlay so the scope
//! sees its own staged writes, every staged write lands in a single
//! [`rocksdb::WriteBatch`], and the first read of each mutable entity records
//! a version guard verified at commit. Abort is simply dropping the
//! transaction; nothing reaches the store.

use crate::{
    error::Result,
    notify::Notice,
    storage::{Guard, Storage},
    types::{Escrow, Job, Payment, TrackingRecord, UserId, Wallet},
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use std::collections::HashMap;
use uuid::Uuid;

/// One atomic, isolated unit of work against the ledger store
pub(crate) struct Txn<'a> {
    storage: &'a Storage,
    batch: WriteBatch,

    // Read-your-writes overlays
    wallets: HashMap<UserId, Wallet>,
    jobs: HashMap<Uuid, Job>,
    escrows: HashMap<Uuid, Escrow>,

    // Version observed at first storage read, per entity; `None` = absent.
    // Used to build the commit guard on first write.
    wallet_reads: HashMap<UserId, Option<u64>>,
    job_reads: HashMap<Uuid, Option<u64>>,
    escrow_reads: HashMap<Uuid, Option<u64>>,

    guards: Vec<Guard>,
    notices: Vec<Notice>,

    // One timestamp per scope so co-staged records agree
    now: DateTime<Utc>,
}

impl<'a> Txn<'a> {
    /// Begin a new scope
    pub fn begin(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch: WriteBatch::default(),
            wallets: HashMap::new(),
            jobs: HashMap::new(),
            escrows: HashMap::new(),
            wallet_reads: HashMap::new(),
            job_reads: HashMap::new(),
            escrow_reads: HashMap::new(),
            guards: Vec::new(),
            notices: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Timestamp shared by all records staged in this scope
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    // Overlay-aware reads

    /// Wallet as this scope sees it
    pub fn wallet(&mut self, user_id: &UserId) -> Result<Option<Wallet>> {
        if let Some(wallet) = self.wallets.get(user_id) {
            return Ok(Some(wallet.clone()));
        }
        let stored = self.storage.get_wallet(user_id)?;
        self.wallet_reads
            .entry(user_id.clone())
            .or_insert_with(|| stored.as_ref().map(|w| w.version));
        Ok(stored)
    }

    /// Job as this scope sees it
    pub fn job(&mut self, job_id: Uuid) -> Result<Option<Job>> {
        if let Some(job) = self.jobs.get(&job_id) {
            return Ok(Some(job.clone()));
        }
        let stored = self.storage.get_job(job_id)?;
        self.job_reads
            .entry(job_id)
            .or_insert_with(|| stored.as_ref().map(|j| j.version));
        Ok(stored)
    }

    /// Escrow as this scope sees it
    pub fn escrow(&mut self, job_id: Uuid) -> Result<Option<Escrow>> {
        if let Some(escrow) = self.escrows.get(&job_id) {
            return Ok(Some(escrow.clone()));
        }
        let stored = self.storage.get_escrow(job_id)?;
        self.escrow_reads
            .entry(job_id)
            .or_insert_with(|| stored.as_ref().map(|e| e.version));
        Ok(stored)
    }

    // Staged writes

    /// Stage a wallet write; bumps the version and guards the first write.
    /// Returns the record as staged.
    pub fn put_wallet(&mut self, mut wallet: Wallet) -> Result<Wallet> {
        if !self.wallets.contains_key(&wallet.user_id) {
            let expected = self.wallet_reads.get(&wallet.user_id).copied().flatten();
            self.guards.push(Guard::Wallet { user_id: wallet.user_id.clone(), expected });
        }
        wallet.version += 1;
        self.storage.stage_wallet(&mut self.batch, &wallet)?;
        self.wallets.insert(wallet.user_id.clone(), wallet.clone());
        Ok(wallet)
    }

    /// Stage a payment insert
    pub fn put_payment(&mut self, payment: &Payment) -> Result<()> {
        self.storage.stage_payment(&mut self.batch, payment)?;
        self.notices.push(Notice::PaymentRecorded {
            payment_id: payment.id,
            user_id: payment.user_id.clone(),
            amount: payment.amount,
            kind: payment.kind,
        });
        Ok(())
    }

    /// Stage an escrow write; bumps the version and guards the first write.
    /// Returns the record as staged.
    pub fn put_escrow(&mut self, mut escrow: Escrow) -> Result<Escrow> {
        if !self.escrows.contains_key(&escrow.job_id) {
            let expected = self.escrow_reads.get(&escrow.job_id).copied().flatten();
            self.guards.push(Guard::Escrow { job_id: escrow.job_id, expected });
        }
        escrow.version += 1;
        self.storage.stage_escrow(&mut self.batch, &escrow)?;
        self.notices
            .push(Notice::EscrowChanged { job_id: escrow.job_id, status: escrow.status });
        self.escrows.insert(escrow.job_id, escrow.clone());
        Ok(escrow)
    }

    /// Stage a job write; bumps the version and guards the first write.
    ///
    /// `prev` is the job before this scope touched it (`None` on creation);
    /// it drives secondary-index maintenance.
    pub fn put_job(&mut self, mut job: Job, prev: Option<&Job>) -> Result<Job> {
        if !self.jobs.contains_key(&job.id) {
            let expected = self.job_reads.get(&job.id).copied().flatten();
            self.guards.push(Guard::Job { id: job.id, expected });
        }
        job.version += 1;
        self.storage.stage_job(&mut self.batch, &job, prev)?;
        if prev.map(|p| p.status) != Some(job.status) {
            self.notices.push(Notice::JobStatusChanged { job_id: job.id, status: job.status });
        }
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Stage a tracking record append
    pub fn put_tracking(&mut self, record: &TrackingRecord) -> Result<()> {
        self.storage.stage_tracking(&mut self.batch, record)
    }

    /// Commit the whole scope atomically.
    ///
    /// Returns the notices describing committed effects, for best-effort
    /// dispatch after the write. On error nothing was applied.
    pub fn commit(self) -> Result<Vec<Notice>> {
        let Txn { storage, batch, guards, notices, .. } = self;
        storage.commit(batch, &guards)?;
        Ok(notices)
    }
}
