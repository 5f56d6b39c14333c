//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Per-user balances (key: user_id)
//! - `payments` - Append-only payment audit log (key: payment_id, UUIDv7)
//! - `escrows` - Escrow records (key: job_id; one escrow per job)
//! - `jobs` - Job records (key: job_id)
//! - `tracking` - Location breadcrumbs (key: job_id || record_id)
//! - `indices` - Secondary indices for owner/status lookups
//!
//! All multi-record mutations are staged into a [`rocksdb::WriteBatch`] and
//! committed through [`Storage::commit`], which verifies per-entity version
//! guards under the commit lock before the atomic write. Readers therefore
//! never observe an intermediate state.

use crate::{
    error::{Error, Result},
    types::{Escrow, Job, JobStatus, Payment, TrackingRecord, UserId, Wallet},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_PAYMENTS: &str = "payments";
const CF_ESCROWS: &str = "escrows";
const CF_JOBS: &str = "jobs";
const CF_TRACKING: &str = "tracking";
const CF_INDICES: &str = "indices";

/// Index namespace tags (first key byte)
const IDX_USER_PAYMENT: u8 = b'p';
const IDX_CLIENT_JOB: u8 = b'c';
const IDX_TRANSPORTER_JOB: u8 = b't';
const IDX_STATUS_JOB: u8 = b's';

/// Compare-and-swap guard for one entity inside an atomic commit.
///
/// `expected` is the version observed when the transaction first read the
/// entity; `None` means the entity must still be absent. A mismatch at
/// commit time aborts the whole batch.
#[derive(Debug, Clone)]
pub enum Guard {
    /// Wallet version guard
    Wallet {
        /// Wallet owner
        user_id: UserId,
        /// Version observed at first read; `None` = must not exist
        expected: Option<u64>,
    },
    /// Job version guard
    Job {
        /// Job ID
        id: Uuid,
        /// Version observed at first read; `None` = must not exist
        expected: Option<u64>,
    },
    /// Escrow version guard
    Escrow {
        /// Job the escrow belongs to
        job_id: Uuid,
        /// Version observed at first read; `None` = must not exist
        expected: Option<u64>,
    },
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    // Serializes guard verification + batch write; RocksDB batches are
    // atomic but guard checks must not interleave with other commits.
    commit_lock: Mutex<()>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)
            .map_err(|e| Error::StoreUnavailable(format!("create data dir: {}", e)))?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_ESCROWS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_JOBS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_TRACKING, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened ledger store");

        Ok(Self { db: Arc::new(db), commit_lock: Mutex::new(()) })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Frequently read and rewritten, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StoreUnavailable(format!("column family {} not found", name)))
    }

    // Point reads

    /// Get wallet by owner
    pub fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get payment by ID
    pub fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let cf = self.cf_handle(CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get the escrow for a job
    pub fn get_escrow(&self, job_id: Uuid) -> Result<Option<Escrow>> {
        let cf = self.cf_handle(CF_ESCROWS)?;
        match self.db.get_cf(cf, job_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get job by ID
    pub fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let cf = self.cf_handle(CF_JOBS)?;
        match self.db.get_cf(cf, job_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Scans (via indices)

    /// Payments for a user, oldest first (UUIDv7 key order)
    pub fn payments_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>> {
        let prefix = Self::index_prefix(IDX_USER_PAYMENT, user_id.as_str());
        let mut payments = Vec::new();
        for key in self.scan_index(&prefix)? {
            let id = Self::uuid_suffix(&key)?;
            if let Some(payment) = self.get_payment(id)? {
                payments.push(payment);
            }
        }
        Ok(payments)
    }

    /// Jobs created by a client, oldest first
    pub fn jobs_for_client(&self, client_id: &UserId) -> Result<Vec<Job>> {
        let prefix = Self::index_prefix(IDX_CLIENT_JOB, client_id.as_str());
        self.collect_jobs(&prefix)
    }

    /// Jobs assigned to a transporter, oldest first
    pub fn jobs_for_transporter(&self, transporter_id: &UserId) -> Result<Vec<Job>> {
        let prefix = Self::index_prefix(IDX_TRANSPORTER_JOB, transporter_id.as_str());
        self.collect_jobs(&prefix)
    }

    /// Jobs currently in a given status, oldest first
    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let prefix = vec![IDX_STATUS_JOB, status as u8];
        self.collect_jobs(&prefix)
    }

    /// Tracking records for a job, oldest first (UUIDv7 key order)
    pub fn tracking_for_job(&self, job_id: Uuid) -> Result<Vec<TrackingRecord>> {
        let cf = self.cf_handle(CF_TRACKING)?;
        let prefix = job_id.as_bytes().to_vec();

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    fn collect_jobs(&self, prefix: &[u8]) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for key in self.scan_index(prefix)? {
            let id = Self::uuid_suffix(&key)?;
            if let Some(job) = self.get_job(id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn uuid_suffix(key: &[u8]) -> Result<Uuid> {
        if key.len() < 16 {
            return Err(Error::StoreUnavailable("malformed index key".to_string()));
        }
        let bytes: [u8; 16] = key[key.len() - 16..]
            .try_into()
            .map_err(|_| Error::StoreUnavailable("malformed index key".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }

    // Staging (batch construction)

    /// Stage a wallet write
    pub fn stage_wallet(&self, batch: &mut WriteBatch, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        batch.put_cf(cf, wallet.user_id.as_str().as_bytes(), bincode::serialize(wallet)?);
        Ok(())
    }

    /// Stage a payment insert with its owner index entry
    pub fn stage_payment(&self, batch: &mut WriteBatch, payment: &Payment) -> Result<()> {
        let cf = self.cf_handle(CF_PAYMENTS)?;
        batch.put_cf(cf, payment.id.as_bytes(), bincode::serialize(payment)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut key = Self::index_prefix(IDX_USER_PAYMENT, payment.user_id.as_str());
        key.extend_from_slice(payment.id.as_bytes());
        batch.put_cf(cf_indices, &key, b"");
        Ok(())
    }

    /// Stage an escrow write
    pub fn stage_escrow(&self, batch: &mut WriteBatch, escrow: &Escrow) -> Result<()> {
        let cf = self.cf_handle(CF_ESCROWS)?;
        batch.put_cf(cf, escrow.job_id.as_bytes(), bincode::serialize(escrow)?);
        Ok(())
    }

    /// Stage a job write, maintaining owner and status indices.
    ///
    /// `prev` is the job as it was before this transaction (`None` on
    /// creation); it drives index deletions for the old status and index
    /// insertions on first assignment of a transporter.
    pub fn stage_job(&self, batch: &mut WriteBatch, job: &Job, prev: Option<&Job>) -> Result<()> {
        let cf = self.cf_handle(CF_JOBS)?;
        batch.put_cf(cf, job.id.as_bytes(), bincode::serialize(job)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;

        if prev.is_none() {
            let mut key = Self::index_prefix(IDX_CLIENT_JOB, job.client_id.as_str());
            key.extend_from_slice(job.id.as_bytes());
            batch.put_cf(cf_indices, &key, b"");
        }

        let prev_status = prev.map(|p| p.status);
        if prev_status != Some(job.status) {
            if let Some(old) = prev_status {
                let mut key = vec![IDX_STATUS_JOB, old as u8];
                key.extend_from_slice(job.id.as_bytes());
                batch.delete_cf(cf_indices, &key);
            }
            let mut key = vec![IDX_STATUS_JOB, job.status as u8];
            key.extend_from_slice(job.id.as_bytes());
            batch.put_cf(cf_indices, &key, b"");
        }

        if let Some(transporter) = &job.transporter_id {
            let newly_assigned = prev.map_or(true, |p| p.transporter_id.is_none());
            if newly_assigned {
                let mut key = Self::index_prefix(IDX_TRANSPORTER_JOB, transporter.as_str());
                key.extend_from_slice(job.id.as_bytes());
                batch.put_cf(cf_indices, &key, b"");
            }
        }

        Ok(())
    }

    /// Stage a tracking record append
    pub fn stage_tracking(&self, batch: &mut WriteBatch, record: &TrackingRecord) -> Result<()> {
        let cf = self.cf_handle(CF_TRACKING)?;
        let mut key = record.job_id.as_bytes().to_vec();
        key.extend_from_slice(record.id.as_bytes());
        batch.put_cf(cf, &key, bincode::serialize(record)?);
        Ok(())
    }

    fn index_prefix(tag: u8, owner: &str) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(owner.as_bytes());
        key.push(b'|');
        key
    }

    // Atomic commit

    /// Verify version guards and commit the batch atomically.
    ///
    /// Guard verification and the write happen under the commit lock, so a
    /// guard that passes cannot be invalidated by a concurrent commit. A
    /// guard miss aborts the whole batch with a retryable error.
    pub fn commit(&self, batch: WriteBatch, guards: &[Guard]) -> Result<()> {
        let _lock = self.commit_lock.lock();

        for guard in guards {
            self.check_guard(guard)?;
        }

        let writes = batch.len();
        self.db.write(batch)?;

        tracing::debug!(writes, guards = guards.len(), "committed atomic batch");
        Ok(())
    }

    fn check_guard(&self, guard: &Guard) -> Result<()> {
        let (current, expected) = match guard {
            Guard::Wallet { user_id, expected } => {
                (self.get_wallet(user_id)?.map(|w| w.version), *expected)
            }
            Guard::Job { id, expected } => (self.get_job(*id)?.map(|j| j.version), *expected),
            Guard::Escrow { job_id, expected } => {
                (self.get_escrow(*job_id)?.map(|e| e.version), *expected)
            }
        };

        if current != expected {
            return Err(Error::StoreUnavailable(format!(
                "write conflict: expected version {:?}, found {:?}",
                expected, current
            )));
        }
        Ok(())
    }

    // Statistics

    /// Approximate record counts, for startup logging and dashboards
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_wallets: self.approximate_count(CF_WALLETS)?,
            total_payments: self.approximate_count(CF_PAYMENTS)?,
            total_jobs: self.approximate_count(CF_JOBS)?,
            total_escrows: self.approximate_count(CF_ESCROWS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("ledger store closed");
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate wallet count
    pub total_wallets: u64,
    /// Approximate payment count
    pub total_payments: u64,
    /// Approximate job count
    pub total_jobs: u64,
    /// Approximate escrow count
    pub total_escrows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, JobRequest, Location, PaymentKind, PaymentStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_job(client: &str) -> Job {
        Job::draft(
            UserId::new(client),
            JobRequest {
                pickup: Location::new(-1.28, 36.82),
                dropoff: Location::new(-4.04, 39.67),
                description: None,
                distance_km: None,
            },
            Utc::now(),
        )
    }

    fn test_payment(user: &str, amount: i64) -> Payment {
        Payment {
            id: Uuid::now_v7(),
            user_id: UserId::new(user),
            amount,
            kind: PaymentKind::Deposit,
            status: PaymentStatus::Completed,
            description: "test".to_string(),
            reference: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_wallet_roundtrip() {
        let (storage, _temp) = test_storage();

        let user = UserId::new("client-1");
        assert!(storage.get_wallet(&user).unwrap().is_none());

        let wallet = Wallet::new(user.clone(), Currency::USD, Utc::now());
        let mut batch = WriteBatch::default();
        storage.stage_wallet(&mut batch, &wallet).unwrap();
        storage.commit(batch, &[]).unwrap();

        let loaded = storage.get_wallet(&user).unwrap().unwrap();
        assert_eq!(loaded.balance, 0);
        assert_eq!(loaded.currency, Currency::USD);
    }

    #[test]
    fn test_batch_is_atomic() {
        let (storage, _temp) = test_storage();

        let mut wallet = Wallet::new(UserId::new("client-1"), Currency::USD, Utc::now());
        wallet.balance = 500;
        let payment = test_payment("client-1", 500);

        let mut batch = WriteBatch::default();
        storage.stage_wallet(&mut batch, &wallet).unwrap();
        storage.stage_payment(&mut batch, &payment).unwrap();
        storage.commit(batch, &[]).unwrap();

        assert_eq!(storage.get_wallet(&wallet.user_id).unwrap().unwrap().balance, 500);
        assert_eq!(storage.get_payment(payment.id).unwrap().unwrap().amount, 500);
        assert_eq!(storage.payments_for_user(&wallet.user_id).unwrap().len(), 1);
    }

    #[test]
    fn test_guard_rejects_stale_version() {
        let (storage, _temp) = test_storage();

        let mut wallet = Wallet::new(UserId::new("client-1"), Currency::USD, Utc::now());
        wallet.version = 1;
        let mut batch = WriteBatch::default();
        storage.stage_wallet(&mut batch, &wallet).unwrap();
        storage.commit(batch, &[]).unwrap();

        // Guard expects the wallet to be absent, but version 1 is stored
        let mut batch = WriteBatch::default();
        storage.stage_wallet(&mut batch, &wallet).unwrap();
        let result = storage.commit(
            batch,
            &[Guard::Wallet { user_id: wallet.user_id.clone(), expected: None }],
        );
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));

        // Matching guard passes
        let mut batch = WriteBatch::default();
        storage.stage_wallet(&mut batch, &wallet).unwrap();
        storage
            .commit(batch, &[Guard::Wallet { user_id: wallet.user_id.clone(), expected: Some(1) }])
            .unwrap();
    }

    #[test]
    fn test_status_index_follows_job() {
        let (storage, _temp) = test_storage();

        let mut job = test_job("client-1");
        let mut batch = WriteBatch::default();
        storage.stage_job(&mut batch, &job, None).unwrap();
        storage.commit(batch, &[]).unwrap();

        assert_eq!(storage.jobs_with_status(JobStatus::Draft).unwrap().len(), 1);
        assert!(storage.jobs_with_status(JobStatus::Pending).unwrap().is_empty());

        let prev = job.clone();
        job.status = JobStatus::Pending;
        job.version += 1;
        let mut batch = WriteBatch::default();
        storage.stage_job(&mut batch, &job, Some(&prev)).unwrap();
        storage.commit(batch, &[]).unwrap();

        assert!(storage.jobs_with_status(JobStatus::Draft).unwrap().is_empty());
        assert_eq!(storage.jobs_with_status(JobStatus::Pending).unwrap().len(), 1);
    }

    #[test]
    fn test_owner_indices() {
        let (storage, _temp) = test_storage();

        let mut job = test_job("client-1");
        let mut batch = WriteBatch::default();
        storage.stage_job(&mut batch, &job, None).unwrap();
        storage.commit(batch, &[]).unwrap();

        assert_eq!(storage.jobs_for_client(&UserId::new("client-1")).unwrap().len(), 1);
        assert!(storage.jobs_for_client(&UserId::new("client-2")).unwrap().is_empty());

        // Assign a transporter
        let prev = job.clone();
        job.transporter_id = Some(UserId::new("driver-1"));
        job.status = JobStatus::Accepted;
        job.version += 1;
        let mut batch = WriteBatch::default();
        storage.stage_job(&mut batch, &job, Some(&prev)).unwrap();
        storage.commit(batch, &[]).unwrap();

        assert_eq!(storage.jobs_for_transporter(&UserId::new("driver-1")).unwrap().len(), 1);
    }

    #[test]
    fn test_tracking_ordered_by_time() {
        let (storage, _temp) = test_storage();
        let job_id = Uuid::now_v7();

        for i in 0..3 {
            let record = TrackingRecord {
                id: Uuid::now_v7(),
                job_id,
                location: Location::new(-1.0 - i as f64, 36.0),
                recorded_at: Utc::now(),
            };
            let mut batch = WriteBatch::default();
            storage.stage_tracking(&mut batch, &record).unwrap();
            storage.commit(batch, &[]).unwrap();
        }

        let records = storage.tracking_for_job(job_id).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));

        // Other jobs see nothing
        assert!(storage.tracking_for_job(Uuid::now_v7()).unwrap().is_empty());
    }
}
