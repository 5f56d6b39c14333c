//! Job lifecycle manager
//!
//! Owns the job status state machine and coordinates the escrow manager at
//! the three points where status and money must move together: publish
//! (hold), completion (release), and cancellation (refund). Each operation
//! runs inside the caller's transaction scope, so the status write and the
//! fund movement commit together or not at all.

use crate::{
    error::{Error, Result},
    escrow::EscrowManager,
    txn::Txn,
    types::{Actor, EscrowStatus, Job, JobRequest, JobStatus, Location, Role, TrackingRecord, UserId},
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct JobLifecycle {
    escrows: EscrowManager,
}

impl JobLifecycle {
    pub fn new(escrows: EscrowManager) -> Self {
        Self { escrows }
    }

    /// Insert a draft job. No funds move.
    pub fn create_job(
        &self,
        txn: &mut Txn<'_>,
        client_id: &UserId,
        request: JobRequest,
    ) -> Result<Job> {
        let job = txn.put_job(Job::draft(client_id.clone(), request, txn.now()), None)?;

        tracing::info!(job_id = %job.id, client = %client_id, "job created");
        Ok(job)
    }

    /// Fund a draft job and make it visible to transporters.
    ///
    /// The escrow hold and the `draft -> pending` transition share the
    /// scope: if the hold fails the job stays `draft`. A retry of an
    /// already-published job returns the existing job when the held escrow
    /// matches the requested amount.
    pub fn publish(&self, txn: &mut Txn<'_>, job_id: Uuid, amount: u64) -> Result<Job> {
        let job = self.load(txn, job_id)?;

        if job.status == JobStatus::Pending {
            match txn.escrow(job_id)? {
                Some(escrow) if escrow.status == EscrowStatus::Held && escrow.amount == amount => {
                    return Ok(job);
                }
                _ => {
                    return Err(Error::IllegalTransition {
                        from: JobStatus::Pending,
                        to: JobStatus::Pending,
                    })
                }
            }
        }

        if job.status != JobStatus::Draft {
            return Err(Error::IllegalTransition { from: job.status, to: JobStatus::Pending });
        }

        self.escrows.hold(txn, job_id, &job.client_id, amount)?;

        let prev = job.clone();
        let mut job = job;
        job.price = amount;
        job.status = JobStatus::Pending;
        job.updated_at = txn.now();
        let job = txn.put_job(job, Some(&prev))?;

        tracing::info!(job_id = %job_id, amount, "job published");
        Ok(job)
    }

    /// Apply one status transition, with its escrow side effects.
    ///
    /// Re-requesting the status a job already has returns the job unchanged,
    /// which makes retries of a timed-out call safe: the escrow records show
    /// the work was already done and no funds move twice.
    pub fn advance_status(
        &self,
        txn: &mut Txn<'_>,
        job_id: Uuid,
        target: JobStatus,
        actor: &Actor,
    ) -> Result<Job> {
        let job = self.load(txn, job_id)?;

        if job.status == target {
            // Retry of an already-applied call; only a party to the job may
            // observe it as success
            let is_party = job.client_id == actor.user_id
                || job.transporter_id.as_ref() == Some(&actor.user_id);
            if is_party {
                return Ok(job);
            }
            return Err(Error::NotAuthorized("actor is not a party to this job".to_string()));
        }

        if target == JobStatus::Pending {
            // Funds must be held alongside this transition; publish is the
            // only door into pending
            return Err(Error::InvalidState(
                "pending is entered via publish, which holds the escrow".to_string(),
            ));
        }

        if !job.status.can_transition_to(target) {
            return Err(Error::IllegalTransition { from: job.status, to: target });
        }

        Self::authorize(&job, target, actor)?;

        let prev = job.clone();
        let mut job = job;

        match target {
            JobStatus::Accepted => {
                job.transporter_id = Some(actor.user_id.clone());
            }
            JobStatus::PickedUp => {
                job.start_time = Some(txn.now());
            }
            JobStatus::Delivered => {
                job.end_time = Some(txn.now());
            }
            JobStatus::Completed => {
                self.escrows.release(txn, job_id)?;
            }
            JobStatus::Cancelled => {
                if let Some(escrow) = txn.escrow(job_id)? {
                    if escrow.status == EscrowStatus::Held {
                        self.escrows.refund(txn, job_id)?;
                    }
                }
            }
            _ => {}
        }

        job.status = target;
        job.updated_at = txn.now();
        let job = txn.put_job(job, Some(&prev))?;

        tracing::info!(job_id = %job_id, from = %prev.status, to = %target, actor = %actor.user_id, "job status advanced");
        Ok(job)
    }

    /// Append a tracking breadcrumb and update the job's current location.
    pub fn record_location(
        &self,
        txn: &mut Txn<'_>,
        job_id: Uuid,
        location: Location,
        actor: &Actor,
    ) -> Result<TrackingRecord> {
        let job = self.load(txn, job_id)?;

        if job.transporter_id.as_ref() != Some(&actor.user_id) {
            return Err(Error::NotAuthorized(
                "only the assigned transporter may report locations".to_string(),
            ));
        }

        if !matches!(
            job.status,
            JobStatus::Accepted | JobStatus::PickedUp | JobStatus::InTransit
        ) {
            return Err(Error::InvalidState(format!(
                "cannot record location while job is {}",
                job.status
            )));
        }

        let record = TrackingRecord {
            id: Uuid::now_v7(),
            job_id,
            location: location.clone(),
            recorded_at: txn.now(),
        };
        txn.put_tracking(&record)?;

        let prev = job.clone();
        let mut job = job;
        job.current_location = Some(location);
        job.updated_at = txn.now();
        txn.put_job(job, Some(&prev))?;

        Ok(record)
    }

    /// Record the client's rating of a completed job.
    pub fn rate_job(
        &self,
        txn: &mut Txn<'_>,
        job_id: Uuid,
        rating: u8,
        actor: &Actor,
    ) -> Result<Job> {
        let job = self.load(txn, job_id)?;

        if job.client_id != actor.user_id {
            return Err(Error::NotAuthorized("only the client may rate a job".to_string()));
        }
        if job.status != JobStatus::Completed {
            return Err(Error::InvalidState("only completed jobs can be rated".to_string()));
        }
        if !(1..=5).contains(&rating) {
            return Err(Error::InvalidState("rating must be between 1 and 5".to_string()));
        }

        let prev = job.clone();
        let mut job = job;
        job.rating = Some(rating);
        job.updated_at = txn.now();
        let job = txn.put_job(job, Some(&prev))?;

        Ok(job)
    }

    fn load(&self, txn: &mut Txn<'_>, job_id: Uuid) -> Result<Job> {
        txn.job(job_id)?.ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    fn authorize(job: &Job, target: JobStatus, actor: &Actor) -> Result<()> {
        match target {
            JobStatus::Cancelled => {
                if job.client_id != actor.user_id {
                    return Err(Error::NotAuthorized(
                        "only the client may cancel a job".to_string(),
                    ));
                }
            }
            JobStatus::Accepted => {
                if actor.role != Role::Transporter {
                    return Err(Error::NotAuthorized(
                        "only a transporter may accept a job".to_string(),
                    ));
                }
                if job.transporter_id.is_some() {
                    return Err(Error::NotAuthorized(
                        "job already has a transporter".to_string(),
                    ));
                }
            }
            JobStatus::PickedUp | JobStatus::InTransit | JobStatus::Delivered
            | JobStatus::Completed => {
                if job.transporter_id.as_ref() != Some(&actor.user_id) {
                    return Err(Error::NotAuthorized(
                        "only the assigned transporter may advance this job".to_string(),
                    ));
                }
            }
            // Draft is never a transition target; Pending is rejected above
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::Currency;
    use crate::wallet::WalletLedger;
    use crate::Config;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn lifecycle() -> JobLifecycle {
        JobLifecycle::new(EscrowManager::new(WalletLedger::new(Currency::USD)))
    }

    fn request() -> JobRequest {
        JobRequest {
            pickup: Location::new(-1.28, 36.82),
            dropoff: Location::new(-4.04, 39.67),
            description: Some("pallets".to_string()),
            distance_km: Some(485.0),
        }
    }

    fn seed_balance(storage: &Storage, user: &str, amount: u64) {
        let mut txn = Txn::begin(storage);
        WalletLedger::new(Currency::USD)
            .deposit(&mut txn, &UserId::new(user), amount, "test")
            .unwrap();
        txn.commit().unwrap();
    }

    fn balance(storage: &Storage, user: &str) -> u64 {
        storage.get_wallet(&UserId::new(user)).unwrap().map(|w| w.balance).unwrap_or(0)
    }

    fn run<T>(
        storage: &Storage,
        f: impl FnOnce(&mut Txn<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = Txn::begin(storage);
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }

    fn published_job(storage: &Storage, jobs: &JobLifecycle, amount: u64) -> Job {
        seed_balance(storage, "client-1", amount);
        let job =
            run(storage, |txn| jobs.create_job(txn, &UserId::new("client-1"), request())).unwrap();
        run(storage, |txn| jobs.publish(txn, job.id, amount)).unwrap()
    }

    #[test]
    fn test_create_job_is_draft_without_funds() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();

        let job =
            run(&storage, |txn| jobs.create_job(txn, &UserId::new("client-1"), request())).unwrap();

        assert_eq!(job.status, JobStatus::Draft);
        assert_eq!(job.price, 0);
        assert!(storage.get_escrow(job.id).unwrap().is_none());
        assert!(storage.get_wallet(&UserId::new("client-1")).unwrap().is_none());
    }

    #[test]
    fn test_publish_holds_escrow_and_sets_price() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();

        let job = published_job(&storage, &jobs, 50_000);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.price, 50_000);
        assert_eq!(balance(&storage, "client-1"), 0);
        assert_eq!(storage.get_escrow(job.id).unwrap().unwrap().status, EscrowStatus::Held);
    }

    #[test]
    fn test_publish_failure_leaves_job_draft() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        seed_balance(&storage, "client-1", 100);

        let job =
            run(&storage, |txn| jobs.create_job(txn, &UserId::new("client-1"), request())).unwrap();

        let err = run(&storage, |txn| jobs.publish(txn, job.id, 50_000)).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));

        let stored = storage.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Draft);
        assert!(storage.get_escrow(job.id).unwrap().is_none());
        assert_eq!(balance(&storage, "client-1"), 100);
    }

    #[test]
    fn test_publish_retry_returns_existing_job() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();

        let job = published_job(&storage, &jobs, 50_000);

        // Identical retry is a no-op success
        let again = run(&storage, |txn| jobs.publish(txn, job.id, 50_000)).unwrap();
        assert_eq!(again.status, JobStatus::Pending);
        assert_eq!(balance(&storage, "client-1"), 0);
        assert_eq!(
            storage.payments_for_user(&UserId::new("client-1")).unwrap().len(),
            2 // one deposit, one escrow debit
        );

        // Different amount is not a retry
        let err = run(&storage, |txn| jobs.publish(txn, job.id, 60_000)).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }

    #[test]
    fn test_full_lifecycle_releases_escrow_on_completion() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let driver = Actor::transporter("driver-1");

        let job = published_job(&storage, &jobs, 50_000);

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Accepted, &driver)
        })
        .unwrap();
        assert_eq!(job.transporter_id, Some(UserId::new("driver-1")));

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::PickedUp, &driver)
        })
        .unwrap();
        assert!(job.start_time.is_some());

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::InTransit, &driver)
        })
        .unwrap();

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Delivered, &driver)
        })
        .unwrap();
        assert!(job.end_time.is_some());

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Completed, &driver)
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        assert_eq!(storage.get_escrow(job.id).unwrap().unwrap().status, EscrowStatus::Released);
        assert_eq!(balance(&storage, "driver-1"), 50_000);
        assert_eq!(balance(&storage, "client-1"), 0);
    }

    #[test]
    fn test_cancel_refunds_held_escrow() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let client = Actor::client("client-1");

        let job = published_job(&storage, &jobs, 50_000);
        assert_eq!(balance(&storage, "client-1"), 0);

        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Cancelled, &client)
        })
        .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(storage.get_escrow(job.id).unwrap().unwrap().status, EscrowStatus::Refunded);
        assert_eq!(balance(&storage, "client-1"), 50_000);
    }

    #[test]
    fn test_cancel_draft_has_no_escrow_to_refund() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let client = Actor::client("client-1");

        let job =
            run(&storage, |txn| jobs.create_job(txn, &UserId::new("client-1"), request())).unwrap();
        let job = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Cancelled, &client)
        })
        .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(storage.get_escrow(job.id).unwrap().is_none());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let driver = Actor::transporter("driver-1");

        let job = published_job(&storage, &jobs, 10_000);

        // Cannot skip straight to delivered
        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Delivered, &driver)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalTransition { from: JobStatus::Pending, to: JobStatus::Delivered }
        ));

        // Pending is only reachable via publish
        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Pending, &driver)
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_terminal_states_never_exited() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let client = Actor::client("client-1");
        let driver = Actor::transporter("driver-1");

        let job = published_job(&storage, &jobs, 10_000);
        run(&storage, |txn| jobs.advance_status(txn, job.id, JobStatus::Cancelled, &client))
            .unwrap();

        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Accepted, &driver)
        })
        .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { from: JobStatus::Cancelled, .. }));
    }

    #[test]
    fn test_authorization_rules() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let client = Actor::client("client-1");
        let driver = Actor::transporter("driver-1");
        let other_driver = Actor::transporter("driver-2");
        let stranger = Actor::client("client-2");

        let job = published_job(&storage, &jobs, 10_000);

        // A client cannot accept
        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Accepted, &client)
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        // Only the owning client cancels
        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Cancelled, &stranger)
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        run(&storage, |txn| jobs.advance_status(txn, job.id, JobStatus::Accepted, &driver))
            .unwrap();

        // A second transporter cannot take over
        let err = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::PickedUp, &other_driver)
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
    }

    #[test]
    fn test_advance_retry_is_idempotent() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let driver = Actor::transporter("driver-1");

        let job = published_job(&storage, &jobs, 50_000);
        for target in [
            JobStatus::Accepted,
            JobStatus::PickedUp,
            JobStatus::InTransit,
            JobStatus::Delivered,
            JobStatus::Completed,
        ] {
            run(&storage, |txn| jobs.advance_status(txn, job.id, target, &driver)).unwrap();
        }
        assert_eq!(balance(&storage, "driver-1"), 50_000);

        // Retrying the final call changes nothing and credits nothing
        let again = run(&storage, |txn| {
            jobs.advance_status(txn, job.id, JobStatus::Completed, &driver)
        })
        .unwrap();
        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(balance(&storage, "driver-1"), 50_000);
        assert_eq!(storage.payments_for_user(&UserId::new("driver-1")).unwrap().len(), 1);
    }

    #[test]
    fn test_record_location_rules() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let driver = Actor::transporter("driver-1");
        let other = Actor::transporter("driver-2");

        let job = published_job(&storage, &jobs, 10_000);

        // Not allowed before acceptance (no transporter yet)
        let err = run(&storage, |txn| {
            jobs.record_location(txn, job.id, Location::new(-1.3, 36.8), &driver)
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        run(&storage, |txn| jobs.advance_status(txn, job.id, JobStatus::Accepted, &driver))
            .unwrap();

        run(&storage, |txn| {
            jobs.record_location(txn, job.id, Location::new(-1.3, 36.8), &driver)
        })
        .unwrap();
        run(&storage, |txn| {
            jobs.record_location(txn, job.id, Location::new(-1.4, 36.9), &driver)
        })
        .unwrap();

        // Someone else's report is rejected
        let err = run(&storage, |txn| {
            jobs.record_location(txn, job.id, Location::new(0.0, 0.0), &other)
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        let stored = storage.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.current_location, Some(Location::new(-1.4, 36.9)));
        assert_eq!(storage.tracking_for_job(job.id).unwrap().len(), 2);

        // Not allowed once delivered
        for target in [JobStatus::PickedUp, JobStatus::InTransit, JobStatus::Delivered] {
            run(&storage, |txn| jobs.advance_status(txn, job.id, target, &driver)).unwrap();
        }
        let err = run(&storage, |txn| {
            jobs.record_location(txn, job.id, Location::new(-4.0, 39.7), &driver)
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_rate_job_after_completion() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();
        let client = Actor::client("client-1");
        let driver = Actor::transporter("driver-1");

        let job = published_job(&storage, &jobs, 10_000);

        // Cannot rate before completion
        let err = run(&storage, |txn| jobs.rate_job(txn, job.id, 5, &client)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        for target in [
            JobStatus::Accepted,
            JobStatus::PickedUp,
            JobStatus::InTransit,
            JobStatus::Delivered,
            JobStatus::Completed,
        ] {
            run(&storage, |txn| jobs.advance_status(txn, job.id, target, &driver)).unwrap();
        }

        // Transporter cannot rate, and ratings are bounded
        let err = run(&storage, |txn| jobs.rate_job(txn, job.id, 5, &driver)).unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
        let err = run(&storage, |txn| jobs.rate_job(txn, job.id, 6, &client)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let rated = run(&storage, |txn| jobs.rate_job(txn, job.id, 4, &client)).unwrap();
        assert_eq!(rated.rating, Some(4));
    }

    #[test]
    fn test_missing_job_is_not_found() {
        let (storage, _temp) = test_storage();
        let jobs = lifecycle();

        let err = run(&storage, |txn| jobs.publish(txn, Uuid::now_v7(), 1_000)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
