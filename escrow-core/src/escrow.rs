//! Escrow manager
//!
//! Holds funds between job funding and settlement. A hold debits the client
//! and creates the escrow in the same scope; release pays the transporter;
//! refund returns the funds to the client. Terminal escrows reject further
//! transitions, so a retried release or refund cannot credit twice.

use crate::{
    error::{Error, Result},
    txn::Txn,
    types::{Escrow, EscrowStatus, PaymentKind, UserId},
    wallet::WalletLedger,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct EscrowManager {
    wallets: WalletLedger,
}

impl EscrowManager {
    pub fn new(wallets: WalletLedger) -> Self {
        Self { wallets }
    }

    /// Debit the client and create a `Held` escrow for the job.
    pub fn hold(
        &self,
        txn: &mut Txn<'_>,
        job_id: Uuid,
        client_id: &UserId,
        amount: u64,
    ) -> Result<Escrow> {
        if amount == 0 {
            return Err(Error::InvalidState("escrow amount must be positive".to_string()));
        }
        if txn.escrow(job_id)?.is_some() {
            return Err(Error::JobAlreadyEscrowed(job_id));
        }

        self.wallets.apply_delta(
            txn,
            client_id,
            -(amount as i64),
            PaymentKind::Escrow,
            format!("escrow hold for job {}", job_id),
            None,
        )?;

        let escrow = txn.put_escrow(Escrow {
            id: Uuid::now_v7(),
            job_id,
            amount,
            status: EscrowStatus::Held,
            created_at: txn.now(),
            version: 0,
        })?;

        tracing::info!(job_id = %job_id, amount, "escrow held");

        Ok(escrow)
    }

    /// Mark the escrow released and credit the assigned transporter.
    pub fn release(&self, txn: &mut Txn<'_>, job_id: Uuid) -> Result<Escrow> {
        let mut escrow = txn.escrow(job_id)?.ok_or(Error::EscrowNotFound(job_id))?;
        if escrow.status.is_terminal() {
            return Err(Error::EscrowAlreadyFinalized(job_id));
        }

        let job = txn
            .job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        let transporter = job
            .transporter_id
            .as_ref()
            .ok_or(Error::NoTransporterAssigned(job_id))?
            .clone();

        self.wallets.apply_delta(
            txn,
            &transporter,
            escrow.amount as i64,
            PaymentKind::EscrowRelease,
            format!("payment received for job {}", job_id),
            None,
        )?;

        escrow.status = EscrowStatus::Released;
        let escrow = txn.put_escrow(escrow)?;

        tracing::info!(job_id = %job_id, transporter = %transporter, amount = escrow.amount, "escrow released");

        Ok(escrow)
    }

    /// Mark the escrow refunded and credit the client back. Legal only from
    /// `Held`.
    pub fn refund(&self, txn: &mut Txn<'_>, job_id: Uuid) -> Result<Escrow> {
        let mut escrow = txn.escrow(job_id)?.ok_or(Error::EscrowNotFound(job_id))?;
        if escrow.status.is_terminal() {
            return Err(Error::EscrowAlreadyFinalized(job_id));
        }

        let job = txn
            .job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        self.wallets.apply_delta(
            txn,
            &job.client_id,
            escrow.amount as i64,
            PaymentKind::Escrow,
            format!("escrow refund for job {}", job_id),
            None,
        )?;

        escrow.status = EscrowStatus::Refunded;
        let escrow = txn.put_escrow(escrow)?;

        tracing::info!(job_id = %job_id, client = %job.client_id, amount = escrow.amount, "escrow refunded");

        Ok(escrow)
    }
}
