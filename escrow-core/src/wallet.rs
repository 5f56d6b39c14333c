//! Wallet ledger
//!
//! The single owner of balance mutation. Every delta is applied together
//! with its audit [`Payment`] in the caller's transaction scope: both effects
//! or neither. Balances are unsigned minor units, so a negative balance is
//! unrepresentable; the overdraft check happens in the same scope as the
//! apply, never as a separate read.

use crate::{
    error::{Error, Result},
    txn::Txn,
    types::{Currency, Payment, PaymentKind, PaymentStatus, UserId, Wallet},
};
use uuid::Uuid;

/// Applies signed monetary deltas, pairing each with a payment record
#[derive(Debug, Clone)]
pub(crate) struct WalletLedger {
    default_currency: Currency,
}

impl WalletLedger {
    pub fn new(default_currency: Currency) -> Self {
        Self { default_currency }
    }

    /// Apply a signed delta to a wallet and stage the paired payment.
    ///
    /// Creates the wallet lazily with balance 0. Fails with
    /// [`Error::InsufficientFunds`] before staging anything if a debit would
    /// overdraw.
    pub fn apply_delta(
        &self,
        txn: &mut Txn<'_>,
        user_id: &UserId,
        amount: i64,
        kind: PaymentKind,
        description: String,
        reference: Option<String>,
    ) -> Result<Payment> {
        let mut wallet = match txn.wallet(user_id)? {
            Some(wallet) => wallet,
            None => Wallet::new(user_id.clone(), self.default_currency, txn.now()),
        };

        wallet.balance = if amount >= 0 {
            wallet
                .balance
                .checked_add(amount as u64)
                .ok_or_else(|| Error::InvalidState("wallet balance overflow".to_string()))?
        } else {
            let debit = amount.unsigned_abs();
            wallet
                .balance
                .checked_sub(debit)
                .ok_or(Error::InsufficientFunds { balance: wallet.balance, requested: debit })?
        };

        let payment = Payment {
            id: Uuid::now_v7(),
            user_id: user_id.clone(),
            amount,
            kind,
            status: PaymentStatus::Completed,
            description,
            reference,
            created_at: txn.now(),
        };

        txn.put_wallet(wallet)?;
        txn.put_payment(&payment)?;

        tracing::debug!(user_id = %user_id, amount, kind = kind.as_str(), "staged wallet delta");

        Ok(payment)
    }

    /// Credit a wallet from an external payment method
    pub fn deposit(
        &self,
        txn: &mut Txn<'_>,
        user_id: &UserId,
        amount: u64,
        method: &str,
    ) -> Result<Payment> {
        if amount == 0 {
            return Err(Error::InvalidState("deposit amount must be positive".to_string()));
        }
        self.apply_delta(
            txn,
            user_id,
            amount as i64,
            PaymentKind::Deposit,
            format!("wallet top-up via {}", method),
            None,
        )
    }

    /// Move funds out to an external bank reference
    pub fn withdraw(
        &self,
        txn: &mut Txn<'_>,
        user_id: &UserId,
        amount: u64,
        bank_ref: &str,
    ) -> Result<Payment> {
        if amount == 0 {
            return Err(Error::InvalidState("withdrawal amount must be positive".to_string()));
        }
        self.apply_delta(
            txn,
            user_id,
            -(amount as i64),
            PaymentKind::Withdrawal,
            format!("withdrawal to {}", bank_ref),
            Some(bank_ref.to_string()),
        )
    }
}
