//! Error types for the marketplace ledger

use crate::types::JobStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Validation failures are detected before any mutation and carry no partial
/// effect. Infrastructure faults (storage, serialization, timeouts, write
/// conflicts) all fold into [`Error::StoreUnavailable`], which is safely
/// retryable because the whole atomic scope aborts.
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet balance cannot cover the requested debit
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at check time, minor units
        balance: u64,
        /// Debit that was requested, minor units
        requested: u64,
    },

    /// Status transition not in the transition table
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// Actor may not perform this operation on this job
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// An escrow already exists for this job
    #[error("job {0} already escrowed")]
    JobAlreadyEscrowed(Uuid),

    /// No escrow exists for this job
    #[error("no escrow for job {0}")]
    EscrowNotFound(Uuid),

    /// Escrow is already released or refunded
    #[error("escrow for job {0} already finalized")]
    EscrowAlreadyFinalized(Uuid),

    /// Release requires an assigned transporter
    #[error("job {0} has no transporter assigned")]
    NoTransporterAssigned(Uuid),

    /// Operation not valid in the entity's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage fault, timeout, or write conflict; the atomic scope was
    /// aborted and the operation may be retried
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl Error {
    /// Whether retrying the identical request is safe and may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}
