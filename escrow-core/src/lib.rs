//! Escrow Core
//!
//! Money-and-job-lifecycle ledger for a logistics marketplace: the rules
//! governing a job's status progression, and the escrow-backed wallet
//! transactions that move funds between a client's wallet, an escrow holding
//! account, and a transporter's wallet.
//!
//! # Architecture
//!
//! - **Single Writer**: all mutations serialize through one actor task
//! - **Atomic Scopes**: every multi-record mutation is one RocksDB batch
//! - **Version Guards**: compare-and-swap per entity, checked at commit
//! - **Integer Money**: minor currency units, never floating point
//!
//! # Invariants
//!
//! - Wallet balances are never negative
//! - Every balance change pairs with exactly one payment record
//! - Conservation: release/refund moves exactly the held amount, once
//! - Job statuses only ever walk the transition table; terminal states are
//!   never exited

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod storage;
pub mod types;

pub(crate) mod actor;
pub(crate) mod escrow;
pub(crate) mod jobs;
pub(crate) mod txn;
pub(crate) mod wallet;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::EscrowLedger;
pub use notify::{Notice, Notifier};
pub use types::{
    Actor, Currency, Escrow, EscrowStatus, Job, JobRequest, JobStatus, Location, Payment,
    PaymentKind, PaymentStatus, Role, TrackingRecord, UserId, Wallet,
};
