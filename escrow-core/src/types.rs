//! Core types for the marketplace ledger
//!
//! All records are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer minor currency units, never floats)
//! - Optimistic concurrency (mutable records carry a version counter)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier, as issued by the external identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role attached to a verified identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Shipper who posts and funds jobs
    Client,
    /// Driver who accepts and executes jobs
    Transporter,
}

/// A verified `(user, role)` pair supplied by the identity provider.
///
/// The core trusts this pair and performs no authentication itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Verified user ID
    pub user_id: UserId,
    /// Verified role
    pub role: Role,
}

impl Actor {
    /// Client actor
    pub fn client(id: impl Into<String>) -> Self {
        Self { user_id: UserId::new(id), role: Role::Client }
    }

    /// Transporter actor
    pub fn transporter(id: impl Into<String>) -> Self {
        Self { user_id: UserId::new(id), role: Role::Transporter }
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// Kenyan Shilling
    KES,
    /// Nigerian Naira
    NGN,
    /// Tanzanian Shilling
    TZS,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::KES => "KES",
            Currency::NGN => "NGN",
            Currency::TZS => "TZS",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "KES" => Some(Currency::KES),
            "NGN" => Some(Currency::NGN),
            "TZS" => Some(Currency::TZS),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Geographic coordinate with an optional human-readable address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Reverse-geocoded address, if known
    pub address: Option<String>,
}

impl Location {
    /// Create a bare coordinate
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, address: None }
    }
}

/// Per-user stored balance
///
/// Balances are minor currency units and non-negative by construction.
/// Every balance change is paired with exactly one [`Payment`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner (unique key)
    pub user_id: UserId,
    /// Balance in minor currency units
    pub balance: u64,
    /// Wallet currency
    pub currency: Currency,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped on every write
    pub version: u64,
}

impl Wallet {
    /// Fresh zero-balance wallet
    pub fn new(user_id: UserId, currency: Currency, created_at: DateTime<Utc>) -> Self {
        Self { user_id, balance: 0, currency, created_at, version: 0 }
    }
}

/// Classification of a balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaymentKind {
    /// Funds added from an external source
    Deposit = 1,
    /// Funds moved out to an external destination
    Withdrawal = 2,
    /// Escrow hold (debit) or escrow refund (credit)
    Escrow = 3,
    /// Escrow released to the transporter
    EscrowRelease = 4,
    /// Platform fee
    Fee = 5,
}

impl PaymentKind {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Deposit => "deposit",
            PaymentKind::Withdrawal => "withdrawal",
            PaymentKind::Escrow => "escrow",
            PaymentKind::EscrowRelease => "escrow_release",
            PaymentKind::Fee => "fee",
        }
    }
}

/// Processing status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaymentStatus {
    /// Awaiting external confirmation
    Pending = 1,
    /// Applied to the wallet
    Completed = 2,
    /// Rejected by the external processor
    Failed = 3,
}

/// Immutable audit record of one balance-affecting event
///
/// Append-only: once `Completed`, amount and kind never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment ID (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Wallet owner this payment applies to
    pub user_id: UserId,
    /// Signed amount in minor units; positive = credit, negative = debit
    pub amount: i64,
    /// Payment classification
    pub kind: PaymentKind,
    /// Processing status
    pub status: PaymentStatus,
    /// Free-form description (entity data, not error text)
    pub description: String,
    /// External reference (gateway id, bank ref), if any
    pub reference: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Escrow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EscrowStatus {
    /// Funds held by the platform
    Held = 1,
    /// Funds paid out to the transporter (terminal)
    Released = 2,
    /// Funds returned to the client (terminal)
    Refunded = 3,
}

impl EscrowStatus {
    /// Terminal states are never exited
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

/// Funds held between job funding and completion/cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    /// Unique escrow ID
    pub id: Uuid,
    /// Job this escrow funds (unique; one escrow per job)
    pub job_id: Uuid,
    /// Held amount in minor units, always positive
    pub amount: u64,
    /// Current status
    pub status: EscrowStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency counter
    pub version: u64,
}

/// Job status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    /// Created, not yet funded
    Draft = 1,
    /// Funded and visible to transporters
    Pending = 2,
    /// Claimed by a transporter
    Accepted = 3,
    /// Cargo collected
    PickedUp = 4,
    /// En route
    InTransit = 5,
    /// Cargo dropped off
    Delivered = 6,
    /// Finished, escrow released (terminal)
    Completed = 7,
    /// Abandoned, escrow refunded if held (terminal)
    Cancelled = 8,
}

impl JobStatus {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Pending => "pending",
            JobStatus::Accepted => "accepted",
            JobStatus::PickedUp => "picked_up",
            JobStatus::InTransit => "in_transit",
            JobStatus::Delivered => "delivered",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(JobStatus::Draft),
            "pending" => Some(JobStatus::Pending),
            "accepted" => Some(JobStatus::Accepted),
            "picked_up" => Some(JobStatus::PickedUp),
            "in_transit" => Some(JobStatus::InTransit),
            "delivered" => Some(JobStatus::Delivered),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never exited
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Whether the transition `self -> target` is in the transition table
    pub fn can_transition_to(self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Accepted)
                | (Pending, Cancelled)
                | (Accepted, PickedUp)
                | (Accepted, Cancelled)
                | (PickedUp, InTransit)
                | (PickedUp, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Cancelled)
                | (Delivered, Completed)
        )
    }

    /// Allowed next statuses
    pub fn allowed_next(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Draft => &[Pending, Cancelled],
            Pending => &[Accepted, Cancelled],
            Accepted => &[PickedUp, Cancelled],
            PickedUp => &[InTransit, Cancelled],
            InTransit => &[Delivered, Cancelled],
            Delivered => &[Completed],
            Completed | Cancelled => &[],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for creating a draft job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Where the cargo is collected
    pub pickup: Location,
    /// Where the cargo is delivered
    pub dropoff: Location,
    /// Free-form cargo description
    pub description: Option<String>,
    /// Client-estimated distance in kilometers
    pub distance_km: Option<f64>,
}

/// A shipment request and its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: Uuid,
    /// Owning client
    pub client_id: UserId,
    /// Assigned transporter; set when the job is accepted
    pub transporter_id: Option<UserId>,
    /// Pickup location
    pub pickup: Location,
    /// Dropoff location
    pub dropoff: Location,
    /// Cargo description
    pub description: Option<String>,
    /// Agreed price in minor units; 0 until published, then equals the
    /// escrow amount
    pub price: u64,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Latest reported transporter location
    pub current_location: Option<Location>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Stamped on transition into `picked_up`
    pub start_time: Option<DateTime<Utc>>,
    /// Stamped on transition into `delivered`
    pub end_time: Option<DateTime<Utc>>,
    /// Estimated distance in kilometers
    pub distance_km: Option<f64>,
    /// Client rating (1-5), set after completion
    pub rating: Option<u8>,
    /// Optimistic-concurrency counter
    pub version: u64,
}

impl Job {
    /// New draft job from a creation request
    pub fn draft(client_id: UserId, request: JobRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            client_id,
            transporter_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            description: request.description,
            price: 0,
            status: JobStatus::Draft,
            current_location: None,
            created_at,
            updated_at: created_at,
            start_time: None,
            end_time: None,
            distance_km: request.distance_km,
            rating: None,
            version: 0,
        }
    }
}

/// Append-only location breadcrumb for a job in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Unique record ID (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Job being tracked
    pub job_id: Uuid,
    /// Reported location
    pub location: Location,
    /// Report timestamp
    pub recorded_at: DateTime<Utc>,
}
