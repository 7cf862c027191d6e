use crate::types::Cents;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettleError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Validation ─────────────────────────────────────────────
    #[error("Invalid amount {amount} for {context}")]
    InvalidAmount { amount: Cents, context: &'static str },

    #[error("Tier split must sum to 100, got {creator_pct} + {platform_pct}")]
    InvalidTierSplit { creator_pct: f64, platform_pct: f64 },

    #[error("Invalid pool contribution: {detail}")]
    InvalidPoolContribution { detail: String },

    #[error("Transaction kind '{kind}' requires a {role}")]
    MissingParty { kind: String, role: &'static str },

    // ── State conflicts ────────────────────────────────────────
    #[error("Transaction already completed")]
    AlreadyCompleted,

    #[error("Transaction is {status}; settled records are immutable")]
    TerminalStateConflict { status: String },

    #[error("Cannot {action} a transaction in status '{current}'; requires '{required}'")]
    InvalidTransition {
        action: &'static str,
        current: String,
        required: &'static str,
    },

    #[error("Transaction of kind '{kind}' in status '{status}' is not refundable")]
    NotRefundable { kind: String, status: String },

    #[error("License '{id}' not found")]
    LicenseNotFound { id: String },

    #[error("License '{id}' is {status}, expected pending")]
    LicenseNotPending { id: String, status: String },

    #[error("License '{id}' is {status}; cannot {action}")]
    LicenseStateConflict {
        id: String,
        status: String,
        action: &'static str,
    },

    #[error("Business '{business}' is not the licensee of license '{license}'")]
    NotLicensee { business: String, license: String },

    #[error("Business '{business}' does not own media '{media}'")]
    NotMediaOwner { business: String, media: String },

    #[error("Business '{business}' is not a party to license '{license}'")]
    NotLicenseParty { business: String, license: String },

    // ── Resource limits ────────────────────────────────────────
    #[error("Payout of {requested} cents is below the {minimum} cent minimum")]
    BelowMinimumPayout { requested: Cents, minimum: Cents },

    #[error("Insufficient balance: {available} cents available, {requested} requested")]
    InsufficientBalance { available: Cents, requested: Cents },

    #[error("Business '{business}' has no payout-enabled Connect account")]
    NoConnectAccount { business: String },

    #[error(
        "Active license limit reached for tier '{tier}' ({current}/{limit}); \
         upgrade the tier to raise the limit"
    )]
    LicenseLimitReached {
        tier: String,
        current: i64,
        limit: i64,
    },

    // ── Missing entities ───────────────────────────────────────
    #[error("Business '{id}' not found")]
    BusinessNotFound { id: String },

    #[error("Media '{id}' not found")]
    MediaNotFound { id: String },

    #[error("Transaction '{id}' not found")]
    TransactionNotFound { id: String },

    // ── Distribution integrity ─────────────────────────────────
    #[error("Distribution mismatch: members sum to {distributed} cents, expected {expected}")]
    DistributionMismatch { expected: Cents, distributed: Cents },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SettleResult<T> = Result<T, SettleError>;
