//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services call store methods; they never execute SQL directly.
//!
//! Counter and balance mutations are SQL delta updates (`SET x = x + ?`),
//! never read-modify-write, so concurrent settlement and manual-action paths
//! cannot lose updates. Multi-entity mutations run inside
//! [`SettleStore::transactionally`].

mod business;
mod license;
mod pool;
mod transaction;

pub use transaction::RevenueSummary;

use crate::{
    error::SettleResult,
    types::{Cents, EntityId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

pub struct SettleStore {
    conn: Connection,
}

impl SettleStore {
    pub fn open(path: &str) -> SettleResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SettleResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SettleResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_settlement.sql"))?;
        Ok(())
    }

    /// Run `f` inside one SQL transaction: the ledger record, the license,
    /// and the business balances commit together or not at all. Any error
    /// rolls everything back, leaving the event safe to redeliver.
    pub fn transactionally<T>(
        &self,
        f: impl FnOnce(&Self) -> SettleResult<T>,
    ) -> SettleResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Idempotency claims ─────────────────────────────────────

    /// Claim a provider event id. Returns false when the id was already
    /// claimed, i.e. the delivery is a duplicate.
    pub fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> SettleResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO processed_event (event_id, event_type, processed_at)
             VALUES (?1, ?2, ?3)",
            params![event_id, event_type, ts(&now)],
        )?;
        Ok(inserted > 0)
    }

    pub fn processed_event_count(&self) -> SettleResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_event", [], |r| r.get(0))?)
    }
}

/// The business balance/counter subset the settlement engine owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub business_id: EntityId,
    pub name: String,
    pub tier: String,
    pub subscription_status: String,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub revenue_balance: Cents,
    pub total_earnings: Cents,
    pub total_spent: Cents,
    pub active_license_count: i64,
    pub upload_count: i64,
    pub download_count: i64,
    pub connect_account_ref: Option<String>,
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

impl Business {
    /// A fresh business on the free tier with zeroed balances.
    pub fn new(business_id: EntityId, name: String) -> Self {
        Self {
            business_id,
            name,
            tier: "free".into(),
            subscription_status: "none".into(),
            subscription_expires_at: None,
            revenue_balance: 0,
            total_earnings: 0,
            total_spent: 0,
            active_license_count: 0,
            upload_count: 0,
            download_count: 0,
            connect_account_ref: None,
            details_submitted: false,
            charges_enabled: false,
            payouts_enabled: false,
        }
    }
}

/// The media subset the license lifecycle touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub media_id: EntityId,
    pub business_id: EntityId,
    pub title: String,
    pub license_count: i64,
}

// ── Timestamp helpers ──────────────────────────────────────────
// Timestamps are stored as RFC 3339 text.

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, s)).transpose()
}

/// Map an unknown enum string coming out of the database to a conversion
/// failure instead of panicking.
pub(crate) fn bad_enum(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown {what} '{raw}'").into(),
    )
}
