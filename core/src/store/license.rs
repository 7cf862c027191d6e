use super::{bad_enum, opt_ts, parse_opt_ts, parse_ts, ts, SettleStore};
use crate::{
    error::SettleResult,
    license::{License, LicenseStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const LICENSE_COLS: &str = "license_id, media_id, licensor_id, licensee_id, status, price,
        currency, duration, expires_at, approved_at, rejected_at,
        rejection_reason, payment_transaction_id, created_at";

fn license_from_row(row: &Row) -> rusqlite::Result<License> {
    let status_raw: String = row.get(4)?;
    let status =
        LicenseStatus::parse(&status_raw).ok_or_else(|| bad_enum(4, "license status", &status_raw))?;
    Ok(License {
        id: row.get(0)?,
        media_id: row.get(1)?,
        licensor: row.get(2)?,
        licensee: row.get(3)?,
        status,
        price: row.get(5)?,
        currency: row.get(6)?,
        duration: row.get(7)?,
        expires_at: parse_opt_ts(8, row.get(8)?)?,
        approved_at: parse_opt_ts(9, row.get(9)?)?,
        rejected_at: parse_opt_ts(10, row.get(10)?)?,
        rejection_reason: row.get(11)?,
        payment_transaction_id: row.get(12)?,
        created_at: parse_ts(13, row.get(13)?)?,
    })
}

impl SettleStore {
    pub fn insert_license(&self, license: &License) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO license (
                 license_id, media_id, licensor_id, licensee_id, status, price,
                 currency, duration, expires_at, approved_at, rejected_at,
                 rejection_reason, payment_transaction_id, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                license.id,
                license.media_id,
                license.licensor,
                license.licensee,
                license.status.as_str(),
                license.price,
                license.currency,
                license.duration,
                opt_ts(&license.expires_at),
                opt_ts(&license.approved_at),
                opt_ts(&license.rejected_at),
                license.rejection_reason,
                license.payment_transaction_id,
                ts(&license.created_at),
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable fields after an entity transition.
    pub fn update_license(&self, license: &License) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE license SET
                 status = ?1, expires_at = ?2, approved_at = ?3, rejected_at = ?4,
                 rejection_reason = ?5, payment_transaction_id = ?6
             WHERE license_id = ?7",
            params![
                license.status.as_str(),
                opt_ts(&license.expires_at),
                opt_ts(&license.approved_at),
                opt_ts(&license.rejected_at),
                license.rejection_reason,
                license.payment_transaction_id,
                license.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_license(&self, license_id: &str) -> SettleResult<Option<License>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LICENSE_COLS} FROM license WHERE license_id = ?1"
        ))?;
        Ok(stmt
            .query_row(params![license_id], license_from_row)
            .optional()?)
    }

    /// Active licenses whose term has run out.
    pub fn licenses_due_for_expiry(&self, now: DateTime<Utc>) -> SettleResult<Vec<License>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LICENSE_COLS} FROM license
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?1
             ORDER BY license_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![ts(&now)], license_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn license_count_by_status(&self, status: &str) -> SettleResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM license WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?)
    }
}
