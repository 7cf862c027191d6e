use super::{opt_ts, parse_opt_ts, ts, Business, Media, SettleStore};
use crate::{error::SettleResult, types::Cents};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

fn business_from_row(row: &Row) -> rusqlite::Result<Business> {
    Ok(Business {
        business_id: row.get(0)?,
        name: row.get(1)?,
        tier: row.get(2)?,
        subscription_status: row.get(3)?,
        subscription_expires_at: parse_opt_ts(4, row.get(4)?)?,
        revenue_balance: row.get(5)?,
        total_earnings: row.get(6)?,
        total_spent: row.get(7)?,
        active_license_count: row.get(8)?,
        upload_count: row.get(9)?,
        download_count: row.get(10)?,
        connect_account_ref: row.get(11)?,
        details_submitted: row.get(12)?,
        charges_enabled: row.get(13)?,
        payouts_enabled: row.get(14)?,
    })
}

const BUSINESS_COLS: &str = "business_id, name, tier, subscription_status, subscription_expires_at,
        revenue_balance, total_earnings, total_spent, active_license_count,
        upload_count, download_count, connect_account_ref,
        details_submitted, charges_enabled, payouts_enabled";

impl SettleStore {
    pub fn insert_business(&self, business: &Business) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO business (
                 business_id, name, tier, subscription_status, subscription_expires_at,
                 revenue_balance, total_earnings, total_spent, active_license_count,
                 upload_count, download_count, connect_account_ref,
                 details_submitted, charges_enabled, payouts_enabled
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                business.business_id,
                business.name,
                business.tier,
                business.subscription_status,
                opt_ts(&business.subscription_expires_at),
                business.revenue_balance,
                business.total_earnings,
                business.total_spent,
                business.active_license_count,
                business.upload_count,
                business.download_count,
                business.connect_account_ref,
                business.details_submitted,
                business.charges_enabled,
                business.payouts_enabled,
            ],
        )?;
        Ok(())
    }

    pub fn get_business(&self, business_id: &str) -> SettleResult<Option<Business>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BUSINESS_COLS} FROM business WHERE business_id = ?1"
        ))?;
        Ok(stmt
            .query_row(params![business_id], business_from_row)
            .optional()?)
    }

    pub fn get_business_by_connect_ref(&self, account_ref: &str) -> SettleResult<Option<Business>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BUSINESS_COLS} FROM business WHERE connect_account_ref = ?1"
        ))?;
        Ok(stmt
            .query_row(params![account_ref], business_from_row)
            .optional()?)
    }

    pub fn list_businesses(&self) -> SettleResult<Vec<Business>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BUSINESS_COLS} FROM business ORDER BY business_id ASC"
        ))?;
        let rows = stmt
            .query_map([], business_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomic delta on the three balance fields.
    pub fn adjust_balances(
        &self,
        business_id: &str,
        revenue_delta: Cents,
        earnings_delta: Cents,
        spent_delta: Cents,
    ) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE business SET
                 revenue_balance = revenue_balance + ?1,
                 total_earnings  = total_earnings  + ?2,
                 total_spent     = total_spent     + ?3
             WHERE business_id = ?4",
            params![revenue_delta, earnings_delta, spent_delta, business_id],
        )?;
        Ok(())
    }

    /// Atomic delta on the active-license counter, floored at zero.
    pub fn adjust_active_license_count(&self, business_id: &str, delta: i64) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE business SET active_license_count = MAX(0, active_license_count + ?1)
             WHERE business_id = ?2",
            params![delta, business_id],
        )?;
        Ok(())
    }

    pub fn set_subscription(
        &self,
        business_id: &str,
        tier: &str,
        status: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE business SET tier = ?1, subscription_status = ?2, subscription_expires_at = ?3
             WHERE business_id = ?4",
            params![tier, status, expires_at.as_ref().map(ts), business_id],
        )?;
        Ok(())
    }

    pub fn set_subscription_status(&self, business_id: &str, status: &str) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE business SET subscription_status = ?1 WHERE business_id = ?2",
            params![status, business_id],
        )?;
        Ok(())
    }

    pub fn set_connect_account(
        &self,
        business_id: &str,
        account_ref: &str,
        details_submitted: bool,
        charges_enabled: bool,
        payouts_enabled: bool,
    ) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE business SET connect_account_ref = ?1, details_submitted = ?2,
                 charges_enabled = ?3, payouts_enabled = ?4
             WHERE business_id = ?5",
            params![
                account_ref,
                details_submitted,
                charges_enabled,
                payouts_enabled,
                business_id
            ],
        )?;
        Ok(())
    }

    // ── Media ──────────────────────────────────────────────────

    pub fn insert_media(&self, media: &Media) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO media (media_id, business_id, title, license_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                media.media_id,
                media.business_id,
                media.title,
                media.license_count
            ],
        )?;
        Ok(())
    }

    pub fn get_media(&self, media_id: &str) -> SettleResult<Option<Media>> {
        let mut stmt = self.conn.prepare(
            "SELECT media_id, business_id, title, license_count FROM media WHERE media_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![media_id], |row| {
                Ok(Media {
                    media_id: row.get(0)?,
                    business_id: row.get(1)?,
                    title: row.get(2)?,
                    license_count: row.get(3)?,
                })
            })
            .optional()?)
    }

    pub fn adjust_media_license_count(&self, media_id: &str, delta: i64) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE media SET license_count = MAX(0, license_count + ?1) WHERE media_id = ?2",
            params![delta, media_id],
        )?;
        Ok(())
    }

    /// Add a license to the media's active set. Idempotent.
    pub fn add_media_active_license(&self, media_id: &str, license_id: &str) -> SettleResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO media_active_license (media_id, license_id) VALUES (?1, ?2)",
            params![media_id, license_id],
        )?;
        Ok(())
    }

    /// Remove a license from the media's active set. Idempotent.
    pub fn remove_media_active_license(
        &self,
        media_id: &str,
        license_id: &str,
    ) -> SettleResult<()> {
        self.conn.execute(
            "DELETE FROM media_active_license WHERE media_id = ?1 AND license_id = ?2",
            params![media_id, license_id],
        )?;
        Ok(())
    }

    pub fn media_active_license_count(&self, media_id: &str) -> SettleResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM media_active_license WHERE media_id = ?1",
            params![media_id],
            |r| r.get(0),
        )?)
    }
}
