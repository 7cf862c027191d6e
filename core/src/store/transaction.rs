use super::{bad_enum, opt_ts, parse_opt_ts, parse_ts, ts, SettleStore};
use crate::{
    error::SettleResult,
    transaction::{ProviderRefs, Transaction, TransactionKind, TransactionStatus, TxnMetadata},
    types::Cents,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

const TXN_COLS: &str = "txn_id, kind, status, gross_amount, processor_fee, net_amount,
        creator_share, platform_share, payer_id, payee_id, license_id,
        payment_intent_ref, charge_ref, payout_ref, refund_ref, transfer_ref,
        metadata, created_at, completed_at, refunded_at, disputed_at";

fn txn_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let kind_raw: String = row.get(1)?;
    let kind = TransactionKind::parse(&kind_raw)
        .ok_or_else(|| bad_enum(1, "transaction kind", &kind_raw))?;
    let status_raw: String = row.get(2)?;
    let status = TransactionStatus::parse(&status_raw)
        .ok_or_else(|| bad_enum(2, "transaction status", &status_raw))?;
    let metadata_raw: String = row.get(16)?;
    let metadata: TxnMetadata = serde_json::from_str(&metadata_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(16, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        kind,
        status,
        gross_amount: row.get(3)?,
        processor_fee: row.get(4)?,
        net_amount: row.get(5)?,
        creator_share: row.get(6)?,
        platform_share: row.get(7)?,
        payer: row.get(8)?,
        payee: row.get(9)?,
        related_license: row.get(10)?,
        provider_refs: ProviderRefs {
            payment_intent: row.get(11)?,
            charge: row.get(12)?,
            payout: row.get(13)?,
            refund: row.get(14)?,
            transfer: row.get(15)?,
        },
        metadata,
        created_at: parse_ts(17, row.get(17)?)?,
        completed_at: parse_opt_ts(18, row.get(18)?)?,
        refunded_at: parse_opt_ts(19, row.get(19)?)?,
        disputed_at: parse_opt_ts(20, row.get(20)?)?,
    })
}

/// Per-business totals over completed ledger records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RevenueSummary {
    pub completed_sales: i64,
    pub gross_volume: Cents,
    pub total_earned: Cents,
    pub total_spent: Cents,
}

impl SettleStore {
    pub fn insert_transaction(&self, txn: &Transaction) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO txn (
                 txn_id, kind, status, gross_amount, processor_fee, net_amount,
                 creator_share, platform_share, payer_id, payee_id, license_id,
                 payment_intent_ref, charge_ref, payout_ref, refund_ref, transfer_ref,
                 metadata, created_at, completed_at, refunded_at, disputed_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                txn.id,
                txn.kind.as_str(),
                txn.status.as_str(),
                txn.gross_amount,
                txn.processor_fee,
                txn.net_amount,
                txn.creator_share,
                txn.platform_share,
                txn.payer,
                txn.payee,
                txn.related_license,
                txn.provider_refs.payment_intent,
                txn.provider_refs.charge,
                txn.provider_refs.payout,
                txn.provider_refs.refund,
                txn.provider_refs.transfer,
                serde_json::to_string(&txn.metadata)?,
                ts(&txn.created_at),
                opt_ts(&txn.completed_at),
                opt_ts(&txn.refunded_at),
                opt_ts(&txn.disputed_at),
            ],
        )?;
        Ok(())
    }

    /// Persist the fields a status transition can touch. Amounts are
    /// immutable once written; only status, stamps, refs, and metadata move.
    pub fn update_transaction(&self, txn: &Transaction) -> SettleResult<()> {
        self.conn.execute(
            "UPDATE txn SET
                 status = ?1, charge_ref = ?2, refund_ref = ?3, metadata = ?4,
                 completed_at = ?5, refunded_at = ?6, disputed_at = ?7
             WHERE txn_id = ?8",
            params![
                txn.status.as_str(),
                txn.provider_refs.charge,
                txn.provider_refs.refund,
                serde_json::to_string(&txn.metadata)?,
                opt_ts(&txn.completed_at),
                opt_ts(&txn.refunded_at),
                opt_ts(&txn.disputed_at),
                txn.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: &str) -> SettleResult<Option<Transaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TXN_COLS} FROM txn WHERE txn_id = ?1"))?;
        Ok(stmt.query_row(params![txn_id], txn_from_row).optional()?)
    }

    /// Idempotent lookup by the provider's payment reference: matches either
    /// the payment-intent or the charge identifier.
    pub fn find_by_payment_ref(&self, provider_ref: &str) -> SettleResult<Option<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TXN_COLS} FROM txn
             WHERE payment_intent_ref = ?1 OR charge_ref = ?1
             ORDER BY created_at ASC LIMIT 1"
        ))?;
        Ok(stmt.query_row(params![provider_ref], txn_from_row).optional()?)
    }

    /// The completed original a dispute refers to, by charge reference.
    /// Skips correction records (chargebacks/refunds) sharing the charge.
    pub fn find_original_by_charge_ref(
        &self,
        charge_ref: &str,
    ) -> SettleResult<Option<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TXN_COLS} FROM txn
             WHERE charge_ref = ?1 AND kind IN ('license_payment', 'subscription_payment')
             ORDER BY created_at ASC LIMIT 1"
        ))?;
        Ok(stmt.query_row(params![charge_ref], txn_from_row).optional()?)
    }

    pub fn list_transactions(&self) -> SettleResult<Vec<Transaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TXN_COLS} FROM txn ORDER BY created_at ASC"))?;
        let rows = stmt
            .query_map([], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn transaction_count_by_status(&self) -> SettleResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM txn GROUP BY status ORDER BY status ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Totals for the revenue dashboard: what a business earned as payee and
    /// spent as payer across completed records.
    pub fn revenue_summary(&self, business_id: &str) -> SettleResult<RevenueSummary> {
        let (completed_sales, gross_volume, total_earned) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(gross_amount), 0),
                    COALESCE(SUM(COALESCE(creator_share, 0)), 0)
             FROM txn WHERE payee_id = ?1 AND status = 'completed'",
            params![business_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total_spent = self.conn.query_row(
            "SELECT COALESCE(SUM(gross_amount), 0)
             FROM txn WHERE payer_id = ?1 AND status = 'completed'",
            params![business_id],
            |row| row.get(0),
        )?;
        Ok(RevenueSummary {
            completed_sales,
            gross_volume,
            total_earned,
            total_spent,
        })
    }
}
