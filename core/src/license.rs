//! License entity and status machine.
//!
//! Transitions here are pure: they validate the current status and stamp
//! timestamps. Counter bookkeeping (licensee active-license count, media
//! license counts) belongs to the licensing service and the reconciler.

use crate::{
    error::{SettleError, SettleResult},
    types::{Cents, EntityId},
};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Pending,
    Approved,
    Active,
    Rejected,
    Cancelled,
    Expired,
    PaymentFailed,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::PaymentFailed => "payment_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "active" => Some(Self::Active),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            "payment_failed" => Some(Self::PaymentFailed),
            _ => None,
        }
    }
}

/// End of a license term described by a duration string.
/// Accepts `"<N> year(s)"` and `"<N> month(s)"`; anything else means 1 year.
pub fn term_end(duration: Option<&str>, from: DateTime<Utc>) -> DateTime<Utc> {
    let months = duration.and_then(parse_term_months).unwrap_or(12);
    from.checked_add_months(Months::new(months)).unwrap_or(from)
}

fn parse_term_months(s: &str) -> Option<u32> {
    let mut parts = s.split_whitespace();
    let count: u32 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if unit.starts_with("year") {
        count.checked_mul(12)
    } else if unit.starts_with("month") {
        Some(count)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: EntityId,
    pub media_id: EntityId,
    /// Rights holder (payee side of a license payment).
    pub licensor: EntityId,
    /// Buyer (payer side).
    pub licensee: EntityId,
    pub status: LicenseStatus,
    pub price: Cents,
    pub currency: String,
    pub duration: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub payment_transaction_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
}

impl License {
    pub fn new(
        id: EntityId,
        media_id: EntityId,
        licensor: EntityId,
        licensee: EntityId,
        price: Cents,
        duration: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            media_id,
            licensor,
            licensee,
            status: LicenseStatus::Pending,
            price,
            currency: "usd".into(),
            duration,
            expires_at: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            payment_transaction_id: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == LicenseStatus::Pending
    }

    pub fn is_active(&self) -> bool {
        self.status == LicenseStatus::Active
    }

    fn require_pending(&self) -> SettleResult<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(SettleError::LicenseNotPending {
                id: self.id.clone(),
                status: self.status.as_str().into(),
            })
        }
    }

    /// Direct approval by the media owner: `pending → active`, with the
    /// expiry computed from the duration string.
    pub fn approve(&mut self, now: DateTime<Utc>) -> SettleResult<()> {
        self.require_pending()?;
        self.approved_at = Some(now);
        self.expires_at = Some(term_end(self.duration.as_deref(), now));
        self.status = LicenseStatus::Active;
        Ok(())
    }

    /// Settlement-driven approval: `pending → approved`, stamping the
    /// transaction that paid for it.
    pub fn approve_via_payment(
        &mut self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        self.require_pending()?;
        self.approved_at = Some(now);
        self.payment_transaction_id = Some(transaction_id.into());
        self.status = LicenseStatus::Approved;
        Ok(())
    }

    /// `pending → payment_failed`.
    pub fn fail_payment(&mut self) -> SettleResult<()> {
        self.require_pending()?;
        self.status = LicenseStatus::PaymentFailed;
        Ok(())
    }

    /// `pending → rejected`, recording the reason.
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> SettleResult<()> {
        self.require_pending()?;
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason.into());
        self.status = LicenseStatus::Rejected;
        Ok(())
    }

    /// `active/approved → cancelled`. Returns whether the license was
    /// active, which is when the caller owes a counter decrement.
    pub fn cancel(&mut self) -> SettleResult<bool> {
        match self.status {
            LicenseStatus::Active | LicenseStatus::Approved => {
                let was_active = self.status == LicenseStatus::Active;
                self.status = LicenseStatus::Cancelled;
                Ok(was_active)
            }
            _ => Err(SettleError::LicenseStateConflict {
                id: self.id.clone(),
                status: self.status.as_str().into(),
                action: "cancel",
            }),
        }
    }

    /// `active → expired`.
    pub fn expire(&mut self) -> SettleResult<()> {
        if self.status != LicenseStatus::Active {
            return Err(SettleError::LicenseStateConflict {
                id: self.id.clone(),
                status: self.status.as_str().into(),
                action: "expire",
            });
        }
        self.status = LicenseStatus::Expired;
        Ok(())
    }

    /// `active/expired → active` with a fresh term. Returns whether the
    /// license was expired, which is when the caller owes a re-increment.
    pub fn renew(&mut self, now: DateTime<Utc>) -> SettleResult<bool> {
        match self.status {
            LicenseStatus::Active | LicenseStatus::Expired => {
                let was_expired = self.status == LicenseStatus::Expired;
                self.expires_at = Some(term_end(self.duration.as_deref(), now));
                self.status = LicenseStatus::Active;
                Ok(was_expired)
            }
            _ => Err(SettleError::LicenseStateConflict {
                id: self.id.clone(),
                status: self.status.as_str().into(),
                action: "renew",
            }),
        }
    }
}
