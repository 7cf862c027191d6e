//! The transaction ledger entity: one record per monetary movement.
//!
//! Amount invariants are enforced at construction and the status lifecycle
//! by the mark_* transitions, independent of the storage backend. Records are
//! append-only; corrections are new records (a `chargeback` next to the
//! disputed original), never edits to settled amounts.

use crate::{
    error::{SettleError, SettleResult},
    types::{Cents, EntityId, CENT_TOLERANCE},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SubscriptionPayment,
    LicensePayment,
    Payout,
    Refund,
    Chargeback,
    PlatformFee,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionPayment => "subscription_payment",
            Self::LicensePayment => "license_payment",
            Self::Payout => "payout",
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
            Self::PlatformFee => "platform_fee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subscription_payment" => Some(Self::SubscriptionPayment),
            "license_payment" => Some(Self::LicensePayment),
            "payout" => Some(Self::Payout),
            "refund" => Some(Self::Refund),
            "chargeback" => Some(Self::Chargeback),
            "platform_fee" => Some(Self::PlatformFee),
            _ => None,
        }
    }

    /// Kinds that represent money a payer handed over (refundable kinds).
    pub fn is_payment(&self) -> bool {
        matches!(self, Self::SubscriptionPayment | Self::LicensePayment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Disputed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }
}

/// Opaque identifiers handed out by the payment provider, used for
/// idempotent lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRefs {
    pub payment_intent: Option<String>,
    pub charge: Option<String>,
    pub payout: Option<String>,
    pub refund: Option<String>,
    pub transfer: Option<String>,
}

/// Open key/value bag carried on every record. The named fields cover pool
/// attribution and chargeback-reserve bookkeeping; anything else survives in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contribution_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_amount: Option<Cents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_release_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_released: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Fields supplied when appending a new ledger record.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub gross_amount: Cents,
    pub processor_fee: Cents,
    pub net_amount: Cents,
    pub creator_share: Option<Cents>,
    pub platform_share: Option<Cents>,
    pub payer: Option<EntityId>,
    pub payee: Option<EntityId>,
    pub related_license: Option<EntityId>,
    pub provider_refs: ProviderRefs,
    pub metadata: TxnMetadata,
}

impl TransactionDraft {
    pub fn new(kind: TransactionKind, gross: Cents, fee: Cents, net: Cents) -> Self {
        Self {
            kind,
            gross_amount: gross,
            processor_fee: fee,
            net_amount: net,
            creator_share: None,
            platform_share: None,
            payer: None,
            payee: None,
            related_license: None,
            provider_refs: ProviderRefs::default(),
            metadata: TxnMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: EntityId,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub gross_amount: Cents,
    pub processor_fee: Cents,
    pub net_amount: Cents,
    pub creator_share: Option<Cents>,
    pub platform_share: Option<Cents>,
    pub payer: Option<EntityId>,
    pub payee: Option<EntityId>,
    pub related_license: Option<EntityId>,
    pub provider_refs: ProviderRefs,
    pub metadata: TxnMetadata,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Validate the draft and append a new `pending` record.
    pub fn create(draft: TransactionDraft, now: DateTime<Utc>) -> SettleResult<Self> {
        for (amount, context) in [
            (draft.gross_amount, "gross amount"),
            (draft.processor_fee, "processor fee"),
            (draft.net_amount, "net amount"),
        ] {
            if amount < 0 {
                return Err(SettleError::InvalidAmount { amount, context });
            }
        }
        if (draft.gross_amount - draft.processor_fee - draft.net_amount).abs() > CENT_TOLERANCE {
            return Err(SettleError::InvalidAmount {
                amount: draft.net_amount,
                context: "net amount (must equal gross minus fee)",
            });
        }
        if let (Some(creator), Some(platform)) = (draft.creator_share, draft.platform_share) {
            if creator < 0 {
                return Err(SettleError::InvalidAmount {
                    amount: creator,
                    context: "creator share",
                });
            }
            if platform < 0 {
                return Err(SettleError::InvalidAmount {
                    amount: platform,
                    context: "platform share",
                });
            }
            if (creator + platform - draft.net_amount).abs() > CENT_TOLERANCE {
                return Err(SettleError::InvalidAmount {
                    amount: creator + platform,
                    context: "shares (must sum to net amount)",
                });
            }
        }
        let payer_required = draft.kind.is_payment();
        if payer_required && draft.payer.is_none() {
            return Err(SettleError::MissingParty {
                kind: draft.kind.as_str().into(),
                role: "payer",
            });
        }
        let payee_required = matches!(
            draft.kind,
            TransactionKind::LicensePayment | TransactionKind::Payout
        );
        if payee_required && draft.payee.is_none() {
            return Err(SettleError::MissingParty {
                kind: draft.kind.as_str().into(),
                role: "payee",
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind: draft.kind,
            status: TransactionStatus::Pending,
            gross_amount: draft.gross_amount,
            processor_fee: draft.processor_fee,
            net_amount: draft.net_amount,
            creator_share: draft.creator_share,
            platform_share: draft.platform_share,
            payer: draft.payer,
            payee: draft.payee,
            related_license: draft.related_license,
            provider_refs: draft.provider_refs,
            metadata: draft.metadata,
            created_at: now,
            completed_at: None,
            refunded_at: None,
            disputed_at: None,
        })
    }

    // ── Status transitions ─────────────────────────────────────

    /// `pending → completed`. Stamps `completed_at`.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> SettleResult<()> {
        match self.status {
            TransactionStatus::Pending => {
                self.status = TransactionStatus::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
            TransactionStatus::Completed => Err(SettleError::AlreadyCompleted),
            TransactionStatus::Refunded | TransactionStatus::Disputed => {
                Err(SettleError::TerminalStateConflict {
                    status: self.status.as_str().into(),
                })
            }
            TransactionStatus::Failed => Err(SettleError::InvalidTransition {
                action: "complete",
                current: self.status.as_str().into(),
                required: "pending",
            }),
        }
    }

    /// `pending → failed`.
    pub fn mark_failed(&mut self) -> SettleResult<()> {
        if self.status != TransactionStatus::Pending {
            return Err(SettleError::InvalidTransition {
                action: "fail",
                current: self.status.as_str().into(),
                required: "pending",
            });
        }
        self.status = TransactionStatus::Failed;
        Ok(())
    }

    /// `completed → refunded`, payment kinds only. Stamps `refunded_at`.
    pub fn mark_refunded(&mut self, now: DateTime<Utc>) -> SettleResult<()> {
        if !self.can_refund() {
            return Err(SettleError::NotRefundable {
                kind: self.kind.as_str().into(),
                status: self.status.as_str().into(),
            });
        }
        self.status = TransactionStatus::Refunded;
        self.refunded_at = Some(now);
        Ok(())
    }

    /// `completed → disputed`. Stamps `disputed_at`.
    pub fn mark_disputed(&mut self, now: DateTime<Utc>) -> SettleResult<()> {
        if self.status != TransactionStatus::Completed {
            return Err(SettleError::InvalidTransition {
                action: "dispute",
                current: self.status.as_str().into(),
                required: "completed",
            });
        }
        self.status = TransactionStatus::Disputed;
        self.disputed_at = Some(now);
        Ok(())
    }

    // ── Predicates ─────────────────────────────────────────────

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn can_refund(&self) -> bool {
        self.is_completed() && self.kind.is_payment()
    }

    pub fn is_payment(&self) -> bool {
        self.kind.is_payment()
    }

    pub fn is_payout(&self) -> bool {
        self.kind == TransactionKind::Payout
    }
}
