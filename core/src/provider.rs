//! Payment-provider seam.
//!
//! Two halves: the typed webhook event union the reconciler consumes, and
//! the opaque operations the engine calls on the provider SDK. Webhook
//! authenticity is verified by the web layer before envelopes reach here.
//!
//! Correlation data (business id, license id, tier) travels in the
//! provider's `metadata` object and may be missing; it decodes to `Option`s
//! and the reconciler decides what to absorb.

use crate::{
    error::SettleResult,
    types::{Cents, EntityId},
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// The provider's webhook envelope, as delivered: `{id, type, data.object,
/// created}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EnvelopeData,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeData {
    pub object: Value,
}

/// Closed union of the provider events the reconciler understands, plus a
/// catch-all that is acknowledged and ignored.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SubscriptionCreated {
        event_id: String,
        subscription_ref: String,
        business_id: Option<EntityId>,
        tier: Option<String>,
        current_period_end: Option<i64>,
    },
    SubscriptionUpdated {
        event_id: String,
        subscription_ref: String,
        business_id: Option<EntityId>,
        tier: Option<String>,
        current_period_end: Option<i64>,
    },
    SubscriptionDeleted {
        event_id: String,
        subscription_ref: String,
        business_id: Option<EntityId>,
    },
    InvoicePaid {
        event_id: String,
        invoice_ref: String,
        charge_ref: Option<String>,
        business_id: Option<EntityId>,
        amount: Cents,
    },
    InvoiceFailed {
        event_id: String,
        invoice_ref: String,
        business_id: Option<EntityId>,
    },
    PaymentSucceeded {
        event_id: String,
        payment_ref: String,
        charge_ref: Option<String>,
        amount: Cents,
        license_id: Option<EntityId>,
        business_id: Option<EntityId>,
    },
    PaymentFailed {
        event_id: String,
        payment_ref: String,
        license_id: Option<EntityId>,
        business_id: Option<EntityId>,
    },
    AccountUpdated {
        event_id: String,
        account_ref: String,
        details_submitted: bool,
        charges_enabled: bool,
        payouts_enabled: bool,
    },
    DisputeCreated {
        event_id: String,
        dispute_ref: String,
        charge_ref: Option<String>,
        amount: Cents,
    },
    Unrecognized {
        event_id: String,
        event_type: String,
    },
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)?.as_str().map(str::to_string)
}

fn meta_field(obj: &Value, key: &str) -> Option<String> {
    obj.get("metadata")?.get(key)?.as_str().map(str::to_string)
}

fn amount_field(obj: &Value, key: &str) -> Cents {
    obj.get(key).and_then(Value::as_i64).unwrap_or(0)
}

impl ProviderEvent {
    /// Map a webhook envelope onto the typed union. Unknown types land in
    /// `Unrecognized`; missing object ids decode to empty references, which
    /// the reconciler absorbs like any other bad correlation.
    pub fn from_envelope(envelope: &WebhookEnvelope) -> Self {
        let obj = &envelope.data.object;
        let event_id = envelope.id.clone();
        match envelope.event_type.as_str() {
            "customer.subscription.created" => Self::SubscriptionCreated {
                event_id,
                subscription_ref: str_field(obj, "id").unwrap_or_default(),
                business_id: meta_field(obj, "businessId"),
                tier: meta_field(obj, "tier"),
                current_period_end: obj.get("current_period_end").and_then(Value::as_i64),
            },
            "customer.subscription.updated" => Self::SubscriptionUpdated {
                event_id,
                subscription_ref: str_field(obj, "id").unwrap_or_default(),
                business_id: meta_field(obj, "businessId"),
                tier: meta_field(obj, "tier"),
                current_period_end: obj.get("current_period_end").and_then(Value::as_i64),
            },
            "customer.subscription.deleted" => Self::SubscriptionDeleted {
                event_id,
                subscription_ref: str_field(obj, "id").unwrap_or_default(),
                business_id: meta_field(obj, "businessId"),
            },
            "invoice.paid" => Self::InvoicePaid {
                event_id,
                invoice_ref: str_field(obj, "id").unwrap_or_default(),
                charge_ref: str_field(obj, "charge"),
                business_id: meta_field(obj, "businessId"),
                amount: amount_field(obj, "amount_paid"),
            },
            "invoice.payment_failed" => Self::InvoiceFailed {
                event_id,
                invoice_ref: str_field(obj, "id").unwrap_or_default(),
                business_id: meta_field(obj, "businessId"),
            },
            "payment_intent.succeeded" => Self::PaymentSucceeded {
                event_id,
                payment_ref: str_field(obj, "id").unwrap_or_default(),
                charge_ref: str_field(obj, "latest_charge"),
                amount: amount_field(obj, "amount"),
                license_id: meta_field(obj, "licenseId"),
                business_id: meta_field(obj, "businessId"),
            },
            "payment_intent.payment_failed" => Self::PaymentFailed {
                event_id,
                payment_ref: str_field(obj, "id").unwrap_or_default(),
                license_id: meta_field(obj, "licenseId"),
                business_id: meta_field(obj, "businessId"),
            },
            "account.updated" => Self::AccountUpdated {
                event_id,
                account_ref: str_field(obj, "id").unwrap_or_default(),
                details_submitted: obj
                    .get("details_submitted")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                charges_enabled: obj
                    .get("charges_enabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                payouts_enabled: obj
                    .get("payouts_enabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "charge.dispute.created" => Self::DisputeCreated {
                event_id,
                dispute_ref: str_field(obj, "id").unwrap_or_default(),
                charge_ref: str_field(obj, "charge"),
                amount: amount_field(obj, "amount"),
            },
            other => Self::Unrecognized {
                event_id,
                event_type: other.to_string(),
            },
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::SubscriptionCreated { event_id, .. }
            | Self::SubscriptionUpdated { event_id, .. }
            | Self::SubscriptionDeleted { event_id, .. }
            | Self::InvoicePaid { event_id, .. }
            | Self::InvoiceFailed { event_id, .. }
            | Self::PaymentSucceeded { event_id, .. }
            | Self::PaymentFailed { event_id, .. }
            | Self::AccountUpdated { event_id, .. }
            | Self::DisputeCreated { event_id, .. }
            | Self::Unrecognized { event_id, .. } => event_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::SubscriptionUpdated { .. } => "subscription_updated",
            Self::SubscriptionDeleted { .. } => "subscription_deleted",
            Self::InvoicePaid { .. } => "invoice_paid",
            Self::InvoiceFailed { .. } => "invoice_failed",
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::AccountUpdated { .. } => "account_updated",
            Self::DisputeCreated { .. } => "dispute_created",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Connect account capability flags, as reported by the provider.
#[derive(Debug, Clone, Copy)]
pub struct ConnectAccountStatus {
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

/// The opaque operations consumed from the provider SDK. Amounts are minor
/// units; returned strings are provider references.
pub trait PaymentProvider {
    /// Create a payment intent carrying the license/business correlation in
    /// its metadata. Returns the payment-intent reference.
    fn create_payment_intent(
        &self,
        amount: Cents,
        license_id: &str,
        business_id: &str,
    ) -> SettleResult<String>;

    /// Create a payout to a Connect account. Returns the payout reference.
    fn create_payout(&self, account_ref: &str, amount: Cents) -> SettleResult<String>;

    /// Refund a charge. Returns the refund reference.
    fn create_refund(&self, charge_ref: &str, amount: Cents) -> SettleResult<String>;

    /// Current capability flags for a Connect account.
    fn retrieve_account(&self, account_ref: &str) -> SettleResult<ConnectAccountStatus>;
}

/// Provider implementation that fabricates references locally. Used by the
/// runner and tests; a real deployment wires the provider SDK in here.
#[derive(Debug, Default)]
pub struct OfflineProvider;

impl PaymentProvider for OfflineProvider {
    fn create_payment_intent(
        &self,
        _amount: Cents,
        _license_id: &str,
        _business_id: &str,
    ) -> SettleResult<String> {
        Ok(format!("pi_{}", Uuid::new_v4().simple()))
    }

    fn create_payout(&self, _account_ref: &str, _amount: Cents) -> SettleResult<String> {
        Ok(format!("po_{}", Uuid::new_v4().simple()))
    }

    fn create_refund(&self, _charge_ref: &str, _amount: Cents) -> SettleResult<String> {
        Ok(format!("re_{}", Uuid::new_v4().simple()))
    }

    fn retrieve_account(&self, _account_ref: &str) -> SettleResult<ConnectAccountStatus> {
        Ok(ConnectAccountStatus {
            details_submitted: true,
            charges_enabled: true,
            payouts_enabled: true,
        })
    }
}
