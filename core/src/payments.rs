//! Caller-facing payment flows: license payment initiation, payouts, and
//! refunds. These are the only writers of business balances besides the
//! reconciler.

use crate::{
    config::TierCatalog,
    error::{SettleError, SettleResult},
    provider::PaymentProvider,
    revenue,
    store::{RevenueSummary, SettleStore},
    transaction::{Transaction, TransactionDraft, TransactionKind},
    types::{Cents, EntityId},
};
use chrono::{DateTime, Utc};
use log::info;

/// Smallest payout the platform will send, in cents.
pub const MIN_PAYOUT: Cents = 2_500;

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub transaction_id: EntityId,
    pub provider_payment_reference: String,
}

#[derive(Debug, Clone)]
pub struct RequestedPayout {
    pub transaction_id: EntityId,
    pub provider_payout_reference: String,
}

pub struct Payments<'a> {
    store: &'a SettleStore,
    catalog: &'a TierCatalog,
}

impl<'a> Payments<'a> {
    pub fn new(store: &'a SettleStore, catalog: &'a TierCatalog) -> Self {
        Self { store, catalog }
    }

    /// Open a payment for a pending license: creates the provider payment
    /// intent and a `pending` ledger record keyed by its reference. The
    /// record completes later, when the provider's settlement event arrives.
    pub fn initiate_license_payment(
        &self,
        license_id: &str,
        payer_id: &str,
        provider: &dyn PaymentProvider,
        now: DateTime<Utc>,
    ) -> SettleResult<InitiatedPayment> {
        self.store.transactionally(|store| {
            let license =
                store
                    .get_license(license_id)?
                    .ok_or_else(|| SettleError::LicenseNotFound {
                        id: license_id.into(),
                    })?;
            if !license.is_pending() {
                return Err(SettleError::LicenseNotPending {
                    id: license.id.clone(),
                    status: license.status.as_str().into(),
                });
            }
            if license.licensee != payer_id {
                return Err(SettleError::NotLicensee {
                    business: payer_id.into(),
                    license: license.id.clone(),
                });
            }
            let licensor = store.get_business(&license.licensor)?.ok_or_else(|| {
                SettleError::BusinessNotFound {
                    id: license.licensor.clone(),
                }
            })?;

            let split = self.catalog.split_for(&licensor.tier);
            let breakdown = revenue::split_revenue(license.price, &split)?;
            let intent_ref = provider.create_payment_intent(license.price, &license.id, payer_id)?;

            let mut draft = TransactionDraft::new(
                TransactionKind::LicensePayment,
                breakdown.gross_amount,
                breakdown.processor_fee,
                breakdown.net_amount,
            );
            draft.creator_share = Some(breakdown.creator_share);
            draft.platform_share = Some(breakdown.platform_share);
            draft.payer = Some(payer_id.into());
            draft.payee = Some(license.licensor.clone());
            draft.related_license = Some(license.id.clone());
            draft.provider_refs.payment_intent = Some(intent_ref.clone());
            let txn = Transaction::create(draft, now)?;
            store.insert_transaction(&txn)?;

            info!(
                "initiated payment {} for license {} ({} cents gross)",
                intent_ref, license.id, license.price
            );
            Ok(InitiatedPayment {
                transaction_id: txn.id,
                provider_payment_reference: intent_ref,
            })
        })
    }

    /// Pay out part of a business's revenue balance to its Connect account.
    /// The balance debit happens with the ledger insert, in the same store
    /// transaction.
    pub fn request_payout(
        &self,
        business_id: &str,
        amount: Cents,
        provider: &dyn PaymentProvider,
        now: DateTime<Utc>,
    ) -> SettleResult<RequestedPayout> {
        self.store.transactionally(|store| {
            if amount < MIN_PAYOUT {
                return Err(SettleError::BelowMinimumPayout {
                    requested: amount,
                    minimum: MIN_PAYOUT,
                });
            }
            let business =
                store
                    .get_business(business_id)?
                    .ok_or_else(|| SettleError::BusinessNotFound {
                        id: business_id.into(),
                    })?;
            let account_ref = business.connect_account_ref.as_deref().ok_or_else(|| {
                SettleError::NoConnectAccount {
                    business: business_id.into(),
                }
            })?;
            let account = provider.retrieve_account(account_ref)?;
            if !account.payouts_enabled {
                return Err(SettleError::NoConnectAccount {
                    business: business_id.into(),
                });
            }
            if business.revenue_balance < amount {
                return Err(SettleError::InsufficientBalance {
                    available: business.revenue_balance,
                    requested: amount,
                });
            }

            let payout_ref = provider.create_payout(account_ref, amount)?;
            let mut draft = TransactionDraft::new(TransactionKind::Payout, amount, 0, amount);
            draft.payee = Some(business_id.into());
            draft.provider_refs.payout = Some(payout_ref.clone());
            let txn = Transaction::create(draft, now)?;
            store.insert_transaction(&txn)?;
            store.adjust_balances(business_id, -amount, 0, 0)?;

            info!(
                "payout {} of {} cents requested for {}",
                payout_ref, amount, business_id
            );
            Ok(RequestedPayout {
                transaction_id: txn.id,
                provider_payout_reference: payout_ref,
            })
        })
    }

    /// Refund a completed license or subscription payment: marks the
    /// original refunded, appends a `refund` record, and reverses the
    /// original's balance effects.
    pub fn refund_license_payment(
        &self,
        transaction_id: &str,
        provider: &dyn PaymentProvider,
        now: DateTime<Utc>,
    ) -> SettleResult<Transaction> {
        self.store.transactionally(|store| {
            let mut original = store.get_transaction(transaction_id)?.ok_or_else(|| {
                SettleError::TransactionNotFound {
                    id: transaction_id.into(),
                }
            })?;
            original.mark_refunded(now)?;

            let charge_ref = original
                .provider_refs
                .charge
                .clone()
                .or_else(|| original.provider_refs.payment_intent.clone())
                .unwrap_or_default();
            let refund_ref = provider.create_refund(&charge_ref, original.gross_amount)?;
            original.provider_refs.refund = Some(refund_ref.clone());
            store.update_transaction(&original)?;

            let mut draft = TransactionDraft::new(
                TransactionKind::Refund,
                original.gross_amount,
                0,
                original.gross_amount,
            );
            draft.payer = original.payee.clone();
            draft.payee = original.payer.clone();
            draft.related_license = original.related_license.clone();
            draft.provider_refs.refund = Some(refund_ref);
            let mut refund = Transaction::create(draft, now)?;
            refund.mark_completed(now)?;
            store.insert_transaction(&refund)?;

            let creator = original.creator_share.unwrap_or(0);
            if let Some(payee) = &original.payee {
                store.adjust_balances(payee, -creator, -creator, 0)?;
            }
            if let Some(payer) = &original.payer {
                store.adjust_balances(payer, 0, 0, -original.gross_amount)?;
            }

            info!(
                "refunded transaction {} ({} cents gross)",
                original.id, original.gross_amount
            );
            Ok(refund)
        })
    }

    /// Per-business totals over completed ledger records.
    pub fn revenue_summary(&self, business_id: &str) -> SettleResult<RevenueSummary> {
        self.store.revenue_summary(business_id)
    }
}
