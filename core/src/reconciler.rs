//! Event reconciliation: maps each externally delivered payment event to
//! exactly one effect on the ledger, the license lifecycle, and business
//! balances.
//!
//! Idempotency is layered. The provider event id is claimed in
//! `processed_event` before anything else, so redelivering the same delivery
//! is a no-op. Payment events are additionally keyed by the provider's
//! payment reference: an existing ledger record is transitioned instead of
//! duplicated, and a record already in the implied terminal state absorbs
//! the event. Everything runs inside one store transaction, so the
//! ledger/license/balance triple commits or rolls back together.
//!
//! Events with missing correlation ids or unknown entities are logged and
//! absorbed: the provider cannot fix a missing id by redelivering.

use crate::{
    config::TierCatalog,
    error::SettleResult,
    provider::ProviderEvent,
    revenue,
    store::SettleStore,
    transaction::{Transaction, TransactionDraft, TransactionKind},
    types::Cents,
};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};

pub struct EventReconciler<'a> {
    store: &'a SettleStore,
    catalog: &'a TierCatalog,
}

impl<'a> EventReconciler<'a> {
    pub fn new(store: &'a SettleStore, catalog: &'a TierCatalog) -> Self {
        Self { store, catalog }
    }

    /// Apply one provider event. Errors out only on store or calculator
    /// failures, which roll back and leave the event safe to redeliver;
    /// malformed correlation never errors.
    pub fn settle_payment_event(
        &self,
        event: &ProviderEvent,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        self.store.transactionally(|store| {
            if !store.claim_event(event.event_id(), event.type_name(), now)? {
                debug!(
                    "event {} ({}) already processed; skipping",
                    event.event_id(),
                    event.type_name()
                );
                return Ok(());
            }
            match event {
                ProviderEvent::PaymentSucceeded {
                    payment_ref,
                    charge_ref,
                    amount,
                    license_id,
                    business_id,
                    ..
                } => self.on_payment_succeeded(
                    store,
                    payment_ref,
                    charge_ref.as_deref(),
                    *amount,
                    license_id.as_deref(),
                    business_id.as_deref(),
                    now,
                ),
                ProviderEvent::PaymentFailed {
                    payment_ref,
                    license_id,
                    ..
                } => self.on_payment_failed(store, payment_ref, license_id.as_deref(), now),
                ProviderEvent::InvoicePaid {
                    invoice_ref,
                    charge_ref,
                    business_id,
                    amount,
                    ..
                } => self.on_invoice_paid(
                    store,
                    invoice_ref,
                    charge_ref.as_deref(),
                    business_id.as_deref(),
                    *amount,
                    now,
                ),
                ProviderEvent::InvoiceFailed {
                    invoice_ref,
                    business_id,
                    ..
                } => self.on_invoice_failed(store, invoice_ref, business_id.as_deref()),
                ProviderEvent::SubscriptionCreated {
                    business_id,
                    tier,
                    current_period_end,
                    ..
                }
                | ProviderEvent::SubscriptionUpdated {
                    business_id,
                    tier,
                    current_period_end,
                    ..
                } => self.on_subscription_set(
                    store,
                    business_id.as_deref(),
                    tier.as_deref(),
                    *current_period_end,
                ),
                ProviderEvent::SubscriptionDeleted { business_id, .. } => {
                    self.on_subscription_deleted(store, business_id.as_deref())
                }
                ProviderEvent::AccountUpdated {
                    account_ref,
                    details_submitted,
                    charges_enabled,
                    payouts_enabled,
                    ..
                } => self.on_account_updated(
                    store,
                    account_ref,
                    *details_submitted,
                    *charges_enabled,
                    *payouts_enabled,
                ),
                ProviderEvent::DisputeCreated {
                    dispute_ref,
                    charge_ref,
                    amount,
                    ..
                } => self.on_dispute_created(store, dispute_ref, charge_ref.as_deref(), *amount, now),
                ProviderEvent::Unrecognized { event_type, .. } => {
                    debug!("ignoring unrecognized event type '{event_type}'");
                    Ok(())
                }
            }
        })
    }

    // ── Payments ───────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn on_payment_succeeded(
        &self,
        store: &SettleStore,
        payment_ref: &str,
        charge_ref: Option<&str>,
        amount: Cents,
        license_id: Option<&str>,
        business_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        // An existing record for this reference is transitioned, never
        // duplicated.
        if let Some(mut txn) = store.find_by_payment_ref(payment_ref)? {
            if txn.is_completed() {
                debug!("payment {payment_ref} already settled; skipping");
                return Ok(());
            }
            if !txn.is_pending() {
                warn!(
                    "payment {payment_ref} arrived for {} transaction {}; dropping",
                    txn.status.as_str(),
                    txn.id
                );
                return Ok(());
            }
            if let Some(charge) = charge_ref {
                txn.provider_refs.charge = Some(charge.to_string());
            }
            self.stamp_reserve(&mut txn, now)?;
            txn.mark_completed(now)?;
            store.update_transaction(&txn)?;
            return self.apply_settlement_effects(store, &txn, now);
        }

        // No record yet (settlement raced ahead of, or happened without, the
        // initiation path): correlation metadata is required to create one.
        let Some(license_id) = license_id else {
            warn!("payment {payment_ref} carries no licenseId metadata; dropping");
            return Ok(());
        };
        let Some(license) = store.get_license(license_id)? else {
            warn!("payment {payment_ref} references unknown license {license_id}; dropping");
            return Ok(());
        };
        let Some(licensor) = store.get_business(&license.licensor)? else {
            warn!(
                "payment {payment_ref} references unknown licensor {}; dropping",
                license.licensor
            );
            return Ok(());
        };

        let split = self.catalog.split_for(&licensor.tier);
        let breakdown = revenue::split_revenue(amount, &split)?;
        let mut draft = TransactionDraft::new(
            TransactionKind::LicensePayment,
            breakdown.gross_amount,
            breakdown.processor_fee,
            breakdown.net_amount,
        );
        draft.creator_share = Some(breakdown.creator_share);
        draft.platform_share = Some(breakdown.platform_share);
        draft.payer = Some(match business_id {
            Some(b) if store.get_business(b)?.is_some() => b.to_string(),
            Some(b) => {
                warn!("payment {payment_ref} names unknown business {b}; using the licensee");
                license.licensee.clone()
            }
            None => license.licensee.clone(),
        });
        draft.payee = Some(license.licensor.clone());
        draft.related_license = Some(license.id.clone());
        draft.provider_refs.payment_intent = Some(payment_ref.to_string());
        draft.provider_refs.charge = charge_ref.map(str::to_string);

        let mut txn = Transaction::create(draft, now)?;
        self.stamp_reserve(&mut txn, now)?;
        txn.mark_completed(now)?;
        store.insert_transaction(&txn)?;
        self.apply_settlement_effects(store, &txn, now)
    }

    /// Record the chargeback-reserve bookkeeping on a completing payment.
    fn stamp_reserve(&self, txn: &mut Transaction, now: DateTime<Utc>) -> SettleResult<()> {
        if txn.metadata.reserve_amount.is_some() {
            return Ok(());
        }
        let Some(creator_share) = txn.creator_share else {
            return Ok(());
        };
        let reserve = revenue::hold_reserve(creator_share, now)?;
        txn.metadata.reserve_amount = Some(reserve.reserve_amount);
        txn.metadata.reserve_release_date = Some(reserve.reserve_release_date);
        txn.metadata.reserve_released = Some(false);
        Ok(())
    }

    /// The license transition and balance adjustments owed by one completed
    /// license payment. Runs exactly once per record: callers only reach
    /// here on the `pending → completed` transition.
    fn apply_settlement_effects(
        &self,
        store: &SettleStore,
        txn: &Transaction,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        if let Some(license_id) = &txn.related_license {
            match store.get_license(license_id)? {
                Some(mut license) if license.is_pending() => {
                    license.approve_via_payment(&txn.id, now)?;
                    store.update_license(&license)?;
                }
                Some(license) => {
                    debug!(
                        "license {} already {}; settlement leaves it unchanged",
                        license.id,
                        license.status.as_str()
                    );
                }
                None => {
                    warn!("settled transaction {} references unknown license {license_id}", txn.id);
                }
            }
        }

        let creator_share = txn.creator_share.unwrap_or(0);
        if let Some(payee) = &txn.payee {
            store.adjust_balances(payee, creator_share, creator_share, 0)?;
        }
        if let Some(payer) = &txn.payer {
            store.adjust_balances(payer, 0, 0, txn.gross_amount)?;
        }
        info!(
            "settled {} ({} cents gross, {} to creator)",
            txn.id, txn.gross_amount, creator_share
        );
        Ok(())
    }

    fn on_payment_failed(
        &self,
        store: &SettleStore,
        payment_ref: &str,
        license_id: Option<&str>,
        _now: DateTime<Utc>,
    ) -> SettleResult<()> {
        let mut license_ref = license_id.map(str::to_string);

        if let Some(mut txn) = store.find_by_payment_ref(payment_ref)? {
            if txn.is_pending() {
                txn.mark_failed()?;
                store.update_transaction(&txn)?;
                info!("payment {payment_ref} failed; transaction {} marked failed", txn.id);
            } else {
                debug!(
                    "payment {payment_ref} failure for {} transaction {}; skipping",
                    txn.status.as_str(),
                    txn.id
                );
            }
            license_ref = license_ref.or(txn.related_license);
        }

        let Some(license_id) = license_ref else {
            warn!("failed payment {payment_ref} has no license correlation; dropping");
            return Ok(());
        };
        match store.get_license(&license_id)? {
            Some(mut license) if license.is_pending() => {
                license.fail_payment()?;
                store.update_license(&license)?;
                info!("license {} marked payment_failed", license.id);
            }
            Some(license) => {
                debug!(
                    "license {} is {}; payment failure leaves it unchanged",
                    license.id,
                    license.status.as_str()
                );
            }
            None => {
                warn!("failed payment {payment_ref} references unknown license {license_id}");
            }
        }
        Ok(())
    }

    // ── Subscriptions ──────────────────────────────────────────

    fn on_invoice_paid(
        &self,
        store: &SettleStore,
        invoice_ref: &str,
        charge_ref: Option<&str>,
        business_id: Option<&str>,
        amount: Cents,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        // Key by the charge when the invoice carries one, else by the
        // invoice itself.
        let settlement_ref = charge_ref.unwrap_or(invoice_ref);
        if let Some(txn) = store.find_by_payment_ref(settlement_ref)? {
            debug!(
                "invoice {invoice_ref} already recorded as transaction {}; skipping",
                txn.id
            );
            return Ok(());
        }
        let Some(business_id) = business_id else {
            warn!("invoice {invoice_ref} carries no businessId metadata; dropping");
            return Ok(());
        };
        if store.get_business(business_id)?.is_none() {
            warn!("invoice {invoice_ref} references unknown business {business_id}; dropping");
            return Ok(());
        }

        let fee = revenue::processor_fee(amount)?;
        let mut draft =
            TransactionDraft::new(TransactionKind::SubscriptionPayment, amount, fee, amount - fee);
        draft.payer = Some(business_id.to_string());
        draft.provider_refs.charge = Some(settlement_ref.to_string());
        draft
            .metadata
            .extra
            .insert("invoiceRef".into(), invoice_ref.into());
        let mut txn = Transaction::create(draft, now)?;
        txn.mark_completed(now)?;
        store.insert_transaction(&txn)?;

        store.adjust_balances(business_id, 0, 0, amount)?;
        store.set_subscription_status(business_id, "active")?;
        info!("invoice {invoice_ref} settled for {business_id} ({amount} cents)");
        Ok(())
    }

    fn on_invoice_failed(
        &self,
        store: &SettleStore,
        invoice_ref: &str,
        business_id: Option<&str>,
    ) -> SettleResult<()> {
        let Some(business_id) = business_id else {
            warn!("failed invoice {invoice_ref} carries no businessId metadata; dropping");
            return Ok(());
        };
        if store.get_business(business_id)?.is_none() {
            warn!("failed invoice {invoice_ref} references unknown business {business_id}; dropping");
            return Ok(());
        }
        store.set_subscription_status(business_id, "past_due")?;
        info!("subscription for {business_id} marked past_due");
        Ok(())
    }

    /// Subscription created/updated: structurally idempotent, re-applying
    /// "set tier X, status active, expiry Y" converges.
    fn on_subscription_set(
        &self,
        store: &SettleStore,
        business_id: Option<&str>,
        tier: Option<&str>,
        current_period_end: Option<i64>,
    ) -> SettleResult<()> {
        let Some(business_id) = business_id else {
            warn!("subscription event carries no businessId metadata; dropping");
            return Ok(());
        };
        let Some(business) = store.get_business(business_id)? else {
            warn!("subscription event references unknown business {business_id}; dropping");
            return Ok(());
        };
        let requested = tier.unwrap_or(&business.tier);
        let effective = if self.catalog.get(requested).is_some() {
            requested
        } else {
            warn!(
                "subscription event names unknown tier '{requested}'; keeping '{}'",
                business.tier
            );
            &business.tier
        };
        let expires_at = current_period_end.and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        store.set_subscription(business_id, effective, "active", expires_at)?;
        info!("business {business_id} subscribed on tier '{effective}'");
        Ok(())
    }

    /// Subscription deleted: back to the free tier. Existing counters stay
    /// as they are; limits only constrain future approvals.
    fn on_subscription_deleted(
        &self,
        store: &SettleStore,
        business_id: Option<&str>,
    ) -> SettleResult<()> {
        let Some(business_id) = business_id else {
            warn!("subscription deletion carries no businessId metadata; dropping");
            return Ok(());
        };
        if store.get_business(business_id)?.is_none() {
            warn!("subscription deletion references unknown business {business_id}; dropping");
            return Ok(());
        }
        store.set_subscription(business_id, "free", "canceled", None)?;
        info!("business {business_id} downgraded to free tier");
        Ok(())
    }

    // ── Connect accounts ───────────────────────────────────────

    fn on_account_updated(
        &self,
        store: &SettleStore,
        account_ref: &str,
        details_submitted: bool,
        charges_enabled: bool,
        payouts_enabled: bool,
    ) -> SettleResult<()> {
        let Some(business) = store.get_business_by_connect_ref(account_ref)? else {
            warn!("account {account_ref} matches no business; dropping");
            return Ok(());
        };
        store.set_connect_account(
            &business.business_id,
            account_ref,
            details_submitted,
            charges_enabled,
            payouts_enabled,
        )?;
        info!(
            "connect account {account_ref} updated for {} (payouts_enabled={payouts_enabled})",
            business.business_id
        );
        Ok(())
    }

    // ── Disputes ───────────────────────────────────────────────

    /// A dispute always appends a `chargeback` record; the original's
    /// transition to `disputed` and the creator-balance debit happen at
    /// most once.
    fn on_dispute_created(
        &self,
        store: &SettleStore,
        dispute_ref: &str,
        charge_ref: Option<&str>,
        amount: Cents,
        now: DateTime<Utc>,
    ) -> SettleResult<()> {
        let Some(charge_ref) = charge_ref else {
            warn!("dispute {dispute_ref} carries no charge reference; dropping");
            return Ok(());
        };
        let Some(mut original) = store.find_original_by_charge_ref(charge_ref)? else {
            warn!("dispute {dispute_ref} references unknown charge {charge_ref}; dropping");
            return Ok(());
        };

        if original.is_completed() {
            original.mark_disputed(now)?;
            store.update_transaction(&original)?;
            let creator_share = original.creator_share.unwrap_or(0);
            if let Some(payee) = &original.payee {
                store.adjust_balances(payee, -creator_share, 0, 0)?;
            }
            info!(
                "transaction {} disputed; {creator_share} cents clawed back",
                original.id
            );
        } else {
            debug!(
                "dispute {dispute_ref} for {} transaction {}; no transition",
                original.status.as_str(),
                original.id
            );
        }

        let mut draft = TransactionDraft::new(TransactionKind::Chargeback, amount, 0, amount);
        draft.payer = original.payee.clone();
        draft.related_license = original.related_license.clone();
        draft.provider_refs.charge = Some(charge_ref.to_string());
        draft
            .metadata
            .extra
            .insert("disputeRef".into(), dispute_ref.into());
        let mut chargeback = Transaction::create(draft, now)?;
        chargeback.mark_completed(now)?;
        store.insert_transaction(&chargeback)?;
        Ok(())
    }
}
