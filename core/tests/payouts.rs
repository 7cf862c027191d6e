//! Payment-desk tests: license payment initiation, payout gating, refunds,
//! and the revenue summary.

use chrono::Utc;
use settlement_core::config::TierCatalog;
use settlement_core::error::{SettleError, SettleResult};
use settlement_core::license::License;
use settlement_core::licensing::Licensing;
use settlement_core::payments::{Payments, MIN_PAYOUT};
use settlement_core::provider::{
    ConnectAccountStatus, OfflineProvider, PaymentProvider, ProviderEvent,
};
use settlement_core::reconciler::EventReconciler;
use settlement_core::store::{Business, Media, SettleStore};
use settlement_core::transaction::{TransactionKind, TransactionStatus};
use settlement_core::types::Cents;

fn store_with_fixture() -> SettleStore {
    let store = SettleStore::in_memory().unwrap();
    store.migrate().unwrap();

    let mut alice = Business::new("alice".into(), "Alice Studio".into());
    alice.tier = "partner".into();
    alice.connect_account_ref = Some("acct_alice".into());
    alice.payouts_enabled = true;
    store.insert_business(&alice).unwrap();
    store
        .insert_business(&Business::new("bob".into(), "Bob Media".into()))
        .unwrap();
    store
        .insert_media(&Media {
            media_id: "m1".into(),
            business_id: "alice".into(),
            title: "Skyline Pack".into(),
            license_count: 0,
        })
        .unwrap();
    store
        .insert_license(&License::new(
            "l1".into(),
            "m1".into(),
            "alice".into(),
            "bob".into(),
            10_000,
            Some("1 year".into()),
            Utc::now(),
        ))
        .unwrap();
    store
}

/// Provider whose Connect account has payouts switched off.
struct PayoutsDisabledProvider;

impl PaymentProvider for PayoutsDisabledProvider {
    fn create_payment_intent(
        &self,
        _amount: Cents,
        _license_id: &str,
        _business_id: &str,
    ) -> SettleResult<String> {
        Ok("pi_disabled".into())
    }

    fn create_payout(&self, _account_ref: &str, _amount: Cents) -> SettleResult<String> {
        Ok("po_disabled".into())
    }

    fn create_refund(&self, _charge_ref: &str, _amount: Cents) -> SettleResult<String> {
        Ok("re_disabled".into())
    }

    fn retrieve_account(&self, _account_ref: &str) -> SettleResult<ConnectAccountStatus> {
        Ok(ConnectAccountStatus {
            details_submitted: true,
            charges_enabled: true,
            payouts_enabled: false,
        })
    }
}

#[test]
fn initiation_creates_a_pending_record_with_the_split() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let provider = OfflineProvider;

    let initiated = payments
        .initiate_license_payment("l1", "bob", &provider, Utc::now())
        .unwrap();
    assert!(!initiated.provider_payment_reference.is_empty());

    let txn = store
        .get_transaction(&initiated.transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Pending);
    assert_eq!(txn.kind, TransactionKind::LicensePayment);
    assert_eq!(txn.gross_amount, 10_000);
    assert_eq!(txn.creator_share, Some(8_712));
    assert_eq!(txn.payer.as_deref(), Some("bob"));
    assert_eq!(txn.payee.as_deref(), Some("alice"));
    assert_eq!(
        txn.provider_refs.payment_intent.as_deref(),
        Some(initiated.provider_payment_reference.as_str())
    );
}

#[test]
fn initiation_rejects_bad_callers_and_states() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let licensing = Licensing::new(&store, &catalog);
    let provider = OfflineProvider;
    let now = Utc::now();

    let err = payments
        .initiate_license_payment("l_missing", "bob", &provider, now)
        .unwrap_err();
    assert!(matches!(err, SettleError::LicenseNotFound { .. }));

    let err = payments
        .initiate_license_payment("l1", "alice", &provider, now)
        .unwrap_err();
    assert!(matches!(err, SettleError::NotLicensee { .. }));

    licensing.approve_license("l1", "alice", now).unwrap();
    let err = payments
        .initiate_license_payment("l1", "bob", &provider, now)
        .unwrap_err();
    assert!(matches!(err, SettleError::LicenseNotPending { .. }));
}

#[test]
fn payouts_enforce_the_minimum() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    store.adjust_balances("alice", 10_000, 10_000, 0).unwrap();

    let err = payments
        .request_payout("alice", MIN_PAYOUT - 1, &OfflineProvider, Utc::now())
        .unwrap_err();
    match err {
        SettleError::BelowMinimumPayout { requested, minimum } => {
            assert_eq!(requested, MIN_PAYOUT - 1);
            assert_eq!(minimum, MIN_PAYOUT);
        }
        other => panic!("expected BelowMinimumPayout, got {other:?}"),
    }
}

#[test]
fn payouts_enforce_the_available_balance() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    store.adjust_balances("alice", 3_000, 3_000, 0).unwrap();

    let err = payments
        .request_payout("alice", 5_000, &OfflineProvider, Utc::now())
        .unwrap_err();
    match err {
        SettleError::InsufficientBalance { available, requested } => {
            assert_eq!(available, 3_000);
            assert_eq!(requested, 5_000);
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }
}

#[test]
fn payouts_require_a_payout_enabled_connect_account() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    store.adjust_balances("bob", 10_000, 10_000, 0).unwrap();
    store.adjust_balances("alice", 10_000, 10_000, 0).unwrap();

    // bob has no Connect account at all.
    let err = payments
        .request_payout("bob", 5_000, &OfflineProvider, Utc::now())
        .unwrap_err();
    assert!(matches!(err, SettleError::NoConnectAccount { .. }));

    // alice has one, but the provider reports payouts disabled.
    let err = payments
        .request_payout("alice", 5_000, &PayoutsDisabledProvider, Utc::now())
        .unwrap_err();
    assert!(matches!(err, SettleError::NoConnectAccount { .. }));

    // Nothing was debited by the failed attempts.
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 10_000);
}

#[test]
fn a_granted_payout_debits_the_balance_once() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    store.adjust_balances("alice", 10_000, 10_000, 0).unwrap();

    let payout = payments
        .request_payout("alice", 6_000, &OfflineProvider, Utc::now())
        .unwrap();

    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 4_000);
    // Lifetime earnings are untouched by payouts.
    assert_eq!(alice.total_earnings, 10_000);

    let txn = store
        .get_transaction(&payout.transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!(txn.kind, TransactionKind::Payout);
    assert_eq!(txn.status, TransactionStatus::Pending);
    assert_eq!(txn.payee.as_deref(), Some("alice"));
    assert_eq!(
        txn.provider_refs.payout.as_deref(),
        Some(payout.provider_payout_reference.as_str())
    );
}

#[test]
fn refunds_reverse_the_settlement_effects() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    let event = ProviderEvent::PaymentSucceeded {
        event_id: "evt_1".into(),
        payment_ref: "pi_1".into(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
        license_id: Some("l1".into()),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, now).unwrap();
    let settled = store.find_by_payment_ref("pi_1").unwrap().unwrap();

    let refund = payments
        .refund_license_payment(&settled.id, &OfflineProvider, now)
        .unwrap();
    assert_eq!(refund.kind, TransactionKind::Refund);
    assert_eq!(refund.status, TransactionStatus::Completed);

    let original = store.get_transaction(&settled.id).unwrap().unwrap();
    assert_eq!(original.status, TransactionStatus::Refunded);
    assert!(original.provider_refs.refund.is_some());

    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 0);
    assert_eq!(alice.total_earnings, 0);
    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.total_spent, 0);

    // A refunded record cannot be refunded again.
    let err = payments
        .refund_license_payment(&settled.id, &OfflineProvider, now)
        .unwrap_err();
    assert!(matches!(err, SettleError::NotRefundable { .. }));
}

#[test]
fn revenue_summary_totals_completed_records() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    let event = ProviderEvent::PaymentSucceeded {
        event_id: "evt_1".into(),
        payment_ref: "pi_1".into(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
        license_id: Some("l1".into()),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, now).unwrap();

    let alice_summary = payments.revenue_summary("alice").unwrap();
    assert_eq!(alice_summary.completed_sales, 1);
    assert_eq!(alice_summary.gross_volume, 10_000);
    assert_eq!(alice_summary.total_earned, 8_712);
    assert_eq!(alice_summary.total_spent, 0);

    let bob_summary = payments.revenue_summary("bob").unwrap();
    assert_eq!(bob_summary.completed_sales, 0);
    assert_eq!(bob_summary.total_spent, 10_000);
}
