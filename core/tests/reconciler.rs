//! Reconciler tests: idempotent event application, the end-to-end
//! settlement scenario, dispute handling, subscription lifecycle, and
//! absorption of malformed events.

use chrono::{Duration, Utc};
use settlement_core::config::TierCatalog;
use settlement_core::license::{License, LicenseStatus};
use settlement_core::payments::Payments;
use settlement_core::provider::{OfflineProvider, ProviderEvent, WebhookEnvelope};
use settlement_core::reconciler::EventReconciler;
use settlement_core::store::{Business, Media, SettleStore};
use settlement_core::transaction::{TransactionKind, TransactionStatus};

fn store_with_fixture() -> SettleStore {
    let store = SettleStore::in_memory().unwrap();
    store.migrate().unwrap();

    let mut alice = Business::new("alice".into(), "Alice Studio".into());
    alice.tier = "partner".into();
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

fn payment_succeeded(event_id: &str, payment_ref: &str) -> ProviderEvent {
    ProviderEvent::PaymentSucceeded {
        event_id: event_id.into(),
        payment_ref: payment_ref.into(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
        license_id: Some("l1".into()),
        business_id: Some("bob".into()),
    }
}

#[test]
fn settlement_applies_the_partner_split_end_to_end() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    reconciler
        .settle_payment_event(&payment_succeeded("evt_1", "pi_1"), now)
        .unwrap();

    // One ledger record with the 90/10 partner split of $100.
    let txns = store.list_transactions().unwrap();
    assert_eq!(txns.len(), 1);
    let txn = &txns[0];
    assert_eq!(txn.kind, TransactionKind::LicensePayment);
    assert_eq!(txn.status, TransactionStatus::Completed);
    assert_eq!(txn.gross_amount, 10_000);
    assert_eq!(txn.processor_fee, 320);
    assert_eq!(txn.net_amount, 9_680);
    assert_eq!(txn.creator_share, Some(8_712));
    assert_eq!(txn.platform_share, Some(968));

    // Reserve bookkeeping stamped on the record.
    assert_eq!(txn.metadata.reserve_amount, Some(436));
    assert_eq!(txn.metadata.reserve_released, Some(false));
    let release = txn.metadata.reserve_release_date.unwrap();
    assert!(release - now >= Duration::days(89) && release - now <= Duration::days(91));

    // License approved with the transaction stamped.
    let license = store.get_license("l1").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Approved);
    assert_eq!(license.payment_transaction_id.as_deref(), Some(txn.id.as_str()));

    // Balances moved exactly once.
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 8_712);
    assert_eq!(alice.total_earnings, 8_712);
    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.total_spent, 10_000);
}

#[test]
fn duplicate_delivery_of_the_same_event_is_a_no_op() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    let event = payment_succeeded("evt_1", "pi_1");
    reconciler.settle_payment_event(&event, now).unwrap();
    reconciler.settle_payment_event(&event, now).unwrap();

    assert_eq!(store.list_transactions().unwrap().len(), 1);
    let license = store.get_license("l1").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Approved);
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 8_712);
    assert_eq!(store.processed_event_count().unwrap(), 1);
}

#[test]
fn redelivery_under_a_fresh_event_id_is_absorbed_by_the_payment_ref() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    reconciler
        .settle_payment_event(&payment_succeeded("evt_1", "pi_1"), now)
        .unwrap();
    reconciler
        .settle_payment_event(&payment_succeeded("evt_2", "pi_1"), now)
        .unwrap();

    assert_eq!(store.list_transactions().unwrap().len(), 1);
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 8_712);
    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.total_spent, 10_000);
}

#[test]
fn settlement_completes_an_initiated_payment_in_place() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let reconciler = EventReconciler::new(&store, &catalog);
    let provider = OfflineProvider;
    let now = Utc::now();

    let initiated = payments
        .initiate_license_payment("l1", "bob", &provider, now)
        .unwrap();
    assert_eq!(store.list_transactions().unwrap().len(), 1);

    let event = ProviderEvent::PaymentSucceeded {
        event_id: "evt_1".into(),
        payment_ref: initiated.provider_payment_reference.clone(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
        license_id: Some("l1".into()),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, now).unwrap();

    // Still one record: the pending one completed in place.
    let txns = store.list_transactions().unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].id, initiated.transaction_id);
    assert_eq!(txns[0].status, TransactionStatus::Completed);
    assert_eq!(txns[0].provider_refs.charge.as_deref(), Some("ch_1"));

    let license = store.get_license("l1").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Approved);
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 8_712);
}

#[test]
fn failed_payment_marks_the_license_payment_failed() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let payments = Payments::new(&store, &catalog);
    let reconciler = EventReconciler::new(&store, &catalog);
    let provider = OfflineProvider;
    let now = Utc::now();

    let initiated = payments
        .initiate_license_payment("l1", "bob", &provider, now)
        .unwrap();
    let event = ProviderEvent::PaymentFailed {
        event_id: "evt_1".into(),
        payment_ref: initiated.provider_payment_reference.clone(),
        license_id: Some("l1".into()),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, now).unwrap();

    let txn = store
        .get_transaction(&initiated.transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Failed);
    let license = store.get_license("l1").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::PaymentFailed);

    // No balances moved.
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 0);
}

#[test]
fn invoice_paid_records_one_subscription_payment() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    let event = ProviderEvent::InvoicePaid {
        event_id: "evt_1".into(),
        invoice_ref: "in_1".into(),
        charge_ref: Some("ch_9".into()),
        business_id: Some("bob".into()),
        amount: 1_900,
    };
    reconciler.settle_payment_event(&event, now).unwrap();

    let txns = store.list_transactions().unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].kind, TransactionKind::SubscriptionPayment);
    assert_eq!(txns[0].status, TransactionStatus::Completed);
    // Shares stay unset for subscription payments.
    assert_eq!(txns[0].creator_share, None);
    assert_eq!(txns[0].platform_share, None);

    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.total_spent, 1_900);
    assert_eq!(bob.subscription_status, "active");

    // Redelivery under a fresh event id keys off the charge reference.
    let event2 = ProviderEvent::InvoicePaid {
        event_id: "evt_2".into(),
        invoice_ref: "in_1".into(),
        charge_ref: Some("ch_9".into()),
        business_id: Some("bob".into()),
        amount: 1_900,
    };
    reconciler.settle_payment_event(&event2, now).unwrap();
    assert_eq!(store.list_transactions().unwrap().len(), 1);
    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.total_spent, 1_900);
}

#[test]
fn invoice_failure_marks_the_subscription_past_due() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);

    let event = ProviderEvent::InvoiceFailed {
        event_id: "evt_1".into(),
        invoice_ref: "in_1".into(),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, Utc::now()).unwrap();

    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.subscription_status, "past_due");
}

#[test]
fn subscription_events_are_structurally_idempotent() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();
    let period_end = (now + Duration::days(30)).timestamp();

    let created = ProviderEvent::SubscriptionCreated {
        event_id: "evt_1".into(),
        subscription_ref: "sub_1".into(),
        business_id: Some("bob".into()),
        tier: Some("contributor".into()),
        current_period_end: Some(period_end),
    };
    reconciler.settle_payment_event(&created, now).unwrap();

    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.tier, "contributor");
    assert_eq!(bob.subscription_status, "active");
    assert_eq!(
        bob.subscription_expires_at.map(|t| t.timestamp()),
        Some(period_end)
    );

    // Re-applying the same state under a new event id converges.
    let updated = ProviderEvent::SubscriptionUpdated {
        event_id: "evt_2".into(),
        subscription_ref: "sub_1".into(),
        business_id: Some("bob".into()),
        tier: Some("contributor".into()),
        current_period_end: Some(period_end),
    };
    reconciler.settle_payment_event(&updated, now).unwrap();
    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.tier, "contributor");
    assert_eq!(bob.subscription_status, "active");
}

#[test]
fn subscription_deletion_downgrades_without_touching_counters() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);

    store.set_subscription("bob", "partner", "active", None).unwrap();
    store.adjust_active_license_count("bob", 2).unwrap();

    let event = ProviderEvent::SubscriptionDeleted {
        event_id: "evt_1".into(),
        subscription_ref: "sub_1".into(),
        business_id: Some("bob".into()),
    };
    reconciler.settle_payment_event(&event, Utc::now()).unwrap();

    let bob = store.get_business("bob").unwrap().unwrap();
    assert_eq!(bob.tier, "free");
    assert_eq!(bob.subscription_status, "canceled");
    // Existing counters stay as they were.
    assert_eq!(bob.active_license_count, 2);
}

#[test]
fn account_updates_set_the_connect_flags() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);

    store
        .set_connect_account("alice", "acct_1", false, false, false)
        .unwrap();
    let event = ProviderEvent::AccountUpdated {
        event_id: "evt_1".into(),
        account_ref: "acct_1".into(),
        details_submitted: true,
        charges_enabled: true,
        payouts_enabled: true,
    };
    reconciler.settle_payment_event(&event, Utc::now()).unwrap();

    let alice = store.get_business("alice").unwrap().unwrap();
    assert!(alice.details_submitted);
    assert!(alice.charges_enabled);
    assert!(alice.payouts_enabled);

    // An account matching no business is absorbed.
    let unknown = ProviderEvent::AccountUpdated {
        event_id: "evt_2".into(),
        account_ref: "acct_missing".into(),
        details_submitted: true,
        charges_enabled: true,
        payouts_enabled: true,
    };
    assert!(reconciler.settle_payment_event(&unknown, Utc::now()).is_ok());
}

#[test]
fn disputes_claw_back_the_creator_share_once() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    reconciler
        .settle_payment_event(&payment_succeeded("evt_1", "pi_1"), now)
        .unwrap();
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 8_712);

    let dispute = ProviderEvent::DisputeCreated {
        event_id: "evt_2".into(),
        dispute_ref: "dp_1".into(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
    };
    reconciler.settle_payment_event(&dispute, now).unwrap();

    // Original disputed, chargeback appended, balance debited.
    let txns = store.list_transactions().unwrap();
    assert_eq!(txns.len(), 2);
    let original = txns
        .iter()
        .find(|t| t.kind == TransactionKind::LicensePayment)
        .unwrap();
    assert_eq!(original.status, TransactionStatus::Disputed);
    assert!(original.disputed_at.is_some());
    let chargeback = txns
        .iter()
        .find(|t| t.kind == TransactionKind::Chargeback)
        .unwrap();
    assert_eq!(chargeback.gross_amount, 10_000);
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 0);

    // A second dispute on the same charge appends another correction but
    // never debits twice.
    let dispute2 = ProviderEvent::DisputeCreated {
        event_id: "evt_3".into(),
        dispute_ref: "dp_2".into(),
        charge_ref: Some("ch_1".into()),
        amount: 10_000,
    };
    reconciler.settle_payment_event(&dispute2, now).unwrap();
    assert_eq!(store.list_transactions().unwrap().len(), 3);
    let alice = store.get_business("alice").unwrap().unwrap();
    assert_eq!(alice.revenue_balance, 0);
}

#[test]
fn malformed_and_unknown_correlations_are_absorbed() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);
    let now = Utc::now();

    // No license metadata at all.
    let no_meta = ProviderEvent::PaymentSucceeded {
        event_id: "evt_1".into(),
        payment_ref: "pi_1".into(),
        charge_ref: None,
        amount: 10_000,
        license_id: None,
        business_id: None,
    };
    assert!(reconciler.settle_payment_event(&no_meta, now).is_ok());

    // Unknown license.
    let bad_license = ProviderEvent::PaymentSucceeded {
        event_id: "evt_2".into(),
        payment_ref: "pi_2".into(),
        charge_ref: None,
        amount: 10_000,
        license_id: Some("l_missing".into()),
        business_id: Some("bob".into()),
    };
    assert!(reconciler.settle_payment_event(&bad_license, now).is_ok());

    // Dispute with no charge reference.
    let bad_dispute = ProviderEvent::DisputeCreated {
        event_id: "evt_3".into(),
        dispute_ref: "dp_1".into(),
        charge_ref: None,
        amount: 500,
    };
    assert!(reconciler.settle_payment_event(&bad_dispute, now).is_ok());

    // Nothing was written.
    assert!(store.list_transactions().unwrap().is_empty());
    let license = store.get_license("l1").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Pending);
}

#[test]
fn unrecognized_envelope_types_are_acknowledged_and_ignored() {
    let store = store_with_fixture();
    let catalog = TierCatalog::builtin();
    let reconciler = EventReconciler::new(&store, &catalog);

    let envelope: WebhookEnvelope = serde_json::from_str(
        r#"{"id": "evt_1", "type": "payout.reconciled", "data": {"object": {}}, "created": 1700000000}"#,
    )
    .unwrap();
    let event = ProviderEvent::from_envelope(&envelope);
    assert!(matches!(event, ProviderEvent::Unrecognized { .. }));
    assert!(reconciler.settle_payment_event(&event, Utc::now()).is_ok());
    assert!(store.list_transactions().unwrap().is_empty());
}

#[test]
fn envelopes_decode_into_typed_events() {
    let raw = r#"{
        "id": "evt_42",
        "type": "payment_intent.succeeded",
        "created": 1700000000,
        "data": {
            "object": {
                "id": "pi_42",
                "amount": 10000,
                "latest_charge": "ch_42",
                "metadata": {"licenseId": "l1", "businessId": "bob"}
            }
        }
    }"#;
    let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
    let event = ProviderEvent::from_envelope(&envelope);
    match event {
        ProviderEvent::PaymentSucceeded {
            event_id,
            payment_ref,
            charge_ref,
            amount,
            license_id,
            business_id,
        } => {
            assert_eq!(event_id, "evt_42");
            assert_eq!(payment_ref, "pi_42");
            assert_eq!(charge_ref.as_deref(), Some("ch_42"));
            assert_eq!(amount, 10_000);
            assert_eq!(license_id.as_deref(), Some("l1"));
            assert_eq!(business_id.as_deref(), Some("bob"));
        }
        other => panic!("expected PaymentSucceeded, got {other:?}"),
    }
}
