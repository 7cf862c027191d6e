//! Pool distribution tests: contribution validation, conservation of the
//! creator share across members, and per-pool reporting.

use chrono::Utc;
use settlement_core::config::RevenueSplit;
use settlement_core::error::SettleError;
use settlement_core::pool::{distribute_pool, group_by_pool, PoolMember, PoolMembers};
use settlement_core::transaction::{Transaction, TransactionDraft, TransactionKind};

fn member(id: &str, pct: f64) -> PoolMember {
    PoolMember {
        business_id: id.into(),
        contribution_percent: pct,
    }
}

fn free_split() -> RevenueSplit {
    RevenueSplit {
        creator_pct: 80.0,
        platform_pct: 20.0,
    }
}

#[test]
fn membership_requires_contributions_summing_to_100() {
    assert!(PoolMembers::new(vec![member("a", 60.0), member("b", 40.0)]).is_ok());
    // Within the 0.01 tolerance.
    assert!(PoolMembers::new(vec![member("a", 60.0), member("b", 39.995)]).is_ok());

    let low = PoolMembers::new(vec![member("a", 60.0), member("b", 39.9)]).unwrap_err();
    assert!(matches!(low, SettleError::InvalidPoolContribution { .. }));
    let high = PoolMembers::new(vec![member("a", 60.0), member("b", 40.1)]).unwrap_err();
    assert!(matches!(high, SettleError::InvalidPoolContribution { .. }));
}

#[test]
fn membership_rejects_empty_pools() {
    let err = PoolMembers::new(vec![]).unwrap_err();
    assert!(matches!(err, SettleError::InvalidPoolContribution { .. }));
}

#[test]
fn membership_rejects_out_of_range_contributions() {
    let err = PoolMembers::new(vec![member("a", 150.0), member("b", -50.0)]).unwrap_err();
    assert!(matches!(err, SettleError::InvalidPoolContribution { .. }));
}

#[test]
fn distribution_conserves_the_creator_share() {
    let members = PoolMembers::new(vec![member("a", 60.0), member("b", 40.0)]).unwrap();
    let d = distribute_pool(10_000, &free_split(), &members, Utc::now()).unwrap();

    // Base split of $100 on the 80/20 tier.
    assert_eq!(d.base_split.creator_share, 7_744);
    assert_eq!(d.member_distributions[0].member_share, 4_646); // 60% of 7744
    assert_eq!(d.member_distributions[1].member_share, 3_098); // 40% of 7744
    assert_eq!(d.total_distributed, d.base_split.creator_share);
}

#[test]
fn distribution_survives_uneven_three_way_rounding() {
    let members = PoolMembers::new(vec![
        member("a", 33.33),
        member("b", 33.33),
        member("c", 33.34),
    ])
    .unwrap();
    let d = distribute_pool(10_000, &free_split(), &members, Utc::now()).unwrap();
    let sum: i64 = d
        .member_distributions
        .iter()
        .map(|m| m.member_share)
        .sum();
    assert!((sum - d.base_split.creator_share).abs() <= 1);
}

#[test]
fn distribution_applies_the_reserve_per_member() {
    let now = Utc::now();
    let members = PoolMembers::new(vec![member("a", 100.0)]).unwrap();
    let d = distribute_pool(10_000, &free_split(), &members, now).unwrap();

    let m = &d.member_distributions[0];
    assert_eq!(m.member_share, 7_744);
    assert_eq!(m.reserve_amount, 387);
    assert_eq!(m.immediate_payout, 7_357);
    assert_eq!(m.reserve_amount + m.immediate_payout, m.member_share);
}

#[test]
fn distribution_keeps_member_percentages() {
    let members = PoolMembers::new(vec![member("a", 25.0), member("b", 75.0)]).unwrap();
    let d = distribute_pool(5_000, &free_split(), &members, Utc::now()).unwrap();
    assert_eq!(d.member_distributions[0].contribution_percent, 25.0);
    assert_eq!(d.member_distributions[1].contribution_percent, 75.0);
}

#[test]
fn membership_loads_validated_from_the_store() {
    use settlement_core::store::{Business, SettleStore};

    let store = SettleStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
        .insert_business(&Business::new("a".into(), "A".into()))
        .unwrap();
    store
        .insert_business(&Business::new("b".into(), "B".into()))
        .unwrap();
    store.insert_collection_member("pool-1", "a", 60.0).unwrap();
    store.insert_collection_member("pool-1", "b", 40.0).unwrap();
    // A second collection whose contributions never reached 100.
    store.insert_collection_member("pool-2", "a", 55.0).unwrap();

    let members = store.get_pool_members("pool-1").unwrap();
    let d = distribute_pool(10_000, &free_split(), &members, Utc::now()).unwrap();
    assert_eq!(d.total_distributed, d.base_split.creator_share);

    assert!(matches!(
        store.get_pool_members("pool-2").unwrap_err(),
        SettleError::InvalidPoolContribution { .. }
    ));
    assert!(matches!(
        store.get_pool_members("pool-unknown").unwrap_err(),
        SettleError::InvalidPoolContribution { .. }
    ));
}

fn pooled_txn(collection: Option<&str>, completed: bool) -> Transaction {
    let now = Utc::now();
    let mut draft = TransactionDraft::new(TransactionKind::LicensePayment, 10_000, 320, 9_680);
    draft.creator_share = Some(7_744);
    draft.platform_share = Some(1_936);
    draft.payer = Some("buyer".into());
    draft.payee = Some("seller".into());
    draft.metadata.collection_id = collection.map(str::to_string);
    let mut txn = Transaction::create(draft, now).unwrap();
    if completed {
        txn.mark_completed(now).unwrap();
    }
    txn
}

#[test]
fn group_by_pool_aggregates_tagged_settled_transactions() {
    let txns = vec![
        pooled_txn(Some("pool-1"), true),
        pooled_txn(Some("pool-1"), true),
        pooled_txn(Some("pool-2"), true),
        pooled_txn(None, true),          // untagged: skipped
        pooled_txn(Some("pool-1"), false), // pending: skipped
    ];
    let pools = group_by_pool(&txns);

    assert_eq!(pools.len(), 2);
    let p1 = &pools["pool-1"];
    assert_eq!(p1.transaction_count, 2);
    assert_eq!(p1.gross_amount, 20_000);
    assert_eq!(p1.processor_fee, 640);
    assert_eq!(p1.net_amount, 19_360);
    assert_eq!(p1.creator_share, 15_488);
    assert_eq!(p1.platform_share, 3_872);
    assert_eq!(pools["pool-2"].transaction_count, 1);
}
