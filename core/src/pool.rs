//! Pool (collection) distribution: a shared creator share split across
//! member businesses by contribution percentage.

use crate::{
    config::RevenueSplit,
    error::{SettleError, SettleResult},
    revenue::{self, RevenueBreakdown},
    transaction::Transaction,
    types::{Cents, EntityId, CENT_TOLERANCE},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMember {
    pub business_id: EntityId,
    pub contribution_percent: f64,
}

/// Membership of one pool. Construction enforces the contribution invariant
/// (non-empty, each percentage in [0, 100], sum 100 within tolerance), so
/// every holder of a `PoolMembers` can assume it.
#[derive(Debug, Clone)]
pub struct PoolMembers(Vec<PoolMember>);

impl PoolMembers {
    pub fn new(members: Vec<PoolMember>) -> SettleResult<Self> {
        if members.is_empty() {
            return Err(SettleError::InvalidPoolContribution {
                detail: "pool has no members".into(),
            });
        }
        for m in &members {
            if !(0.0..=100.0).contains(&m.contribution_percent) {
                return Err(SettleError::InvalidPoolContribution {
                    detail: format!(
                        "member '{}' contributes {}, outside [0, 100]",
                        m.business_id, m.contribution_percent
                    ),
                });
            }
        }
        let total: f64 = members.iter().map(|m| m.contribution_percent).sum();
        if (total - 100.0).abs() > revenue::PCT_TOLERANCE {
            return Err(SettleError::InvalidPoolContribution {
                detail: format!("contributions sum to {total}, expected 100"),
            });
        }
        Ok(Self(members))
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberDistribution {
    pub business_id: EntityId,
    pub contribution_percent: f64,
    pub member_share: Cents,
    pub reserve_amount: Cents,
    pub immediate_payout: Cents,
    pub reserve_release_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolDistribution {
    pub base_split: RevenueBreakdown,
    pub member_distributions: Vec<MemberDistribution>,
    pub total_distributed: Cents,
}

/// Allocate a pool's aggregate creator share across members by contribution
/// percentage, with the chargeback reserve applied per member.
///
/// The conservation check at the end is defensive: with validated inputs the
/// per-member rounding never drifts past the tolerance, so tripping it means
/// a logic bug upstream.
pub fn distribute_pool(
    gross: Cents,
    split: &RevenueSplit,
    members: &PoolMembers,
    now: DateTime<Utc>,
) -> SettleResult<PoolDistribution> {
    let base = revenue::split_revenue(gross, split)?;

    let mut distributions = Vec::with_capacity(members.len());
    let mut total_distributed: Cents = 0;
    for member in members.members() {
        let member_share = revenue::round_cents(
            base.creator_share as f64 * member.contribution_percent / 100.0,
        );
        let reserve = revenue::hold_reserve(member_share, now)?;
        total_distributed += member_share;
        distributions.push(MemberDistribution {
            business_id: member.business_id.clone(),
            contribution_percent: member.contribution_percent,
            member_share,
            reserve_amount: reserve.reserve_amount,
            immediate_payout: reserve.immediate_payout,
            reserve_release_date: reserve.reserve_release_date,
        });
    }

    if (total_distributed - base.creator_share).abs() > CENT_TOLERANCE {
        return Err(SettleError::DistributionMismatch {
            expected: base.creator_share,
            distributed: total_distributed,
        });
    }

    Ok(PoolDistribution {
        base_split: base,
        member_distributions: distributions,
        total_distributed,
    })
}

/// Per-pool totals over settled transactions. Reporting only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolSummary {
    pub transaction_count: i64,
    pub gross_amount: Cents,
    pub processor_fee: Cents,
    pub net_amount: Cents,
    pub creator_share: Cents,
    pub platform_share: Cents,
}

/// Aggregate completed transactions by their `collection_id` metadata tag.
/// Transactions without the tag, or not yet completed, are skipped.
pub fn group_by_pool(transactions: &[Transaction]) -> HashMap<EntityId, PoolSummary> {
    let mut pools: HashMap<EntityId, PoolSummary> = HashMap::new();
    for txn in transactions {
        if !txn.is_completed() {
            continue;
        }
        let Some(collection_id) = txn.metadata.collection_id.as_ref() else {
            continue;
        };
        let summary = pools.entry(collection_id.clone()).or_default();
        summary.transaction_count += 1;
        summary.gross_amount += txn.gross_amount;
        summary.processor_fee += txn.processor_fee;
        summary.net_amount += txn.net_amount;
        summary.creator_share += txn.creator_share.unwrap_or(0);
        summary.platform_share += txn.platform_share.unwrap_or(0);
    }
    pools
}
