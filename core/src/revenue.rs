//! Revenue calculators: processor fee, tier split, chargeback reserve.
//!
//! All functions are pure (the reserve takes the clock as an argument).
//! Amounts are integer cents; fractional-cent products round half away from
//! zero, independently per computed quantity.

use crate::{
    config::RevenueSplit,
    error::{SettleError, SettleResult},
    types::Cents,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Processor rate: 2.9% of gross.
pub const PROCESSOR_FEE_RATE: f64 = 0.029;
/// Fixed processor component, charged even on a zero amount.
pub const PROCESSOR_FEE_FIXED: Cents = 30;
/// Share of a creator payout withheld against chargebacks.
pub const RESERVE_RATE: f64 = 0.05;
/// How long the chargeback reserve is held before release.
pub const RESERVE_HOLD_DAYS: i64 = 90;
/// Percentage sums may drift this far from 100 before being rejected.
pub const PCT_TOLERANCE: f64 = 0.01;

/// Round a fractional-cent product to the nearest whole cent.
pub(crate) fn round_cents(value: f64) -> Cents {
    value.round() as Cents
}

/// The payment processor's deduction from a gross amount.
pub fn processor_fee(gross: Cents) -> SettleResult<Cents> {
    if gross < 0 {
        return Err(SettleError::InvalidAmount {
            amount: gross,
            context: "gross amount",
        });
    }
    Ok(round_cents(gross as f64 * PROCESSOR_FEE_RATE) + PROCESSOR_FEE_FIXED)
}

/// A fee-adjusted, tier-weighted division of one gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevenueBreakdown {
    pub gross_amount: Cents,
    pub processor_fee: Cents,
    pub net_amount: Cents,
    pub creator_share: Cents,
    pub platform_share: Cents,
}

/// Split a gross amount into creator and platform shares per the tier split.
///
/// Each share is rounded from the unrounded net independently, not derived
/// by subtraction, so shares can drift from the net by up to a cent.
pub fn split_revenue(gross: Cents, split: &RevenueSplit) -> SettleResult<RevenueBreakdown> {
    if (split.creator_pct + split.platform_pct - 100.0).abs() > PCT_TOLERANCE {
        return Err(SettleError::InvalidTierSplit {
            creator_pct: split.creator_pct,
            platform_pct: split.platform_pct,
        });
    }
    let fee = processor_fee(gross)?;
    let net = gross - fee;
    Ok(RevenueBreakdown {
        gross_amount: gross,
        processor_fee: fee,
        net_amount: net,
        creator_share: round_cents(net as f64 * split.creator_pct / 100.0),
        platform_share: round_cents(net as f64 * split.platform_pct / 100.0),
    })
}

/// A creator share divided into an immediately payable portion and a
/// time-locked chargeback reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReserveSplit {
    pub total_creator_share: Cents,
    pub reserve_amount: Cents,
    pub immediate_payout: Cents,
    pub reserve_release_date: DateTime<Utc>,
}

pub fn hold_reserve(creator_share: Cents, now: DateTime<Utc>) -> SettleResult<ReserveSplit> {
    if creator_share < 0 {
        return Err(SettleError::InvalidAmount {
            amount: creator_share,
            context: "creator share",
        });
    }
    let reserve_amount = round_cents(creator_share as f64 * RESERVE_RATE);
    Ok(ReserveSplit {
        total_creator_share: creator_share,
        reserve_amount,
        immediate_payout: creator_share - reserve_amount,
        reserve_release_date: now + Duration::days(RESERVE_HOLD_DAYS),
    })
}
