//! Tier catalog: per-tier pricing, resource limits, and revenue split.
//!
//! Loaded once at startup and passed by reference into the components that
//! need it. The catalog is immutable for the lifetime of the process.

use crate::types::Cents;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the net amount of a settled payment is divided between the rights
/// holder and the platform. Percentages sum to 100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RevenueSplit {
    pub creator_pct: f64,
    pub platform_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_active_licenses: i64,
    pub max_uploads: i64,
    pub max_downloads: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier_id: String,
    pub label: String,
    pub price_per_month: Cents,
    pub revenue_split: RevenueSplit,
    pub limits: TierLimits,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TierCatalogFile {
    tiers: Vec<TierConfig>,
}

#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: HashMap<String, TierConfig>,
    /// The `free` tier, kept separately so unknown tier ids always resolve.
    fallback: TierConfig,
}

impl TierCatalog {
    /// Load from a JSON catalog file.
    /// In tests and the runner, use TierCatalog::builtin().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: TierCatalogFile = serde_json::from_str(&content)?;
        Self::from_tiers(file.tiers)
            .map_err(|_| anyhow::anyhow!("Catalog {path} does not define a 'free' tier"))
    }

    fn from_tiers(tiers: Vec<TierConfig>) -> Result<Self, ()> {
        let tiers: HashMap<String, TierConfig> =
            tiers.into_iter().map(|t| (t.tier_id.clone(), t)).collect();
        let fallback = tiers.get("free").cloned().ok_or(())?;
        Ok(Self { tiers, fallback })
    }

    pub fn get(&self, tier: &str) -> Option<&TierConfig> {
        self.tiers.get(tier)
    }

    /// Tier config, falling back to `free` for unknown tier ids.
    pub fn get_or_free(&self, tier: &str) -> &TierConfig {
        self.tiers.get(tier).unwrap_or(&self.fallback)
    }

    pub fn split_for(&self, tier: &str) -> RevenueSplit {
        self.get_or_free(tier).revenue_split
    }

    pub fn limits_for(&self, tier: &str) -> &TierLimits {
        &self.get_or_free(tier).limits
    }

    /// The built-in marketplace catalog. Used when no catalog file is
    /// supplied (tests, the runner).
    pub fn builtin() -> Self {
        let tiers = [
            TierConfig {
                tier_id: "free".into(),
                label: "Free".into(),
                price_per_month: 0,
                revenue_split: RevenueSplit { creator_pct: 80.0, platform_pct: 20.0 },
                limits: TierLimits {
                    max_active_licenses: 5,
                    max_uploads: 10,
                    max_downloads: 50,
                },
                features: vec!["basic_catalog".into()],
            },
            TierConfig {
                tier_id: "contributor".into(),
                label: "Contributor".into(),
                price_per_month: 1_900,
                revenue_split: RevenueSplit { creator_pct: 85.0, platform_pct: 15.0 },
                limits: TierLimits {
                    max_active_licenses: 25,
                    max_uploads: 100,
                    max_downloads: 500,
                },
                features: vec!["basic_catalog".into(), "collections".into()],
            },
            TierConfig {
                tier_id: "partner".into(),
                label: "Partner".into(),
                price_per_month: 4_900,
                revenue_split: RevenueSplit { creator_pct: 90.0, platform_pct: 10.0 },
                limits: TierLimits {
                    max_active_licenses: 100,
                    max_uploads: 1_000,
                    max_downloads: 5_000,
                },
                features: vec![
                    "basic_catalog".into(),
                    "collections".into(),
                    "priority_payouts".into(),
                ],
            },
            TierConfig {
                tier_id: "equity_partner".into(),
                label: "Equity Partner".into(),
                price_per_month: 9_900,
                revenue_split: RevenueSplit { creator_pct: 95.0, platform_pct: 5.0 },
                limits: TierLimits {
                    max_active_licenses: 1_000,
                    max_uploads: 10_000,
                    max_downloads: 50_000,
                },
                features: vec![
                    "basic_catalog".into(),
                    "collections".into(),
                    "priority_payouts".into(),
                    "dedicated_support".into(),
                ],
            },
        ];
        match Self::from_tiers(tiers.into()) {
            Ok(catalog) => catalog,
            Err(()) => unreachable!("builtin catalog defines the free tier"),
        }
    }
}
