//! settle-runner: headless settlement replay for the marketplace ledger.
//!
//! Reads a JSONL file of provider webhook envelopes and applies each one
//! through the reconciler, then prints a settlement summary.
//!
//! Usage:
//!   settle-runner --events events.jsonl --db run.db
//!   settle-runner --events events.jsonl --seed fixtures.json --expire

use anyhow::Result;
use chrono::Utc;
use settlement_core::{
    config::TierCatalog,
    license::License,
    licensing::Licensing,
    provider::{ProviderEvent, WebhookEnvelope},
    reconciler::EventReconciler,
    store::{Business, Media, SettleStore},
    types::Cents,
};
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// Fixture file loaded before replay: the entities the events refer to.
#[derive(serde::Deserialize)]
struct SeedFile {
    #[serde(default)]
    businesses: Vec<SeedBusiness>,
    #[serde(default)]
    media: Vec<SeedMedia>,
    #[serde(default)]
    licenses: Vec<SeedLicense>,
    #[serde(default)]
    collection_members: Vec<SeedMember>,
}

#[derive(serde::Deserialize)]
struct SeedBusiness {
    business_id: String,
    name: String,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    connect_account_ref: Option<String>,
}

#[derive(serde::Deserialize)]
struct SeedMedia {
    media_id: String,
    business_id: String,
    title: String,
}

#[derive(serde::Deserialize)]
struct SeedLicense {
    license_id: String,
    media_id: String,
    licensor_id: String,
    licensee_id: String,
    price: Cents,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct SeedMember {
    collection_id: String,
    business_id: String,
    contribution_percent: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let events_path = arg_value(&args, "--events");
    let seed_path = arg_value(&args, "--seed");
    let tiers_path = arg_value(&args, "--tiers");
    let run_expiry = args.iter().any(|a| a == "--expire");

    println!("settle-runner");
    println!("  db:      {db}");
    println!("  events:  {}", events_path.unwrap_or("(none)"));
    println!("  seed:    {}", seed_path.unwrap_or("(none)"));
    println!();

    let store = SettleStore::open(db)?;
    store.migrate()?;

    let catalog = match tiers_path {
        Some(path) => TierCatalog::load(path)?,
        None => TierCatalog::builtin(),
    };

    if let Some(path) = seed_path {
        seed(&store, path)?;
    }

    if let Some(path) = events_path {
        replay(&store, &catalog, path)?;
    }

    if run_expiry {
        let licensing = Licensing::new(&store, &catalog);
        let expired = licensing.expire_due_licenses(Utc::now())?;
        println!("expired {} overdue license(s)", expired.len());
    }

    print_summary(&store)?;
    Ok(())
}

fn seed(store: &SettleStore, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let file: SeedFile = serde_json::from_str(&content)?;
    let now = Utc::now();

    for b in &file.businesses {
        let mut business = Business::new(b.business_id.clone(), b.name.clone());
        if let Some(tier) = &b.tier {
            business.tier = tier.clone();
        }
        if let Some(account_ref) = &b.connect_account_ref {
            business.connect_account_ref = Some(account_ref.clone());
            business.details_submitted = true;
            business.charges_enabled = true;
            business.payouts_enabled = true;
        }
        store.insert_business(&business)?;
    }
    for m in &file.media {
        store.insert_media(&Media {
            media_id: m.media_id.clone(),
            business_id: m.business_id.clone(),
            title: m.title.clone(),
            license_count: 0,
        })?;
    }
    for l in &file.licenses {
        store.insert_license(&License::new(
            l.license_id.clone(),
            l.media_id.clone(),
            l.licensor_id.clone(),
            l.licensee_id.clone(),
            l.price,
            l.duration.clone(),
            now,
        ))?;
    }
    for m in &file.collection_members {
        store.insert_collection_member(&m.collection_id, &m.business_id, m.contribution_percent)?;
    }

    println!(
        "seeded {} business(es), {} media, {} license(s)",
        file.businesses.len(),
        file.media.len(),
        file.licenses.len()
    );
    Ok(())
}

fn replay(store: &SettleStore, catalog: &TierCatalog, path: &str) -> Result<()> {
    let reconciler = EventReconciler::new(store, catalog);
    let reader = BufReader::new(File::open(path)?);

    let mut applied = 0u64;
    let mut skipped = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: WebhookEnvelope = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("skipping undecodable envelope: {e}");
                skipped += 1;
                continue;
            }
        };
        let event = ProviderEvent::from_envelope(&envelope);
        reconciler.settle_payment_event(&event, Utc::now())?;
        applied += 1;
    }

    println!("replayed {applied} event(s), {skipped} undecodable");
    Ok(())
}

fn print_summary(store: &SettleStore) -> Result<()> {
    println!();
    println!("=== LEDGER SUMMARY ===");
    let by_status = store.transaction_count_by_status()?;
    if by_status.is_empty() {
        println!("  (no transactions)");
    }
    for (status, count) in &by_status {
        println!("  {status:<10} {count}");
    }

    println!();
    println!("=== LICENSES ===");
    for status in [
        "pending",
        "approved",
        "active",
        "rejected",
        "cancelled",
        "expired",
        "payment_failed",
    ] {
        let count = store.license_count_by_status(status)?;
        if count > 0 {
            println!("  {status:<15} {count}");
        }
    }

    println!();
    println!("=== BUSINESSES ===");
    for b in store.list_businesses()? {
        println!(
            "  {} [{}] balance={} earnings={} spent={} active_licenses={}",
            b.business_id,
            b.tier,
            fmt_cents(b.revenue_balance),
            fmt_cents(b.total_earnings),
            fmt_cents(b.total_spent),
            b.active_license_count,
        );
    }
    Ok(())
}

fn fmt_cents(amount: Cents) -> String {
    format!("${}.{:02}", amount / 100, (amount % 100).abs())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
