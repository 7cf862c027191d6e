//! License lifecycle orchestration.
//!
//! Owns every manual license transition (approve, reject, cancel, renew, the
//! expiry sweep) together with the counter bookkeeping each one implies.
//! Settlement-driven transitions live in the reconciler. Each operation runs
//! inside one store transaction, so the license row, the licensee's counter,
//! and the media's active set move together.

use crate::{
    config::TierCatalog,
    error::{SettleError, SettleResult},
    license::License,
    store::SettleStore,
};
use chrono::{DateTime, Utc};
use log::info;

pub struct Licensing<'a> {
    store: &'a SettleStore,
    catalog: &'a TierCatalog,
}

impl<'a> Licensing<'a> {
    pub fn new(store: &'a SettleStore, catalog: &'a TierCatalog) -> Self {
        Self { store, catalog }
    }

    fn load_license(store: &SettleStore, license_id: &str) -> SettleResult<License> {
        store
            .get_license(license_id)?
            .ok_or_else(|| SettleError::LicenseNotFound {
                id: license_id.into(),
            })
    }

    /// Approve a pending license. The approver must own the media and the
    /// licensee must be under its tier's active-license limit.
    pub fn approve_license(
        &self,
        license_id: &str,
        approver_id: &str,
        now: DateTime<Utc>,
    ) -> SettleResult<License> {
        self.store.transactionally(|store| {
            let mut license = Self::load_license(store, license_id)?;
            let media = store.get_media(&license.media_id)?.ok_or_else(|| {
                SettleError::MediaNotFound {
                    id: license.media_id.clone(),
                }
            })?;
            if media.business_id != approver_id {
                return Err(SettleError::NotMediaOwner {
                    business: approver_id.into(),
                    media: media.media_id,
                });
            }
            let licensee = store.get_business(&license.licensee)?.ok_or_else(|| {
                SettleError::BusinessNotFound {
                    id: license.licensee.clone(),
                }
            })?;
            let limit = self.catalog.limits_for(&licensee.tier).max_active_licenses;
            if licensee.active_license_count >= limit {
                return Err(SettleError::LicenseLimitReached {
                    tier: licensee.tier.clone(),
                    current: licensee.active_license_count,
                    limit,
                });
            }

            license.approve(now)?;
            store.update_license(&license)?;
            store.adjust_active_license_count(&license.licensee, 1)?;
            store.adjust_media_license_count(&license.media_id, 1)?;
            store.add_media_active_license(&license.media_id, &license.id)?;
            info!(
                "license {} approved by {}; active until {:?}",
                license.id, approver_id, license.expires_at
            );
            Ok(license)
        })
    }

    /// Reject a pending license. Licensor only.
    pub fn reject_license(
        &self,
        license_id: &str,
        caller_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SettleResult<License> {
        self.store.transactionally(|store| {
            let mut license = Self::load_license(store, license_id)?;
            if license.licensor != caller_id {
                return Err(SettleError::NotMediaOwner {
                    business: caller_id.into(),
                    media: license.media_id.clone(),
                });
            }
            license.reject(reason, now)?;
            store.update_license(&license)?;
            info!("license {} rejected: {}", license.id, reason);
            Ok(license)
        })
    }

    /// Cancel an active or approved license. Either party may cancel; the
    /// counter and active set are only unwound when it was actually active.
    pub fn cancel_license(
        &self,
        license_id: &str,
        caller_id: &str,
        _now: DateTime<Utc>,
    ) -> SettleResult<License> {
        self.store.transactionally(|store| {
            let mut license = Self::load_license(store, license_id)?;
            if license.licensor != caller_id && license.licensee != caller_id {
                return Err(SettleError::NotLicenseParty {
                    business: caller_id.into(),
                    license: license.id.clone(),
                });
            }
            let was_active = license.cancel()?;
            store.update_license(&license)?;
            if was_active {
                store.adjust_active_license_count(&license.licensee, -1)?;
                store.remove_media_active_license(&license.media_id, &license.id)?;
            }
            info!("license {} cancelled by {}", license.id, caller_id);
            Ok(license)
        })
    }

    /// Renew an active or expired license for a fresh term. Renewing from
    /// expired restores the counter and the media active set.
    pub fn renew_license(&self, license_id: &str, now: DateTime<Utc>) -> SettleResult<License> {
        self.store.transactionally(|store| {
            let mut license = Self::load_license(store, license_id)?;
            let was_expired = license.renew(now)?;
            store.update_license(&license)?;
            if was_expired {
                store.adjust_active_license_count(&license.licensee, 1)?;
                store.add_media_active_license(&license.media_id, &license.id)?;
            }
            info!(
                "license {} renewed until {:?}",
                license.id, license.expires_at
            );
            Ok(license)
        })
    }

    /// Expire every active license whose term has run out. Safe to run on a
    /// schedule: the decrement floors at zero and the set removal is a
    /// no-op once done.
    pub fn expire_due_licenses(&self, now: DateTime<Utc>) -> SettleResult<Vec<License>> {
        self.store.transactionally(|store| {
            let due = store.licenses_due_for_expiry(now)?;
            let mut expired = Vec::with_capacity(due.len());
            for mut license in due {
                license.expire()?;
                store.update_license(&license)?;
                store.adjust_active_license_count(&license.licensee, -1)?;
                store.remove_media_active_license(&license.media_id, &license.id)?;
                info!("license {} expired", license.id);
                expired.push(license);
            }
            Ok(expired)
        })
    }
}
