//! License entity.
//!
//! A license moves through `Inactive → Active → Expired`, may be revoked at
//! any point, and carries one [`Scope`] per product it covers. Scope limits of
//! zero mean unlimited. Devices bound to the license are tracked per product
//! so the node limit can be enforced.

use crate::core::error::{NexusError, NexusResult};
use crate::liveness::stat::KEY_SEPARATOR;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// License lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    /// Issued, never used.
    #[default]
    Inactive,
    /// Within its validity window.
    Active,
    /// Validity window passed.
    Expired,
    /// Withdrawn. Terminal.
    Revoked,
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Per-product grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub product_id: u64,
    /// Maximum bound devices (0 = unlimited).
    #[serde(default)]
    pub max_nodes: u32,
    /// Maximum concurrently online devices (0 = unlimited).
    #[serde(default)]
    pub max_concurrent: u32,
    /// Opaque feature mask handed to clients.
    #[serde(default)]
    pub feature_mask: String,
}

impl Scope {
    pub fn new(product_id: u64, max_nodes: u32, max_concurrent: u32) -> Self {
        Self {
            product_id,
            max_nodes,
            max_concurrent,
            feature_mask: String::new(),
        }
    }

    pub fn with_feature_mask(mut self, mask: impl Into<String>) -> Self {
        self.feature_mask = mask.into();
        self
    }

    /// Check if one more device may bind when `bound` are already bound.
    pub fn allows_nodes(&self, bound: usize) -> bool {
        self.max_nodes == 0 || bound < self.max_nodes as usize
    }

    /// Check if one more session may go online when `online` already are.
    pub fn allows_concurrent(&self, online: usize) -> bool {
        self.max_concurrent == 0 || online < self.max_concurrent as usize
    }
}

/// A license and its product scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    license_key: String,
    validity_hours: i64,
    activated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    status: LicenseStatus,
    remark: Option<String>,
    scopes: Vec<Scope>,
    /// Bound device codes per product.
    bindings: BTreeMap<u64, BTreeSet<String>>,
}

impl License {
    /// Create an inactive license valid for `validity_hours` once activated.
    pub fn new(license_key: impl Into<String>, validity_hours: i64) -> NexusResult<Self> {
        let license_key = license_key.into();
        if license_key.is_empty() {
            return Err(NexusError::invalid_license("license key is empty"));
        }
        if license_key.contains(KEY_SEPARATOR) {
            return Err(NexusError::invalid_license(format!(
                "license key contains {KEY_SEPARATOR:?}"
            )));
        }
        if validity_hours <= 0 {
            return Err(NexusError::invalid_license(
                "validity hours must be positive",
            ));
        }
        Ok(Self {
            license_key,
            validity_hours,
            activated_at: None,
            expires_at: None,
            status: LicenseStatus::Inactive,
            remark: None,
            scopes: Vec::new(),
            bindings: BTreeMap::new(),
        })
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.add_scope(scope);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn license_key(&self) -> &str {
        &self.license_key
    }

    pub fn validity_hours(&self) -> i64 {
        self.validity_hours
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Stored status, without checking the clock. See [`License::check_status`].
    pub fn status(&self) -> LicenseStatus {
        self.status
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    /// Start the validity window at `now`.
    ///
    /// Only an inactive license can be activated. The first activation time
    /// is kept for good.
    pub fn activate(&mut self, now: DateTime<Utc>) -> NexusResult<()> {
        if self.status != LicenseStatus::Inactive {
            return Err(NexusError::invalid_license(format!(
                "cannot activate a license that is {}",
                self.status
            )));
        }
        if self.validity_hours <= 0 {
            return Err(NexusError::invalid_license(
                "validity hours must be positive",
            ));
        }
        self.activated_at.get_or_insert(now);
        self.expires_at = Some(now + ChronoDuration::hours(self.validity_hours));
        self.status = LicenseStatus::Active;
        Ok(())
    }

    /// Extend (or with negative hours, shorten) the validity window.
    ///
    /// An expired license is reactivated and extended from `now`. A window
    /// shortened into the past leaves the license expired.
    pub fn renew(&mut self, now: DateTime<Utc>, extra_hours: i64) -> NexusResult<()> {
        if self.status == LicenseStatus::Revoked {
            return Err(NexusError::LicenseRevoked {
                license_key: self.license_key.clone(),
            });
        }
        if self.status == LicenseStatus::Expired {
            self.status = LicenseStatus::Active;
        }

        let base = match self.expires_at {
            Some(expires_at) if expires_at >= now => expires_at,
            _ => now,
        };
        self.expires_at = Some(base + ChronoDuration::hours(extra_hours));
        self.validity_hours = (self.validity_hours + extra_hours).max(0);

        if self.is_expired(now) {
            self.status = LicenseStatus::Expired;
        }
        Ok(())
    }

    /// Revoke the license effective `now`. Returns false if already revoked.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == LicenseStatus::Revoked {
            return false;
        }
        self.expires_at = Some(now);
        self.status = LicenseStatus::Revoked;
        true
    }

    /// Check if the validity window ended before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Refresh and return the status; an active license past its window
    /// becomes expired.
    pub fn check_status(&mut self, now: DateTime<Utc>) -> LicenseStatus {
        if self.status == LicenseStatus::Active && self.is_expired(now) {
            self.status = LicenseStatus::Expired;
        }
        self.status
    }

    /// Add a scope. Returns false if the product is already covered.
    pub fn add_scope(&mut self, scope: Scope) -> bool {
        if self.covers(scope.product_id) {
            return false;
        }
        self.scopes.push(scope);
        true
    }

    /// Replace the scope for `product_id`. Returns false if there is none.
    pub fn update_scope(&mut self, product_id: u64, scope: Scope) -> bool {
        match self.scopes.iter_mut().find(|s| s.product_id == product_id) {
            Some(existing) => {
                *existing = scope;
                true
            }
            None => false,
        }
    }

    /// Drop the scope for `product_id` along with its bindings.
    pub fn remove_scope(&mut self, product_id: u64) -> bool {
        let before = self.scopes.len();
        self.scopes.retain(|s| s.product_id != product_id);
        self.bindings.remove(&product_id);
        self.scopes.len() != before
    }

    pub fn scope(&self, product_id: u64) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.product_id == product_id)
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn product_ids(&self) -> Vec<u64> {
        self.scopes.iter().map(|s| s.product_id).collect()
    }

    pub fn covers(&self, product_id: u64) -> bool {
        self.scope(product_id).is_some()
    }

    /// Check the node limit for `product_id`. False if not covered.
    pub fn allows_nodes(&self, product_id: u64, bound: usize) -> bool {
        self.scope(product_id)
            .is_some_and(|scope| scope.allows_nodes(bound))
    }

    /// Check the concurrency limit for `product_id`. False if not covered.
    pub fn allows_concurrent(&self, product_id: u64, online: usize) -> bool {
        self.scope(product_id)
            .is_some_and(|scope| scope.allows_concurrent(online))
    }

    pub fn is_bound(&self, product_id: u64, device_code: &str) -> bool {
        self.bindings
            .get(&product_id)
            .is_some_and(|devices| devices.contains(device_code))
    }

    pub fn bound_count(&self, product_id: u64) -> usize {
        self.bindings.get(&product_id).map_or(0, BTreeSet::len)
    }

    /// Bind a device under `product_id`. Returns false if already bound.
    pub fn bind(&mut self, product_id: u64, device_code: impl Into<String>) -> bool {
        self.bindings
            .entry(product_id)
            .or_default()
            .insert(device_code.into())
    }

    /// Release a device binding. Returns false if it was not bound.
    pub fn unbind(&mut self, product_id: u64, device_code: &str) -> bool {
        let Some(devices) = self.bindings.get_mut(&product_id) else {
            return false;
        };
        let removed = devices.remove(device_code);
        if devices.is_empty() {
            self.bindings.remove(&product_id);
        }
        removed
    }
}
