//! Admission control in front of the monitor.
//!
//! [`AdmissionGate::admit`] decides whether a device may hold a session on a
//! license for a product, then renews its lease:
//!
//! 1. the license must cover the product
//! 2. an inactive license is activated on first use; expired and revoked
//!    licenses are refused
//! 3. a device not yet bound must fit under the scope's node limit
//! 4. a device not yet online must fit under the scope's concurrency limit,
//!    counted from the ledger
//! 5. the requested lease is clamped to (or rejected outside) the bounds
//!
//! The ledger is fed asynchronously by the monitor's delivery task, so the
//! concurrency count can trail admissions by the queue depth.

use super::license::{License, LicenseStatus};
use crate::core::config::{AdmissionSection, LeaseExceedsBehavior};
use crate::core::error::{NexusError, NexusResult};
use crate::liveness::monitor::Monitor;
use crate::liveness::stat::{OnlineIdentity, OnlineStat, KEY_SEPARATOR};
use crate::ops::observability::NexusMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Lease duration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Lease granted when the caller does not ask for one.
    pub default: Duration,
    pub min: Duration,
    pub max: Duration,
    pub on_exceed: LeaseExceedsBehavior,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self::from(&AdmissionSection::default())
    }
}

impl From<&AdmissionSection> for LeasePolicy {
    fn from(section: &AdmissionSection) -> Self {
        Self {
            default: Duration::from_secs(section.lease_seconds),
            min: Duration::from_secs(section.min_lease_seconds),
            max: Duration::from_secs(section.max_lease_seconds),
            on_exceed: section.lease_exceeds,
        }
    }
}

impl LeasePolicy {
    /// Resolve the lease for a request.
    pub fn resolve(&self, requested: Option<Duration>) -> NexusResult<Duration> {
        let Some(lease) = requested else {
            return Ok(self.default);
        };
        if (self.min..=self.max).contains(&lease) {
            return Ok(lease);
        }
        match self.on_exceed {
            LeaseExceedsBehavior::Clamp => Ok(lease.clamp(self.min, self.max)),
            LeaseExceedsBehavior::Reject => Err(NexusError::invalid_request(format!(
                "lease {}s outside [{}s, {}s]",
                lease.as_secs(),
                self.min.as_secs(),
                self.max.as_secs()
            ))),
        }
    }
}

/// A heartbeat asking for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub product_id: u64,
    pub device_code: String,
    /// Requested lease; the policy default when absent.
    pub lease: Option<Duration>,
}

impl AdmissionRequest {
    pub fn new(product_id: u64, device_code: impl Into<String>) -> Self {
        Self {
            product_id,
            device_code: device_code.into(),
            lease: None,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Composite key the monitor tracks this session under.
    pub key: String,
    /// Lease granted.
    pub lease: Duration,
    /// The license was activated by this request.
    pub activated: bool,
}

/// Checks license limits and feeds admitted heartbeats to the monitor.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    monitor: Arc<Monitor>,
    ledger: Arc<OnlineStat>,
    policy: LeasePolicy,
    metrics: Arc<NexusMetrics>,
}

impl AdmissionGate {
    pub fn new(
        monitor: Arc<Monitor>,
        ledger: Arc<OnlineStat>,
        policy: LeasePolicy,
        metrics: Arc<NexusMetrics>,
    ) -> Self {
        Self {
            monitor,
            ledger,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Admit `request` against `license` at `now`.
    ///
    /// On success the device is bound to the license and its lease renewed.
    /// Activation and status refresh may mutate the license even when the
    /// request is then refused.
    ///
    /// Product records are not modeled here, so whether the client's product
    /// version is still supported is for the caller to check before admitting.
    pub fn admit(
        &self,
        license: &mut License,
        request: &AdmissionRequest,
        now: DateTime<Utc>,
    ) -> NexusResult<Admission> {
        match self.check(license, request, now) {
            Ok(admission) => {
                license.bind(request.product_id, request.device_code.as_str());
                self.monitor.heartbeat(&admission.key, admission.lease);
                self.metrics.record_admitted();
                tracing::debug!(
                    key = %admission.key,
                    lease_secs = admission.lease.as_secs(),
                    activated = admission.activated,
                    "admitted"
                );
                Ok(admission)
            }
            Err(e) => {
                self.metrics.record_rejected(e.reason());
                tracing::debug!(
                    license = %license.license_key(),
                    product_id = request.product_id,
                    device = %request.device_code,
                    error = %e,
                    "admission refused"
                );
                Err(e)
            }
        }
    }

    fn check(
        &self,
        license: &mut License,
        request: &AdmissionRequest,
        now: DateTime<Utc>,
    ) -> NexusResult<Admission> {
        let device = request.device_code.as_str();
        if device.is_empty() {
            return Err(NexusError::invalid_request("device code is empty"));
        }
        if device.contains(KEY_SEPARATOR) {
            return Err(NexusError::invalid_request(format!(
                "device code contains {KEY_SEPARATOR:?}"
            )));
        }

        let product_id = request.product_id;
        let scope = license
            .scope(product_id)
            .cloned()
            .ok_or(NexusError::ProductNotCovered { product_id })?;

        let mut activated = false;
        match license.check_status(now) {
            LicenseStatus::Active => {}
            LicenseStatus::Inactive => {
                license.activate(now)?;
                activated = true;
                tracing::info!(license = %license.license_key(), "license activated on first use");
            }
            LicenseStatus::Expired => {
                return Err(NexusError::LicenseExpired {
                    license_key: license.license_key().to_string(),
                })
            }
            LicenseStatus::Revoked => {
                return Err(NexusError::LicenseRevoked {
                    license_key: license.license_key().to_string(),
                })
            }
        }

        if !license.is_bound(product_id, device)
            && !scope.allows_nodes(license.bound_count(product_id))
        {
            return Err(NexusError::MaxNodesExceeded {
                product_id,
                limit: scope.max_nodes,
            });
        }

        let key = OnlineIdentity::new(product_id, device, license.license_key()).key();
        // A device already online is renewing its own session.
        if !self.ledger.is_online(&key) {
            let current = self
                .ledger
                .get_concurrent_count(license.license_key(), product_id);
            if !scope.allows_concurrent(current) {
                return Err(NexusError::ConcurrencyLimitExceeded {
                    product_id,
                    limit: scope.max_concurrent,
                    current,
                });
            }
        }

        let lease = self.policy.resolve(request.lease)?;
        Ok(Admission {
            key,
            lease,
            activated,
        })
    }
}
