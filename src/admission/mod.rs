//! License admission.
//!
//! - [`license`] - License lifecycle, product scopes and device bindings
//! - [`gate`] - Limit checks in front of the heartbeat monitor

pub mod gate;
pub mod license;

pub use gate::{Admission, AdmissionGate, AdmissionRequest, LeasePolicy};
pub use license::{License, LicenseStatus, Scope};
