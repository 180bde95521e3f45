//! Operations and observability.
//!
//! - [`observability`] - Metrics registry and liveness summaries

pub mod observability;
