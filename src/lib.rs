//! Nexus - license server liveness core.
//!
//! Nexus tracks which licensed nodes are currently alive. Clients heartbeat
//! with a composite key `"<productID>|<deviceCode>|<licenseKey>"` and a lease
//! duration; nodes whose lease lapses go offline, nodes that stay offline too
//! long are forgotten. Lifecycle transitions feed a concurrency ledger that
//! admission control consults before accepting another session for a license.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Admission Gate                           │
//! │   license status │ product scope │ node limit │ session limit   │
//! └─────────────────────────────────────────────────────────────────┘
//!                │ heartbeat(key, lease)           ▲ concurrent count
//!                ▼                                 │
//! ┌──────────────────────────────────┐   ┌───────────────────────────┐
//! │             Monitor              │   │        OnlineStat         │
//! │  key map │ node arena │ expiry   │   │  online identities keyed  │
//! │  heap    (one mutex)             │   │  by composite key         │
//! │  expiry loop │ cleanup loop      │   └───────────────────────────┘
//! └──────────────────────────────────┘                 ▲
//!                │ state changes                       │
//!                ▼                                     │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Event queue → delivery task → collector            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::error`] - Error types and status mapping
//!
//! ## Liveness
//! - [`liveness::heap`] - Expiry heap over an arena of nodes
//! - [`liveness::node`] - Tracked node record and lifecycle
//! - [`liveness::events`] - State-change queue and delivery
//! - [`liveness::monitor`] - Heartbeat monitor
//! - [`liveness::stat`] - Concurrency ledger
//!
//! ## Admission
//! - [`admission::license`] - License lifecycle and scopes
//! - [`admission::gate`] - Limit checks before heartbeats
//!
//! ## Operations
//! - [`ops::observability`] - Metrics and liveness summaries
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A node is in the expiry heap exactly while it is online, and its stored
//!   heap index always matches its heap position
//! - The heap root has the earliest deadline of all queued nodes
//! - A node never goes offline before its deadline
//! - Events for one node reach the collector in the order they happened
//! - Heartbeats never wait on the collector

// Core infrastructure
pub mod core;

// Liveness tracking
pub mod liveness;

// License admission
pub mod admission;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use liveness::{heap, monitor, node, stat};
pub use ops::observability;
