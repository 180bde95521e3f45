//! Node liveness tracking.
//!
//! - [`heap`] - Arena-backed min-heap ordered by lease deadline
//! - [`node`] - Tracked node record and lifecycle states
//! - [`events`] - State-change queue and collector delivery
//! - [`monitor`] - Heartbeat ingestion, expiry and cleanup loops
//! - [`stat`] - Concurrency ledger of online identities

pub mod events;
pub mod heap;
pub mod monitor;
pub mod node;
pub mod stat;

pub use events::{OverflowPolicy, StateChange, StateCollector};
pub use monitor::{Monitor, MonitorConfig};
pub use node::{NodeSnapshot, NodeState};
pub use stat::{OnlineIdentity, OnlineStat};
