//! Service Module
//!
//! Business logic layer for the miner.

pub mod registry;
pub mod session;
pub mod tracker;

pub use registry::{SessionClaim, SessionRegistry};
pub use session::ExecutorSession;
pub use tracker::{JobTracker, TrackerError};
