//! gantry-lifecycle: time-driven environment state machine.
//!
//! Walks every managed environment through
//! `Creating -> Active -> Expiring -> Expired -> Deleted` on a fixed
//! scan interval. Transitions depend only on the injected clock and the
//! expiry sealed at creation:
//!
//! ```text
//! now >= expires_at                     => Expired (then cleanup)
//! now >= expires_at - warning_window    => Expiring
//! otherwise                             => Active
//! ```
//!
//! A Creating environment additionally waits for its namespace scaffold
//! before going Active, unless it is already past expiry, in which case
//! it is reclaimed as-is. Cleanup is at-least-once: a failed teardown
//! leaves the environment Expired with a pending marker and the next
//! scan retries it.

pub mod controller;
pub mod error;

pub use controller::{LifecycleConfig, LifecycleController, ScanSummary, planned_status};
pub use error::{LifecycleError, LifecycleResult};
