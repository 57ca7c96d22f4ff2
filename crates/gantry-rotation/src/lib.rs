//! gantry-rotation: in-place secret rotation with safe propagation.
//!
//! One rotation is a read-merge-write: mint new values for the keys in
//! scope, keep every other key's current value, and write the whole
//! payload back in a single conflict-checked update together with an
//! appended history entry. Either all of that lands or the secret is
//! untouched. Dependent deployments are then nudged to roll, each
//! reported individually; a failed nudge never undoes the rotation.
//!
//! Per service, at most one rotation runs at a time; a second caller
//! fails fast with `RotationInProgress` instead of queuing. Different
//! services rotate fully in parallel.

pub mod coordinator;
pub mod error;

pub use coordinator::{RestartReport, RotationCoordinator, RotationIntent, RotationResult};
pub use error::RotationError;
