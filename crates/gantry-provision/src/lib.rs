//! gantry-provision: infrastructure application for Gantry environments.
//!
//! The [`Provisioner`] trait is the unit-of-work seam the lifecycle
//! controller and API layer call into: apply a whole environment or
//! destroy it, both safe to retry. [`ManifestProvisioner`] writes the
//! objects straight through the cluster gateway; [`TerraformProvisioner`]
//! shells out to terraform with one workspace per environment.

pub mod error;
pub mod manifest;
pub mod provisioner;
pub mod terraform;

pub use error::{ProvisionError, ProvisionResult};
pub use manifest::ManifestProvisioner;
pub use provisioner::{Provisioned, Provisioner};
pub use terraform::TerraformProvisioner;
