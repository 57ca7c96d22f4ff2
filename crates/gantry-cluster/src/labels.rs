//! Label and annotation names for managed objects.
//!
//! All control-plane state is recoverable from these: a restart rebuilds
//! its working set purely by listing objects carrying [`label::MANAGED_BY`].
//! Label values must stay label-safe, so timestamps are stored as unix
//! seconds in labels and as RFC 3339 in annotations.

use std::collections::BTreeMap;
use std::fmt;

/// Labels stamped onto managed objects. Values are label-safe.
pub mod label {
    /// Selector label present on every managed object.
    pub const MANAGED_BY: &str = "managed-by";
    /// Value of [`MANAGED_BY`].
    pub const MANAGER: &str = "gantry";
    pub const ENVIRONMENT_ID: &str = "environment-id";
    pub const TTL_HOURS: &str = "ttl-hours";
    /// Expiry instant as unix seconds.
    pub const EXPIRES_AT: &str = "expires-at";
    pub const TEMPORARY_ENVIRONMENT: &str = "temporary-environment";
    /// Recorded lifecycle status (creating/active/expiring/expired).
    pub const ENVIRONMENT_STATUS: &str = "environment-status";
    pub const SERVICE_ID: &str = "service-id";
    pub const APP: &str = "app";
}

/// Annotations stamped onto managed objects.
pub mod annotation {
    pub const CREATED_AT: &str = "gantry.dev/created-at";
    pub const EXPIRES_AT: &str = "gantry.dev/expires-at";
    pub const ENVIRONMENT_NAME: &str = "gantry.dev/environment-name";
    /// JSON array of service ids provisioned into the namespace.
    pub const SERVICES: &str = "gantry.dev/services";
    /// Set once a cleanup attempt has failed; cleared on success by the
    /// namespace going away.
    pub const CLEANUP_PENDING: &str = "gantry.dev/cleanup-pending";
    /// JSON array of rotation history entries, kept on the secret.
    pub const ROTATION_HISTORY: &str = "gantry.dev/rotation-history";
    pub const SECRET_TYPE: &str = "gantry.dev/secret-type";
    /// Pod template annotation bumped to force a rolling restart.
    pub const RESTARTED_AT: &str = "gantry.dev/restarted-at";
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pairs: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector matching every object this control plane manages.
    pub fn managed() -> Self {
        Self::new().with(label::MANAGED_BY, label::MANAGER)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether all selector pairs are present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.pairs
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl fmt::Display for LabelSelector {
    /// Renders the `key=value,key=value` form the list API expects.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_renders_query_form() {
        let sel = LabelSelector::managed().with(label::SERVICE_ID, "env-1-api");
        assert_eq!(sel.to_string(), "managed-by=gantry,service-id=env-1-api");
    }

    #[test]
    fn selector_matches_superset_of_pairs() {
        let sel = LabelSelector::managed();
        let mut labels = BTreeMap::new();
        labels.insert(label::MANAGED_BY.to_string(), label::MANAGER.to_string());
        labels.insert("extra".to_string(), "1".to_string());
        assert!(sel.matches(&labels));

        labels.insert(label::MANAGED_BY.to_string(), "other".to_string());
        assert!(!sel.matches(&labels));
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(LabelSelector::new().matches(&BTreeMap::new()));
    }
}
