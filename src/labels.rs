//! # Labels module
//!
//! This module provides the well-known label, annotation and finalizer keys
//! from spec §6. Kept as plain constants, matching the teacher's convention
//! of naming protocol-level strings at module scope (e.g.
//! `svc::k8s::RECONCILIATION_UPSERT_EVENT`) rather than hiding them behind a
//! config value.

/// Pauses reconciliation of the labeled object when non-empty (spec §4.6
/// step 2, §6).
pub const SUSPEND_LABEL: &str = "infrared.reddit.com/suspend";

/// Stamped on every resource managed by this framework.
pub const NAME_LABEL: &str = "infrared.reddit.com/name";
pub const VERSION_LABEL: &str = "infrared.reddit.com/version";
pub const COMPONENT_LABEL: &str = "infrared.reddit.com/component";
pub const MANAGED_BY_LABEL: &str = "infrared.reddit.com/managed-by";

/// Finalizer added to root objects that declare a finalizer state (C6).
pub const FSM_FINALIZER: &str = "infrared.reddit.com/fsm";

/// Finalizer added to claim objects (C8).
pub const CLAIM_FINALIZER: &str = "cloud.infrared.reddit.com/claim";

/// Returns `true` if the label map carries a non-empty suspend value.
pub fn is_suspended(labels: &std::collections::BTreeMap<String, String>) -> bool {
    labels
        .get(SUSPEND_LABEL)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn suspend_requires_non_empty_value() {
        let mut labels = BTreeMap::new();
        assert!(!is_suspended(&labels));

        labels.insert(SUSPEND_LABEL.to_string(), String::new());
        assert!(!is_suspended(&labels));

        labels.insert(SUSPEND_LABEL.to_string(), "true".to_string());
        assert!(is_suspended(&labels));
    }
}
