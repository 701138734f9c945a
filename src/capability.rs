//! # Capability module
//!
//! This module provides the capability traits that let the FSM driver (C6),
//! the output reconciler (C7) and the claim reconciler (C8) operate over any
//! concrete custom resource kind without being compiled against it. Each
//! capability is a thin accessor over a slice of the object the framework
//! needs to read or mutate; a root kind implements every capability it wants
//! the corresponding component to drive.

use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

// -----------------------------------------------------------------------------
// ConditionStatus enumeration

/// Tri-state status of a [`Condition`], mirroring the Kubernetes API
/// convention of `True`/`False`/`Unknown` rather than a boolean.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum ConditionStatus {
    #[serde(rename = "True")]
    True,
    #[serde(rename = "False")]
    False,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Display for ConditionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

// -----------------------------------------------------------------------------
// Condition structure

/// One entry of a root object's condition list. A condition of a given
/// `type_` appears at most once per object; the driver enforces that
/// invariant (spec §3, §8.2) by always replacing-in-place rather than
/// appending.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "observedGeneration", default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus, now: DateTime<Utc>) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: None,
            message: None,
            observed_generation: None,
            last_transition_time: now,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}

/// `True` iff `READY_CONDITION_TYPE` is present with status `True`.
pub const READY_CONDITION_TYPE: &str = "Ready";

// -----------------------------------------------------------------------------
// ManagedResourceRef structure

/// A typed reference to a child ("managed") resource, unique by the five
/// fields below (spec §3). Never carries a resource version or UID: the
/// driver re-derives liveness by fetching.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct ManagedResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl Display for ManagedResourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}, Kind={} {}/{}",
            self.group, self.version, self.kind, self.namespace, self.name
        )
    }
}

impl ManagedResourceRef {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ManagedKind structure

/// One entry of a controller's declared managed-types (set up at C9
/// controller-build time). The output reconciler (C7) checks every applied
/// object's GVK against this list before writing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ManagedKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn matches(&self, reference: &ManagedResourceRef) -> bool {
        self.group == reference.group && self.version == reference.version && self.kind == reference.kind
    }

    pub fn of<K>() -> Self
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let dt = K::DynamicType::default();
        Self::new(K::group(&dt).into_owned(), K::version(&dt).into_owned(), K::kind(&dt).into_owned())
    }
}

// -----------------------------------------------------------------------------
// RootObject trait

/// Capability surface the FSM driver (C6) and the output reconciler (C7)
/// need from a root custom resource. `T: Resource` already gives identity
/// (group/version/kind via `T::api_resource()`, namespace/name via
/// [`ResourceExt`]); this trait adds the generation/finalizers/conditions/
/// managed-refs accessors spec §3 requires, plus the mutators the driver
/// uses to write status back.
///
/// Implementations are expected to be thin: the `status` substructure of a
/// generated CRD type typically stores `conditions` and
/// `managed_resource_refs` directly, and this trait's methods just delegate
/// to it (see `demo::Workload` for a worked example).
pub trait RootObject: Resource + ResourceExt + Clone + Send + Sync + Serialize {
    /// `metadata.generation`; `0` for an object that predates generation
    /// tracking (never observed in practice, but kept total rather than
    /// fallible).
    fn generation(&self) -> i64 {
        Resource::meta(self).generation.unwrap_or_default()
    }

    /// Current condition list as seen by the driver at fetch time.
    fn conditions(&self) -> &[Condition];

    /// Replace the condition of the same `type_` if present, else append.
    /// Enforces the "at most one condition per type" invariant centrally so
    /// callers never have to.
    fn set_condition(&mut self, condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Managed-resource refs currently recorded on `status`.
    fn managed_resource_refs(&self) -> &[ManagedResourceRef];

    fn set_managed_resource_refs(&mut self, refs: Vec<ManagedResourceRef>);
}

// -----------------------------------------------------------------------------
// Claim / Claimed traits

/// Capability surface the claim reconciler (C8) needs from the namespaced
/// "claim" half of a claim/claimed pair (spec §3, §4.8). `claimed_ref` is
/// the only mutable field the claim reconciler itself owns on this side;
/// everything else proceeds through the same condition machinery
/// [`RootObject`] uses.
pub trait Claim: Resource + ResourceExt + Clone + Send + Sync + Serialize {
    fn generation(&self) -> i64 {
        Resource::meta(self).generation.unwrap_or_default()
    }

    fn conditions(&self) -> &[Condition];

    fn set_condition(&mut self, condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// `None` until step 6 of the claim reconciler's protocol populates it.
    fn claimed_ref(&self) -> Option<&ManagedResourceRef>;

    fn set_claimed_ref(&mut self, reference: ManagedResourceRef);
}

/// Capability surface the claim reconciler (C8) needs from the
/// cluster-scoped "claimed" half of a claim/claimed pair. Extends
/// [`RootObject`] (a claimed kind is ordinarily also driven by its own FSM
/// via C6) with the `claimRef` back-pointer and a readiness check derived
/// from its own conditions.
pub trait Claimed: RootObject {
    fn claim_ref(&self) -> Option<&ManagedResourceRef>;

    fn set_claim_ref(&mut self, reference: ManagedResourceRef);

    fn is_ready(&self) -> bool {
        self.conditions()
            .iter()
            .any(|c| c.type_ == READY_CONDITION_TYPE && c.status == ConditionStatus::True)
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn condition_builder_sets_fields() {
        let c = Condition::new("Ready", ConditionStatus::True, now())
            .with_reason("Completed")
            .with_message("all states done")
            .with_observed_generation(7);

        assert_eq!(c.type_, "Ready");
        assert_eq!(c.status, ConditionStatus::True);
        assert_eq!(c.reason.as_deref(), Some("Completed"));
        assert_eq!(c.observed_generation, Some(7));
    }

    #[test]
    fn managed_resource_ref_orders_by_identity_fields() {
        let a = ManagedResourceRef::new("v1", "", "ConfigMap", "ns", "a");
        let b = ManagedResourceRef::new("v1", "", "ConfigMap", "ns", "b");
        assert!(a < b);
    }
}
