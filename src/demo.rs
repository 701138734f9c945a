//! # Demo module
//!
//! Illustrative scaffolding, not a product feature: a `Workload` root CRD
//! walking a two-state chain (`Provision` -> terminal `Ready`) plus a
//! finalizer state, managing one child `ConfigMap`, and a
//! `WorkloadClaim`/`ClaimedWorkload` pair exercising the claim reconciler
//! (C8). Wired end to end by `main.rs`; excluded from `lib.rs`'s public
//! surface since a framework consumer brings their own CRDs.
//!
//! Grounded on the `Stub`/`StubClaim`/`StubClaimed` fixtures in
//! `src/fsm/mod.rs`'s and `src/claim/mod.rs`'s test modules, which are the
//! minimal correct implementations of [`RootObject`]/[`Claim`]/[`Claimed`]
//! already present in this crate.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capability::{Claim, Claimed, Condition, ManagedKind, ManagedResourceRef, RootObject};
use crate::fsm::{ConditionTemplate, Fsm, State, TransitionResult};
use crate::output::{ApplyHint, OutputSet};

// -----------------------------------------------------------------------------
// Workload

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(group = "infrared.reddit.com", version = "v1", kind = "Workload", namespaced, status = "WorkloadStatus")]
pub struct WorkloadSpec {
    /// Content stamped into the managed `ConfigMap`'s `data.message` key.
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct WorkloadStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, rename = "managedResourceRefs")]
    pub managed_resource_refs: Vec<ManagedResourceRef>,
}

impl RootObject for Workload {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }

    fn managed_resource_refs(&self) -> &[ManagedResourceRef] {
        self.status.as_ref().map(|s| s.managed_resource_refs.as_slice()).unwrap_or(&[])
    }

    fn set_managed_resource_refs(&mut self, refs: Vec<ManagedResourceRef>) {
        self.status.get_or_insert_with(Default::default).managed_resource_refs = refs;
    }
}

fn configmap_for(workload: &Workload) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("message".to_string(), workload.spec.message.clone());
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(workload.name_any()),
            namespace: workload.metadata.namespace.clone(),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// The `Provision` -> terminal `Ready` chain plus a `Terminate` finalizer
/// state that tears the managed `ConfigMap` down before the object is
/// allowed to disappear.
pub fn fsm() -> Fsm<Workload> {
    Fsm::new("Provision")
        .with_state(
            State::new("Provision", ConditionTemplate::new("Provisioned")).with_transition(|workload: &mut Workload, out: &mut OutputSet| {
                let cm = configmap_for(workload);
                let result = match out.apply(cm, ApplyHint::default()) {
                    Ok(()) => (Some("Ready"), TransitionResult::done()),
                    Err(err) => (None, TransitionResult::error(err.to_string())),
                };
                async move { result }
            }),
        )
        .with_state(State::new("Ready", ConditionTemplate::new("Available")))
        .with_finalizer_state("Terminate")
        .with_state(
            State::new("Terminate", ConditionTemplate::new("Terminated")).with_transition(|workload: &mut Workload, out: &mut OutputSet| {
                let cm = configmap_for(workload);
                let result = match out.delete(cm) {
                    Ok(()) => (None, TransitionResult::done()),
                    Err(err) => (None, TransitionResult::error(err.to_string())),
                };
                async move { result }
            }),
        )
}

pub fn managed_kinds() -> Vec<ManagedKind> {
    vec![ManagedKind::of::<ConfigMap>()]
}

// -----------------------------------------------------------------------------
// WorkloadClaim / ClaimedWorkload

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(group = "cloud.infrared.reddit.com", version = "v1", kind = "WorkloadClaim", namespaced, status = "WorkloadClaimStatus")]
pub struct WorkloadClaimSpec {
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct WorkloadClaimStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, rename = "claimedRef")]
    pub claimed_ref: Option<ManagedResourceRef>,
}

impl Claim for WorkloadClaim {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }

    fn claimed_ref(&self) -> Option<&ManagedResourceRef> {
        self.status.as_ref().and_then(|s| s.claimed_ref.as_ref())
    }

    fn set_claimed_ref(&mut self, reference: ManagedResourceRef) {
        self.status.get_or_insert_with(Default::default).claimed_ref = Some(reference);
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "cloud.infrared.reddit.com", version = "v1", kind = "ClaimedWorkload", status = "ClaimedWorkloadStatus", derive = "Default")]
pub struct ClaimedWorkloadSpec {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ClaimedWorkloadStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, rename = "managedResourceRefs")]
    pub managed_resource_refs: Vec<ManagedResourceRef>,
    #[serde(default, rename = "claimRef")]
    pub claim_ref: Option<ManagedResourceRef>,
}

impl RootObject for ClaimedWorkload {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }

    fn managed_resource_refs(&self) -> &[ManagedResourceRef] {
        self.status.as_ref().map(|s| s.managed_resource_refs.as_slice()).unwrap_or(&[])
    }

    fn set_managed_resource_refs(&mut self, refs: Vec<ManagedResourceRef>) {
        self.status.get_or_insert_with(Default::default).managed_resource_refs = refs;
    }
}

impl Claimed for ClaimedWorkload {
    fn claim_ref(&self) -> Option<&ManagedResourceRef> {
        self.status.as_ref().and_then(|s| s.claim_ref.as_ref())
    }

    fn set_claim_ref(&mut self, reference: ManagedResourceRef) {
        self.status.get_or_insert_with(Default::default).claim_ref = Some(reference);
    }
}

/// `ClaimedWorkload` is cluster-scoped but otherwise just a `Workload`
/// without the managed `ConfigMap`: same two-state chain, no finalizer
/// state (the claim reconciler tears it down directly via
/// `delete_foreground`, spec §4.8 step 4).
pub fn claimed_fsm() -> Fsm<ClaimedWorkload> {
    Fsm::new("Provision")
        .with_state(State::new("Provision", ConditionTemplate::new("Provisioned")).with_transition(|_obj: &mut ClaimedWorkload, _out: &mut OutputSet| async {
            (Some("Ready"), TransitionResult::done())
        }))
        .with_state(State::new("Ready", ConditionTemplate::new("Available")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configmap_mirrors_the_workload_message() {
        let workload = Workload::new("demo", WorkloadSpec { message: "hello".to_string() });
        let cm = configmap_for(&workload);
        assert_eq!(cm.data.unwrap().get("message"), Some(&"hello".to_string()));
    }
}
