//! # Output reconciler module
//!
//! Implements C7: drains one [`super::OutputSet`] against the live cluster.
//! Deletions run first (so a rename that both deletes the old identity and
//! applies a new one never leaves both alive at once), then applies, then
//! `status.managedResourceRefs` is reconciled against what is actually
//! reachable on the server.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::gvk::GroupVersionKind, core::DynamicObject, discovery::ApiResource, Resource, ResourceExt};
use tracing::warn;

use crate::capability::{ManagedKind, ManagedResourceRef, RootObject};
use crate::labels;

use super::applicator::{ApiOps, Applicator, Error as ApplyError};
use super::{to_dynamic, Error as OutputError, OutputSet};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

fn api_resource_for(reference: &ManagedResourceRef) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&reference.group, &reference.version, &reference.kind);
    ApiResource::from_gvk(&gvk)
}

fn namespace_of(reference: &ManagedResourceRef) -> Option<&str> {
    if reference.namespace.is_empty() {
        None
    } else {
        Some(reference.namespace.as_str())
    }
}

fn stamp_labels(obj: &mut DynamicObject, identity: &crate::identity::AppIdentity) {
    let labels = obj.metadata.labels.get_or_insert_with(Default::default);
    labels.insert(labels::NAME_LABEL.to_string(), identity.name.to_string());
    labels.insert(labels::VERSION_LABEL.to_string(), identity.version.to_string());
    labels.insert(labels::COMPONENT_LABEL.to_string(), identity.component.to_string());
    labels.insert(labels::MANAGED_BY_LABEL.to_string(), identity.name.to_string());
}

fn stamp_owner_ref<P>(obj: &mut DynamicObject, parent: &P, controller: bool)
where
    P: Resource + ResourceExt,
    P::DynamicType: Default,
{
    let dt = P::DynamicType::default();
    let api_version = GroupVersionKind::gvk(&P::group(&dt), &P::version(&dt), &P::kind(&dt)).api_version();
    let owner = OwnerReference {
        api_version,
        kind: P::kind(&dt).to_string(),
        name: parent.name_any(),
        uid: parent.uid().unwrap_or_default(),
        controller: Some(controller),
        block_owner_deletion: Some(true),
    };
    let owners = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    if !owners.iter().any(|o| o.uid == owner.uid) {
        owners.push(owner);
    }
}

/// C7: drains an output set against the live cluster on behalf of one root
/// object.
pub struct Reconciler<A: ApiOps> {
    applicator: Applicator<A>,
}

impl<A: ApiOps> Reconciler<A> {
    pub fn new(applicator: Applicator<A>) -> Self {
        Self { applicator }
    }

    /// Exposes the underlying applicator so the FSM driver (C6) can reuse
    /// the same transport to fetch/create/finalize the root object itself,
    /// without standing up a second handle to the same cluster.
    pub fn applicator(&self) -> &Applicator<A> {
        &self.applicator
    }

    /// Drains `set` against the cluster for `parent`. `deleting` reflects
    /// whether the root object itself is mid-deletion: while true, applies
    /// never create a missing child, they only patch ones that still exist
    /// (spec §4.7 deletion-state special case), since a finalizer-driven
    /// teardown state shouldn't resurrect children the API server is in the
    /// process of garbage-collecting via owner references. `managed_kinds`
    /// is the controller's declared managed-type list (set at C9
    /// controller-build time); an applied object outside it is written
    /// anyway but logged loudly, matching spec §4.7's "not fatal" wording.
    pub async fn drain<P>(
        &self,
        parent: &mut P,
        set: &OutputSet,
        deleting: bool,
        managed_kinds: &[ManagedKind],
    ) -> Result<(), Error>
    where
        P: RootObject,
        P::DynamicType: Default,
    {
        let mut deleted_this_round: HashSet<ManagedResourceRef> = HashSet::new();
        for (reference, placeholder) in set.list_deleted() {
            let api_resource = api_resource_for(reference);
            let name = placeholder
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| reference.name.clone());
            // Deleting an already-absent child is not an error: the whole
            // point of draining the deleted set every reconcile is
            // idempotent convergence, not a one-shot action.
            self.applicator.delete(&api_resource, namespace_of(reference), &name).await?;
            deleted_this_round.insert(reference.clone());
        }

        let identity = crate::identity::get();
        let mut applied_refs: Vec<ManagedResourceRef> = Vec::new();
        for (reference, obj, hint) in set.list_applied_with_hints() {
            if !managed_kinds.iter().any(|k| k.matches(reference)) {
                warn!(managed_ref = %reference, "applying a child whose kind was never declared as managed");
            }

            let api_resource = api_resource_for(reference);
            let mut candidate = obj.clone();
            stamp_labels(&mut candidate, &identity);
            if !hint.suppress_owner_refs && !hint.explicit_owner_refs_set {
                stamp_owner_ref(&mut candidate, parent, true);
            }

            if deleting {
                match self.applicator.apply(&api_resource, candidate, *hint).await {
                    Ok(_) => applied_refs.push(reference.clone()),
                    Err(ApplyError::NotFound(_)) => {
                        warn!(managed_ref = %reference, "skipping apply of child during parent deletion, already gone");
                    }
                    Err(err) => return Err(err.into()),
                }
                continue;
            }

            self.applicator.apply(&api_resource, candidate, *hint).await?;
            applied_refs.push(reference.clone());
        }

        self.refresh_managed_refs(parent, &applied_refs, &deleted_this_round).await
    }

    /// Spec §4.7 step 3: reconciles `parent.status.managedResourceRefs`
    /// against what the server actually has, rather than just replacing it
    /// with this round's applied set, so a ref only ever disappears because
    /// it was fetched and found missing.
    async fn refresh_managed_refs<P>(
        &self,
        parent: &mut P,
        applied_this_round: &[ManagedResourceRef],
        deleted_this_round: &HashSet<ManagedResourceRef>,
    ) -> Result<(), Error>
    where
        P: RootObject,
        P::DynamicType: Default,
    {
        let mut refs: Vec<ManagedResourceRef> = Vec::new();
        for reference in parent.managed_resource_refs() {
            let api_resource = api_resource_for(reference);
            match self.applicator.get(&api_resource, namespace_of(reference), &reference.name).await? {
                Some(_) => refs.push(reference.clone()),
                None => {
                    if !deleted_this_round.contains(reference) {
                        warn!(managed_ref = %reference, "managed resource is gone from the cluster but wasn't deleted by this reconcile, dropping from status");
                    }
                }
            }
        }
        for reference in applied_this_round {
            if !refs.contains(reference) {
                refs.push(reference.clone());
            }
        }
        refs.sort();
        refs.dedup();

        parent.set_managed_resource_refs(refs);

        let dt = P::DynamicType::default();
        let api_resource = ApiResource::erase::<P>(&dt);
        let dynamic = to_dynamic(parent.clone())?;
        self.applicator.apply_status(&api_resource, dynamic).await?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_resource_for_guesses_a_plural() {
        let reference = ManagedResourceRef::new("", "v1", "ConfigMap", "ns", "a");
        let api_resource = api_resource_for(&reference);
        assert_eq!(api_resource.plural, "configmaps");
    }

    #[test]
    fn stamp_labels_sets_the_well_known_keys() {
        let mut obj = DynamicObject::new("a", &api_resource_for(&ManagedResourceRef::new("", "v1", "ConfigMap", "ns", "a")));
        let identity = crate::identity::AppIdentity {
            name: "achilles",
            version: "0.1.0",
            component: "controller",
        };
        stamp_labels(&mut obj, &identity);
        let labels = obj.metadata.labels.unwrap();
        assert_eq!(labels.get(labels::NAME_LABEL).map(String::as_str), Some("achilles"));
        assert_eq!(labels.get(labels::MANAGED_BY_LABEL).map(String::as_str), Some("achilles"));
    }

    #[test]
    fn managed_kind_matches_on_gvk_only() {
        let kind = ManagedKind::new("", "v1", "ConfigMap");
        let reference = ManagedResourceRef::new("", "v1", "ConfigMap", "ns", "a");
        assert!(kind.matches(&reference));
        let other = ManagedResourceRef::new("", "v1", "Secret", "ns", "a");
        assert!(!kind.matches(&other));
    }
}
