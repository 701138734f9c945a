//! # Output module
//!
//! Provides the output-set accumulator (C1) plus, in its submodules, the
//! applicator (C2, `applicator.rs`) and the reconciler that drains a set
//! against the live cluster (C7, `reconciler.rs`).

pub mod applicator;
pub mod reconciler;

use crate::capability::ManagedResourceRef;
use kube::core::{DynamicObject, Resource, ResourceExt};
use std::collections::BTreeMap;

// -----------------------------------------------------------------------------
// ApplyHint structure

/// Per-object hints that steer how the applicator (C2) reconciles one
/// desired object against the live one. Repeated [`OutputSet::apply`] calls
/// for the same object OR their hints together rather than replacing them,
/// so a state that only wants to add `suppress_owner_refs` on top of an
/// earlier state's `enforce_optimistic_lock` doesn't have to repeat it.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct ApplyHint {
    /// Send an `Update` instead of a merge `Patch`.
    pub update_instead_of_patch: bool,
    /// Carry the live object's `resourceVersion` into the write and let the
    /// API server reject the write on conflict, instead of clearing it.
    pub enforce_optimistic_lock: bool,
    /// Never attach an owner reference to the parent, even when the caller
    /// didn't set any owner references explicitly.
    pub suppress_owner_refs: bool,
    /// The caller already set owner references on the desired object; the
    /// reconciler must not overwrite them with its own controller ref.
    pub explicit_owner_refs_set: bool,
}

impl ApplyHint {
    fn merge(&mut self, other: ApplyHint) {
        self.update_instead_of_patch |= other.update_instead_of_patch;
        self.enforce_optimistic_lock |= other.enforce_optimistic_lock;
        self.suppress_owner_refs |= other.suppress_owner_refs;
        self.explicit_owner_refs_set |= other.explicit_owner_refs_set;
    }
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize desired object into a dynamic representation, {0}")]
    Serialize(serde_json::Error),
    #[error("managed object has no name")]
    MissingName,
    #[error("failed to parse a dynamic object back into its typed representation, {0}")]
    Deserialize(serde_json::Error),
}

// -----------------------------------------------------------------------------
// helpers

fn managed_ref_for<K>(obj: &K) -> Result<ManagedResourceRef, Error>
where
    K: Resource + ResourceExt,
    K::DynamicType: Default,
{
    let dt = K::DynamicType::default();
    Ok(ManagedResourceRef::new(
        K::group(&dt).into_owned(),
        K::version(&dt).into_owned(),
        K::kind(&dt).into_owned(),
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
    ))
}

pub(crate) fn to_dynamic<K>(obj: K) -> Result<DynamicObject, Error>
where
    K: Resource + ResourceExt + serde::Serialize,
    K::DynamicType: Default,
{
    let dt = K::DynamicType::default();
    let api_resource = kube::discovery::ApiResource::erase::<K>(&dt);
    let name = obj.name_any();
    let namespace = obj.namespace();
    let metadata = obj.meta().clone();
    let value = serde_json::to_value(&obj).map_err(Error::Serialize)?;

    let mut dynamic = DynamicObject::new(&name, &api_resource).data(value);
    dynamic.metadata = metadata;
    if let Some(ns) = namespace {
        dynamic = dynamic.within(&ns);
    }
    Ok(dynamic)
}

/// The inverse of [`to_dynamic`]: reconstitutes a typed object from a
/// [`DynamicObject`] fetched through the type-erased [`applicator::ApiOps`]
/// surface. Used by the FSM driver (C6), which fetches and writes the root
/// object exclusively through that erased path so it needs no typed
/// `kube::Api<T>` of its own.
pub(crate) fn from_dynamic<K>(dynamic: DynamicObject) -> Result<K, Error>
where
    K: serde::de::DeserializeOwned,
{
    let value = serde_json::to_value(&dynamic).map_err(Error::Serialize)?;
    serde_json::from_value(value).map_err(Error::Deserialize)
}

// -----------------------------------------------------------------------------
// OutputSet structure

/// The desired child-object set for one reconcile (spec §3, §4.1). Created
/// fresh per reconcile, shared across all states that run in it, and
/// discarded once the output reconciler (C7) has drained it. Never contains
/// the root object itself — nothing here stops a caller from adding it, but
/// no framework code ever does, and `demo::Workload`'s transitions don't
/// either.
#[derive(Default)]
pub struct OutputSet {
    applied: BTreeMap<ManagedResourceRef, (DynamicObject, ApplyHint)>,
    deleted: BTreeMap<ManagedResourceRef, DynamicObject>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `obj` as desired. Removes any pending deletion for the same
    /// identity and OR-merges `hints` into whatever hints are already
    /// recorded for it.
    pub fn apply<K>(&mut self, obj: K, hints: ApplyHint) -> Result<(), Error>
    where
        K: Resource + ResourceExt + serde::Serialize,
        K::DynamicType: Default,
    {
        let key = managed_ref_for(&obj)?;
        self.deleted.remove(&key);
        let dynamic = to_dynamic(obj)?;
        match self.applied.get_mut(&key) {
            Some((existing, existing_hints)) => {
                *existing = dynamic;
                existing_hints.merge(hints);
            }
            None => {
                self.applied.insert(key, (dynamic, hints));
            }
        }
        Ok(())
    }

    pub fn apply_all<K, I>(&mut self, objs: I, hints: ApplyHint) -> Result<(), Error>
    where
        K: Resource + ResourceExt + serde::Serialize,
        K::DynamicType: Default,
        I: IntoIterator<Item = K>,
    {
        for obj in objs {
            self.apply(obj, hints)?;
        }
        Ok(())
    }

    /// Marks `obj` as desired for deletion. Removes any pending apply (and
    /// its hints) for the same identity.
    pub fn delete<K>(&mut self, obj: K) -> Result<(), Error>
    where
        K: Resource + ResourceExt + serde::Serialize,
        K::DynamicType: Default,
    {
        let key = managed_ref_for(&obj)?;
        self.applied.remove(&key);
        let dynamic = to_dynamic(obj)?;
        self.deleted.insert(key, dynamic);
        Ok(())
    }

    /// Same as [`Self::delete`], but from an already-known identity rather
    /// than a typed object — useful when the caller only has a
    /// [`ManagedResourceRef`] (e.g. from `status.managedResourceRefs`).
    pub fn delete_by_ref(&mut self, reference: ManagedResourceRef, placeholder: DynamicObject) {
        self.applied.remove(&reference);
        self.deleted.insert(reference, placeholder);
    }

    pub fn delete_all<K, I>(&mut self, objs: I) -> Result<(), Error>
    where
        K: Resource + ResourceExt + serde::Serialize,
        K::DynamicType: Default,
        I: IntoIterator<Item = K>,
    {
        for obj in objs {
            self.delete(obj)?;
        }
        Ok(())
    }

    pub fn list_applied(&self) -> impl Iterator<Item = (&ManagedResourceRef, &DynamicObject)> {
        self.applied.iter().map(|(k, (obj, _))| (k, obj))
    }

    pub fn list_applied_with_hints(
        &self,
    ) -> impl Iterator<Item = (&ManagedResourceRef, &DynamicObject, &ApplyHint)> {
        self.applied.iter().map(|(k, (obj, hint))| (k, obj, hint))
    }

    pub fn list_deleted(&self) -> impl Iterator<Item = (&ManagedResourceRef, &DynamicObject)> {
        self.deleted.iter()
    }

    pub fn is_applied(&self, reference: &ManagedResourceRef) -> bool {
        self.applied.contains_key(reference)
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn cm(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn apply_then_delete_removes_the_apply() {
        let mut set = OutputSet::new();
        set.apply(cm("a"), ApplyHint::default()).unwrap();
        assert_eq!(set.list_applied().count(), 1);

        set.delete(cm("a")).unwrap();
        assert_eq!(set.list_applied().count(), 0);
        assert_eq!(set.list_deleted().count(), 1);
    }

    #[test]
    fn delete_then_apply_clears_the_deletion() {
        let mut set = OutputSet::new();
        set.delete(cm("a")).unwrap();
        set.apply(cm("a"), ApplyHint::default()).unwrap();

        assert_eq!(set.list_deleted().count(), 0);
        assert_eq!(set.list_applied().count(), 1);
    }

    #[test]
    fn repeated_apply_merges_hints_instead_of_duplicating() {
        let mut set = OutputSet::new();
        set.apply(
            cm("a"),
            ApplyHint {
                enforce_optimistic_lock: true,
                ..Default::default()
            },
        )
        .unwrap();
        set.apply(
            cm("a"),
            ApplyHint {
                suppress_owner_refs: true,
                ..Default::default()
            },
        )
        .unwrap();

        let (_, _, hint) = set.list_applied_with_hints().next().unwrap();
        assert!(hint.enforce_optimistic_lock);
        assert!(hint.suppress_owner_refs);
        assert_eq!(set.list_applied().count(), 1);
    }

    #[test]
    fn identity_keys_on_type_namespace_and_name_not_value() {
        let mut set = OutputSet::new();
        let mut first = cm("a");
        first
            .data
            .get_or_insert_with(Default::default)
            .insert("k".into(), "v1".into());
        set.apply(first, ApplyHint::default()).unwrap();

        let mut second = cm("a");
        second
            .data
            .get_or_insert_with(Default::default)
            .insert("k".into(), "v2".into());
        set.apply(second, ApplyHint::default()).unwrap();

        assert_eq!(set.list_applied().count(), 1);
    }
}
