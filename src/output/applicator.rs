//! # Applicator module
//!
//! Implements C2: create-or-patch / create-or-update / status-patch against
//! the live cluster, with subresource awareness. Kubernetes I/O is behind
//! the [`ApiOps`] trait so the diff/hint logic (the part worth unit-testing)
//! can run against an in-memory fake instead of a live API server, the same
//! way the teacher isolates transport behind narrow traits
//! (`svc::apis::Request`, `svc::apis::RestClient`).

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams, PropagationPolicy},
    core::DynamicObject,
    discovery::ApiResource,
    Client, ResourceExt,
};
use serde_json::Value;
use std::sync::Arc;

use super::ApplyHint;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read object metadata, {0}")]
    MetadataInaccessible(String),
    #[error("optimistic lock conflict applying {0}")]
    Conflict(String),
    #[error("object {0} does not exist")]
    NotFound(String),
    #[error("transient error talking to the api server, {0}")]
    Transient(#[source] kube::Error),
    #[error("optimistic lock requested for {0} but resourceVersion is empty")]
    ResourceVersionMissing(String),
    #[error("status subresource requested for {0} which declares none")]
    NoStatusSubresource(String),
}

fn classify(err: kube::Error, identity: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(identity.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(identity.to_string()),
        _ => Error::Transient(err),
    }
}

// -----------------------------------------------------------------------------
// ApiOps trait

/// The slice of Kubernetes API surface the applicator needs. Implemented for
/// real traffic by [`KubeApiOps`]; implemented for tests by an in-memory
/// fake (see `tests` submodule below).
#[async_trait]
pub trait ApiOps: Send + Sync {
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    async fn create(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Allocates an identity under `obj.metadata.generateName` without
    /// persisting anything, used by the claim reconciler (C8) to resolve a
    /// claimed object's name before it exists (spec §4.8 step 2).
    async fn create_dry_run(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    async fn patch(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<DynamicObject, Error>;

    async fn update(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    async fn patch_status(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<DynamicObject, Error>;

    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error>;

    /// Foreground-cascading delete, used by the claim reconciler (C8) so a
    /// claim deletion waits for the claimed object's own dependents to
    /// clear first (spec §4.8 step 4).
    async fn delete_foreground(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error>;
}

// -----------------------------------------------------------------------------
// KubeApiOps: real implementation over kube::Client

#[derive(Clone)]
pub struct KubeApiOps {
    client: Client,
}

impl KubeApiOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_resource: &ApiResource, namespace: Option<&str>) -> kube::Api<DynamicObject> {
        match namespace {
            Some(ns) => kube::Api::namespaced_with(self.client.clone(), ns, api_resource),
            None => kube::Api::all_with(self.client.clone(), api_resource),
        }
    }
}

#[async_trait]
impl ApiOps for KubeApiOps {
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        match self.api(api_resource, namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(err) => Err(classify(err, name)),
        }
    }

    async fn create(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.api(api_resource, namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|err| classify(err, &obj.name_any()))
    }

    async fn create_dry_run(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let params = PostParams { dry_run: true, ..Default::default() };
        self.api(api_resource, namespace)
            .create(&params, obj)
            .await
            .map_err(|err| classify(err, &obj.name_any()))
    }

    async fn patch(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<DynamicObject, Error> {
        let params = PatchParams::apply("achilles").force();
        self.api(api_resource, namespace)
            .patch(name, &params, &Patch::Merge(body))
            .await
            .map_err(|err| classify(err, name))
    }

    async fn update(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.api(api_resource, namespace)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|err| classify(err, &obj.name_any()))
    }

    async fn patch_status(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<DynamicObject, Error> {
        let params = PatchParams::default();
        self.api(api_resource, namespace)
            .patch_status(name, &params, &Patch::Merge(body))
            .await
            .map_err(|err| classify(err, name))
    }

    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        match self.api(api_resource, namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(classify(err, name)),
        }
    }

    async fn delete_foreground(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        let params = DeleteParams { propagation_policy: Some(PropagationPolicy::Foreground), ..Default::default() };
        match self.api(api_resource, namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(classify(err, name)),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// An object declares a status subresource iff its managed-fields record at
/// least one entry scoped to `subresource: "status"` (spec §4.2 step 3).
/// This is the only portable-across-api-server signal available without
/// also fetching the CRD itself.
fn has_status_subresource(obj: &DynamicObject) -> bool {
    obj.metadata
        .managed_fields
        .as_ref()
        .map(|fields| fields.iter().any(|f| f.subresource.as_deref() == Some("status")))
        .unwrap_or(false)
}

fn without_status(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.remove("status");
    }
    value
}

fn only_status(value: &Value) -> Value {
    value
        .as_object()
        .and_then(|map| map.get("status"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn identity(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

// -----------------------------------------------------------------------------
// Applicator structure

/// C2: reconciles a single desired object against live cluster state.
pub struct Applicator<A: ApiOps = KubeApiOps> {
    api: Arc<A>,
}

impl<A: ApiOps> Clone for Applicator<A> {
    fn clone(&self) -> Self {
        Self { api: self.api.clone() }
    }
}

impl<A: ApiOps> Applicator<A> {
    pub fn new(api: A) -> Self {
        Self { api: Arc::new(api) }
    }

    /// Creates `obj` and ignores an already-exists conflict, used by the FSM
    /// driver's `createIfNotFound` path (spec §4.6 step 1), which only ever
    /// wants to seed a missing object, never to reconcile an existing one.
    pub async fn create_if_absent(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<(), Error> {
        match self.api.create(api_resource, namespace, obj).await {
            Ok(_) => Ok(()),
            Err(Error::Conflict(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Patches just `metadata.finalizers`, used by the FSM driver (C6) and
    /// claim reconciler (C8) to add/remove their own finalizer without
    /// touching the rest of the object.
    pub async fn patch_finalizers(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        finalizers: &[String],
    ) -> Result<DynamicObject, Error> {
        let body = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api.patch(api_resource, namespace, name, &body).await
    }

    /// Deletes a child directly by api resource/namespace/name, used by the
    /// output reconciler (C7) to drain an [`super::OutputSet`]'s deleted
    /// entries. Absent-already is not an error (see [`ApiOps::delete`]).
    pub async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        self.api.delete(api_resource, namespace, name).await
    }

    /// Foreground-cascading delete, used by the claim reconciler (C8) so a
    /// claim deletion waits for its claimed object's own dependents to be
    /// gone before the claimed object itself disappears (spec §4.8 step 4).
    pub async fn delete_foreground(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        self.api.delete_foreground(api_resource, namespace, name).await
    }

    /// Dry-run create used by the claim reconciler (C8) to allocate a
    /// `generateName`d identity for the claimed object without persisting
    /// it (spec §4.8 step 2).
    pub async fn create_dry_run(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.api.create_dry_run(api_resource, namespace, obj).await
    }

    /// Direct existence/read lookup, used by the output reconciler (C7) to
    /// re-validate `status.managedResourceRefs` against live cluster state.
    pub async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.api.get(api_resource, namespace, name).await
    }

    /// `Apply`: create-or-patch (or create-or-update, depending on `hint`).
    pub async fn apply(
        &self,
        api_resource: &ApiResource,
        mut desired: DynamicObject,
        hint: ApplyHint,
    ) -> Result<DynamicObject, Error> {
        let namespace = desired.metadata.namespace.clone();
        let name = desired.metadata.name.clone().unwrap_or_default();

        // Step 1: generated-name allocation (spec §4.2 step 1).
        if name.is_empty() {
            if let Some(generate_name) = desired.metadata.generate_name.clone() {
                if !generate_name.is_empty() {
                    let created = self.api.create(api_resource, namespace.as_deref(), &desired).await?;
                    return Ok(created);
                }
            }
            return Err(Error::MetadataInaccessible(
                "desired object has neither name nor generateName".to_string(),
            ));
        }

        let ident = identity(namespace.as_deref(), &name);
        let live = self.api.get(api_resource, namespace.as_deref(), &name).await?;

        let live = match live {
            None => {
                // Not found: optimistic-lock hint is moot on create, never fatal.
                if hint.enforce_optimistic_lock && desired.metadata.resource_version.is_none() {
                    desired.metadata.resource_version = None;
                }
                return self.api.create(api_resource, namespace.as_deref(), &desired).await;
            }
            Some(live) => live,
        };

        // Found: diff a copy against live state. Owner-ref stamping happens
        // one layer up in the output reconciler (C7), which is the one that
        // knows the parent object and has already stamped `desired.metadata`
        // by the time it reaches here, so the comparison below includes
        // labels/annotations/owner-references rather than just spec/status:
        // data can already match while a stamped label or owner reference
        // has drifted (an operator stripping `managed-by`, say), and that
        // drift must still produce a patch.
        let mut candidate = desired.clone();
        let status_subresource = has_status_subresource(&live);
        let (live_data_cmp, desired_data_cmp) = if status_subresource {
            (
                without_status(serde_json::to_value(&live.data).unwrap_or(Value::Null)),
                without_status(serde_json::to_value(&candidate.data).unwrap_or(Value::Null)),
            )
        } else {
            (live.data.clone(), candidate.data.clone())
        };

        let metadata_converged = live.metadata.labels == candidate.metadata.labels
            && live.metadata.annotations == candidate.metadata.annotations
            && live.metadata.owner_references == candidate.metadata.owner_references;

        if live_data_cmp == desired_data_cmp && metadata_converged {
            return Ok(live);
        }

        if hint.update_instead_of_patch {
            if candidate.metadata.resource_version.is_none() {
                candidate.metadata.resource_version = live.metadata.resource_version.clone();
            }
            candidate.metadata.uid = live.metadata.uid.clone();
            return self.api.update(api_resource, namespace.as_deref(), &candidate).await;
        }

        if hint.enforce_optimistic_lock {
            let rv = candidate
                .metadata
                .resource_version
                .clone()
                .or_else(|| live.metadata.resource_version.clone());
            match rv {
                Some(rv) if !rv.is_empty() => candidate.metadata.resource_version = Some(rv),
                _ => return Err(Error::ResourceVersionMissing(ident)),
            }
        } else {
            candidate.metadata.resource_version = None;
        }

        // Merge-patch body is the full JSON of the desired object (spec
        // §4.2 step 4): the diff above only decided *whether* to write, the
        // write itself always carries the complete candidate.
        let full_body = serde_json::to_value(&candidate).unwrap_or(Value::Null);
        self.api.patch(api_resource, namespace.as_deref(), &name, &full_body).await
    }

    /// `ApplyStatus`: patches only the status subresource. Never creates.
    pub async fn apply_status(
        &self,
        api_resource: &ApiResource,
        mut desired: DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let namespace = desired.metadata.namespace.clone();
        let name = desired.metadata.name.clone().unwrap_or_default();
        let ident = identity(namespace.as_deref(), &name);

        let live = self
            .api
            .get(api_resource, namespace.as_deref(), &name)
            .await?
            .ok_or_else(|| Error::NotFound(ident.clone()))?;

        if !has_status_subresource(&live) {
            // Decided open question (spec §9, DESIGN.md): fail loudly rather
            // than silently ignore the write.
            return Err(Error::NoStatusSubresource(ident));
        }

        desired.metadata.uid = live.metadata.uid.clone();

        let live_status = only_status(&live.data);
        let desired_status = only_status(&desired.data);
        if live_status == desired_status {
            return Ok(live);
        }

        let body = serde_json::json!({ "status": desired_status });
        self.api
            .patch_status(api_resource, namespace.as_deref(), &name, &body)
            .await
    }
}

impl Applicator<KubeApiOps> {
    pub fn from_client(client: Client) -> Self {
        Self::new(KubeApiOps::new(client))
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::{collections::HashMap, sync::Mutex};

    #[derive(Default)]
    struct FakeApiOps {
        objects: Mutex<HashMap<String, DynamicObject>>,
        creates: Mutex<u32>,
        patches: Mutex<u32>,
        updates: Mutex<u32>,
    }

    fn key(namespace: Option<&str>, name: &str) -> String {
        identity(namespace, name)
    }

    #[async_trait]
    impl ApiOps for FakeApiOps {
        async fn get(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<Option<DynamicObject>, Error> {
            Ok(self.objects.lock().unwrap().get(&key(namespace, name)).cloned())
        }

        async fn create(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, Error> {
            *self.creates.lock().unwrap() += 1;
            let mut obj = obj.clone();
            obj.metadata.resource_version = Some("1".to_string());
            self.objects
                .lock()
                .unwrap()
                .insert(key(namespace, &obj.name_any()), obj.clone());
            Ok(obj)
        }

        async fn patch(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
            body: &Value,
        ) -> Result<DynamicObject, Error> {
            *self.patches.lock().unwrap() += 1;
            let mut objects = self.objects.lock().unwrap();
            let existing = objects
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            let mut merged = serde_json::to_value(&existing).unwrap();
            json_patch::merge(&mut merged, body);
            let updated: DynamicObject = serde_json::from_value(merged).unwrap();
            objects.insert(key(namespace, name), updated.clone());
            Ok(updated)
        }

        async fn update(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, Error> {
            *self.updates.lock().unwrap() += 1;
            self.objects
                .lock()
                .unwrap()
                .insert(key(namespace, &obj.name_any()), obj.clone());
            Ok(obj.clone())
        }

        async fn patch_status(
            &self,
            api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
            body: &Value,
        ) -> Result<DynamicObject, Error> {
            self.patch(api_resource, namespace, name, body).await
        }

        async fn delete(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<(), Error> {
            self.objects.lock().unwrap().remove(&key(namespace, name));
            Ok(())
        }

        async fn delete_foreground(
            &self,
            api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<(), Error> {
            self.delete(api_resource, namespace, name).await
        }

        async fn create_dry_run(
            &self,
            _api_resource: &ApiResource,
            _namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
    }

    fn api_resource() -> ApiResource {
        ApiResource {
            group: "".to_string(),
            version: "v1".to_string(),
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            plural: "configmaps".to_string(),
        }
    }

    fn desired(name: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &api_resource()).data(serde_json::json!({
            "data": { "k": "v" }
        }));
        obj.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        };
        obj
    }

    #[tokio::test]
    async fn creates_when_absent() {
        let fake = FakeApiOps::default();
        let applicator = Applicator::new(fake);
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();
        assert_eq!(*applicator.api.creates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn converged_object_issues_no_api_call() {
        let fake = FakeApiOps::default();
        let applicator = Applicator::new(fake);
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();
        assert_eq!(*applicator.api.patches.lock().unwrap(), 0);
        assert_eq!(*applicator.api.creates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn update_instead_of_patch_hint_uses_replace() {
        let fake = FakeApiOps::default();
        let applicator = Applicator::new(fake);
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();

        let mut changed = desired("a");
        changed.data = serde_json::json!({ "data": { "k": "v2" } });
        applicator
            .apply(
                &api_resource(),
                changed,
                ApplyHint { update_instead_of_patch: true, ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(*applicator.api.updates.lock().unwrap(), 1);
        assert_eq!(*applicator.api.patches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn optimistic_lock_without_resource_version_fails() {
        let fake = FakeApiOps::default();
        let applicator = Applicator::new(fake);
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();

        let mut changed = desired("a");
        changed.data = serde_json::json!({ "data": { "k": "v2" } });
        changed.metadata.resource_version = None;
        let mut applicator_live = applicator;
        // Force the live side to also have no resource version to trigger
        // ResourceVersionMissing deterministically.
        applicator_live
            .api
            .objects
            .lock()
            .unwrap()
            .get_mut(&key(Some("default"), "a"))
            .unwrap()
            .metadata
            .resource_version = None;

        let err = applicator_live
            .apply(
                &api_resource(),
                changed,
                ApplyHint { enforce_optimistic_lock: true, ..Default::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceVersionMissing(_)));
    }

    #[tokio::test]
    async fn apply_status_fails_without_subresource() {
        let fake = FakeApiOps::default();
        let applicator = Applicator::new(fake);
        applicator
            .apply(&api_resource(), desired("a"), ApplyHint::default())
            .await
            .unwrap();

        let mut status_obj = desired("a");
        status_obj.data = serde_json::json!({ "status": { "phase": "Ready" } });
        let err = applicator
            .apply_status(&api_resource(), status_obj)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoStatusSubresource(_)));
    }
}
