//! # Claim reconciler module
//!
//! Implements C8: the two-object binding protocol between a namespaced
//! "claim" and the cluster-scoped "claimed" object it fronts (spec §3,
//! §4.8). Grounded on the same fetch-mutate-apply shape the FSM driver (C6)
//! uses, reusing its type-erased [`crate::output::applicator`] surface
//! rather than a typed `kube::Api<T>`, since a generic claim reconciler
//! cannot be compiled against either concrete kind.

use std::sync::Arc;

use chrono::Utc;
use kube::{core::DynamicObject, discovery::ApiResource, runtime::controller::Action, Client, CustomResourceExt, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::capability::{Claim, Claimed, Condition, ConditionStatus, ManagedResourceRef, READY_CONDITION_TYPE};
use crate::labels;
use crate::metrics::{Gvk, MetricsSink};
use crate::output::{
    applicator::{ApiOps, Applicator, Error as ApplyError, KubeApiOps},
    from_dynamic, to_dynamic, ApplyHint, Error as OutputError,
};
use crate::recorder;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fetching claim object, {0}")]
    FetchClaim(#[source] ApplyError),
    #[error("fetching claimed object, {0}")]
    FetchClaimed(#[source] ApplyError),
    #[error("claimed object's claimRef does not name this claim, manual intervention required")]
    ClaimRefMismatch,
    #[error("before-delete hook failed, {0}")]
    BeforeDeleteHook(String),
    #[error("allocating a name for the claimed object, {0}")]
    Allocate(#[source] ApplyError),
    #[error("writing claim or claimed object, {0}")]
    Apply(#[source] ApplyError),
    #[error(transparent)]
    Output(OutputError),
}

/// Runs before a claim's deletion proceeds (spec §4.8 step 4). Returning
/// `Err` stops the deletion and surfaces the message on the claim's `Ready`
/// condition instead.
pub type BeforeDeleteFn<C> = Box<dyn Fn(&C) -> Result<(), String> + Send + Sync>;

fn self_ref(group: &str, version: &str, kind: &str, namespace: &str, name: &str) -> ManagedResourceRef {
    ManagedResourceRef::new(group, version, kind, namespace, name)
}

// -----------------------------------------------------------------------------
// ClaimReconciler structure

/// C8: binds one claim kind `C` to one claimed kind `K`. `K: Default` seeds
/// a fresh in-memory claimed object the first time a claim is reconciled,
/// before anything has ever been written to the server for it.
pub struct ClaimReconciler<C, K, A = KubeApiOps>
where
    C: Claim,
    K: Claimed + Default,
    A: ApiOps,
{
    applicator: Applicator<A>,
    before_delete: Option<BeforeDeleteFn<C>>,
    claim_api_resource: ApiResource,
    claimed_api_resource: ApiResource,
    claim_gvk: (String, String, String),
    claimed_gvk: (String, String, String),
    client: Client,
    metrics: Arc<MetricsSink>,
    controller_name: String,
}

impl<C, K, A> ClaimReconciler<C, K, A>
where
    C: Claim + CustomResourceExt,
    C::DynamicType: Default,
    K: Claimed + Default,
    K::DynamicType: Default,
    A: ApiOps,
{
    pub fn new(applicator: Applicator<A>, client: Client, metrics: Arc<MetricsSink>, controller_name: impl Into<String>) -> Self {
        let claim_dt = C::DynamicType::default();
        let claimed_dt = K::DynamicType::default();
        Self {
            applicator,
            before_delete: None,
            claim_api_resource: ApiResource::erase::<C>(&claim_dt),
            claimed_api_resource: ApiResource::erase::<K>(&claimed_dt),
            claim_gvk: (
                C::group(&claim_dt).into_owned(),
                C::version(&claim_dt).into_owned(),
                C::kind(&claim_dt).into_owned(),
            ),
            claimed_gvk: (
                K::group(&claimed_dt).into_owned(),
                K::version(&claimed_dt).into_owned(),
                K::kind(&claimed_dt).into_owned(),
            ),
            client,
            metrics,
            controller_name: controller_name.into(),
        }
    }

    fn claim_gvk_ref(&self) -> Gvk<'_> {
        Gvk { group: &self.claim_gvk.0, version: &self.claim_gvk.1, kind: &self.claim_gvk.2 }
    }

    pub fn with_before_delete(mut self, hook: BeforeDeleteFn<C>) -> Self {
        self.before_delete = Some(hook);
        self
    }

    async fn write_claim(&self, claim: &C) -> Result<(), Error> {
        let dynamic = to_dynamic(claim.clone()).map_err(Error::Output)?;
        self.applicator
            .apply(&self.claim_api_resource, dynamic, ApplyHint::default())
            .await
            .map_err(Error::Apply)?;
        Ok(())
    }

    /// `Reconcile(req)` for a claim (spec §4.8 steps 1-10).
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, Error> {
        // Step 1: fetch the claim.
        let claim_dynamic = match self
            .applicator
            .get(&self.claim_api_resource, Some(namespace), name)
            .await
            .map_err(Error::FetchClaim)?
        {
            Some(dynamic) => dynamic,
            None => return Ok(Action::await_change()),
        };
        let mut claim: C = from_dynamic(claim_dynamic).map_err(Error::Output)?;
        let now = Utc::now();

        // Step 2: resolve the claimed object's identity.
        let (claimed_ref, claimed_dynamic) = match claim.claimed_ref().cloned() {
            Some(existing_ref) => {
                let fetched = self
                    .applicator
                    .get(&self.claimed_api_resource, None, &existing_ref.name)
                    .await
                    .map_err(Error::FetchClaimed)?;
                (existing_ref, fetched)
            }
            None => {
                let mut seed = DynamicObject::new("", &self.claimed_api_resource).data(serde_json::json!({}));
                seed.metadata.generate_name = Some(format!("{}-", claim.name_any()));
                let allocated = self
                    .applicator
                    .create_dry_run(&self.claimed_api_resource, None, &seed)
                    .await
                    .map_err(Error::Allocate)?;
                let allocated_ref = self_ref(
                    &self.claimed_gvk.0,
                    &self.claimed_gvk.1,
                    &self.claimed_gvk.2,
                    "",
                    &allocated.name_any(),
                );
                (allocated_ref, None)
            }
        };

        // Step 3: claimRef mismatch is fatal.
        let mut claimed: K = match &claimed_dynamic {
            Some(dynamic) => from_dynamic(dynamic.clone()).map_err(Error::Output)?,
            None => K::default(),
        };
        if claimed_dynamic.is_some() {
            if let Some(existing) = claimed.claim_ref() {
                let this_claim_ref = self_ref(&self.claim_gvk.0, &self.claim_gvk.1, &self.claim_gvk.2, namespace, name);
                if existing != &this_claim_ref {
                    // Spec §7: fatal, returned to the queue, and surfaced as
                    // a warning event — operator intervention required.
                    if let Err(err) = recorder::warning(
                        self.client.clone(),
                        &self.metrics,
                        self.claim_gvk_ref(),
                        &claim,
                        &"ClaimRefMismatch",
                        "claimed object's claimRef does not name this claim, manual intervention required",
                        &self.controller_name,
                    )
                    .await
                    {
                        warn!(namespace, name, error = %err, "failed to publish claimRef-mismatch event");
                    }
                    return Err(Error::ClaimRefMismatch);
                }
            }
        }

        let deleting = Resource::meta(&claim).deletion_timestamp.is_some();
        let suspended = labels::is_suspended(claim.labels());

        // Step 4: deletion.
        if deleting && !suspended {
            if let Some(hook) = &self.before_delete {
                if let Err(message) = hook(&claim) {
                    claim.set_condition(
                        Condition::new(READY_CONDITION_TYPE, ConditionStatus::False, now)
                            .with_reason("Deleting")
                            .with_message(message.clone()),
                    );
                    self.write_claim(&claim).await?;
                    if let Err(err) = recorder::warning(
                        self.client.clone(),
                        &self.metrics,
                        self.claim_gvk_ref(),
                        &claim,
                        &"BeforeDeleteHookFailed",
                        &message,
                        &self.controller_name,
                    )
                    .await
                    {
                        warn!(namespace, name, error = %err, "failed to publish before-delete-hook-failure event");
                    }
                    return Err(Error::BeforeDeleteHook(message));
                }
            }

            if claimed_dynamic.is_some() {
                self.applicator
                    .delete_foreground(&self.claimed_api_resource, None, &claimed_ref.name)
                    .await
                    .map_err(Error::Apply)?;
                return Ok(Action::await_change());
            }

            let finalizers: Vec<String> = claim
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != labels::CLAIM_FINALIZER)
                .cloned()
                .collect();
            self.applicator
                .patch_finalizers(&self.claim_api_resource, Some(namespace), name, &finalizers)
                .await
                .map_err(Error::Apply)?;
            debug!(namespace, name, "removed claim finalizer after claimed teardown");
            return Ok(Action::await_change());
        }

        // Step 5: add the claim's finalizer, idempotent.
        if !claim.finalizers().iter().any(|f| f == labels::CLAIM_FINALIZER) {
            let mut finalizers = claim.finalizers().to_vec();
            finalizers.push(labels::CLAIM_FINALIZER.to_string());
            self.applicator
                .patch_finalizers(&self.claim_api_resource, Some(namespace), name, &finalizers)
                .await
                .map_err(Error::Apply)?;
            *claim.finalizers_mut() = finalizers;
        }

        // Step 6: populate claimedRef before the claimed object is ever
        // created, so a crash between these two writes leaves at worst an
        // unbound claim rather than an orphaned claimed object.
        if claim.claimed_ref().is_none() {
            claim.set_claimed_ref(claimed_ref.clone());
            self.write_claim(&claim).await?;
        }

        // Step 7: stamp labels, claimRef and the suspend mirror onto the
        // claimed object, then apply it as an update so label removal
        // sticks (a merge patch can drop a key but an explicit update
        // leaves no ambiguity about it).
        {
            let meta = Resource::meta_mut(&mut claimed);
            if meta.name.is_none() {
                meta.name = Some(claimed_ref.name.clone());
            }
        }
        let identity = crate::identity::get();
        let claim_ref = self_ref(&self.claim_gvk.0, &self.claim_gvk.1, &self.claim_gvk.2, namespace, name);
        claimed.set_claim_ref(claim_ref);
        {
            let labels = claimed.labels_mut();
            labels.insert(labels::NAME_LABEL.to_string(), identity.name.to_string());
            labels.insert(labels::VERSION_LABEL.to_string(), identity.version.to_string());
            labels.insert(labels::COMPONENT_LABEL.to_string(), identity.component.to_string());
            labels.insert(labels::MANAGED_BY_LABEL.to_string(), identity.name.to_string());
            match claim.labels().get(labels::SUSPEND_LABEL) {
                Some(value) => {
                    labels.insert(labels::SUSPEND_LABEL.to_string(), value.clone());
                }
                None => {
                    labels.remove(labels::SUSPEND_LABEL);
                }
            }
        }
        let claimed_dynamic_out = to_dynamic(claimed.clone()).map_err(Error::Output)?;
        self.applicator
            .apply(
                &self.claimed_api_resource,
                claimed_dynamic_out,
                ApplyHint { update_instead_of_patch: true, ..Default::default() },
            )
            .await
            .map_err(Error::Apply)?;

        // Step 8: initialize Ready to Creating the first time it is seen.
        let ready_is_unknown = match claim.conditions().iter().find(|c| c.type_ == READY_CONDITION_TYPE) {
            Some(c) => c.status == ConditionStatus::Unknown,
            None => true,
        };
        if ready_is_unknown {
            claim.set_condition(
                Condition::new(READY_CONDITION_TYPE, ConditionStatus::Unknown, now)
                    .with_reason("Creating")
                    .with_observed_generation(claim.generation()),
            );
        }

        // Step 9: propagate readiness from the claimed object.
        if claimed.is_ready() {
            claim.set_condition(
                Condition::new(READY_CONDITION_TYPE, ConditionStatus::True, now)
                    .with_observed_generation(claim.generation()),
            );
        }

        // Step 10: persist the claim's status.
        self.write_claim(&claim).await?;

        Ok(Action::await_change())
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kube::api::ObjectMeta;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    #[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
    #[kube(group = "cloud.infrared.reddit.com", version = "v1", kind = "StubClaim", namespaced, status = "StubClaimStatus")]
    struct StubClaimSpec {}

    #[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
    struct StubClaimStatus {
        #[serde(default)]
        conditions: Vec<Condition>,
        #[serde(default, rename = "claimedRef")]
        claimed_ref: Option<ManagedResourceRef>,
    }

    impl Claim for StubClaim {
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
    #[kube(
        group = "cloud.infrared.reddit.com",
        version = "v1",
        kind = "StubClaimed",
        status = "StubClaimedStatus",
        derive = "Default"
    )]
    struct StubClaimedSpec {}

    #[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
    struct StubClaimedStatus {
        #[serde(default)]
        conditions: Vec<Condition>,
        #[serde(default, rename = "managedResourceRefs")]
        managed_resource_refs: Vec<ManagedResourceRef>,
        #[serde(default, rename = "claimRef")]
        claim_ref: Option<ManagedResourceRef>,
    }

    impl crate::capability::RootObject for StubClaimed {
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

    impl Claimed for StubClaimed {
        fn claim_ref(&self) -> Option<&ManagedResourceRef> {
            self.status.as_ref().and_then(|s| s.claim_ref.as_ref())
        }

        fn set_claim_ref(&mut self, reference: ManagedResourceRef) {
            self.status.get_or_insert_with(Default::default).claim_ref = Some(reference);
        }
    }

    #[derive(Default)]
    struct FakeApiOps {
        objects: Mutex<StdHashMap<String, DynamicObject>>,
        name_seq: Mutex<u32>,
    }

    fn fake_key(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) => format!("{ns}/{name}"),
            None => name.to_string(),
        }
    }

    #[async_trait]
    impl ApiOps for FakeApiOps {
        async fn get(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<Option<DynamicObject>, ApplyError> {
            Ok(self.objects.lock().unwrap().get(&fake_key(namespace, name)).cloned())
        }

        async fn create(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ApplyError> {
            let mut obj = obj.clone();
            obj.metadata.resource_version = Some("1".to_string());
            self.objects.lock().unwrap().insert(fake_key(namespace, &obj.name_any()), obj.clone());
            Ok(obj)
        }

        async fn create_dry_run(
            &self,
            _api_resource: &ApiResource,
            _namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ApplyError> {
            let mut seq = self.name_seq.lock().unwrap();
            *seq += 1;
            let mut obj = obj.clone();
            let prefix = obj.metadata.generate_name.clone().unwrap_or_default();
            obj.metadata.name = Some(format!("{prefix}{seq}"));
            Ok(obj)
        }

        async fn patch(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
            body: &serde_json::Value,
        ) -> Result<DynamicObject, ApplyError> {
            let mut objects = self.objects.lock().unwrap();
            let existing = objects
                .get(&fake_key(namespace, name))
                .cloned()
                .ok_or_else(|| ApplyError::NotFound(name.to_string()))?;
            let mut merged = serde_json::to_value(&existing).unwrap();
            json_patch::merge(&mut merged, body);
            let updated: DynamicObject = serde_json::from_value(merged).unwrap();
            objects.insert(fake_key(namespace, name), updated.clone());
            Ok(updated)
        }

        async fn update(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ApplyError> {
            self.objects.lock().unwrap().insert(fake_key(namespace, &obj.name_any()), obj.clone());
            Ok(obj.clone())
        }

        async fn patch_status(
            &self,
            api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
            body: &serde_json::Value,
        ) -> Result<DynamicObject, ApplyError> {
            self.patch(api_resource, namespace, name, body).await
        }

        async fn delete(
            &self,
            _api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<(), ApplyError> {
            self.objects.lock().unwrap().remove(&fake_key(namespace, name));
            Ok(())
        }

        async fn delete_foreground(
            &self,
            api_resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<(), ApplyError> {
            self.delete(api_resource, namespace, name).await
        }
    }

    fn seed_claim(fake: &FakeApiOps, name: &str) {
        let claim = StubClaim::new(name, StubClaimSpec {});
        let mut dynamic = to_dynamic(claim).unwrap();
        dynamic.metadata.namespace = Some("default".to_string());
        dynamic.metadata.generation = Some(1);
        fake.objects.lock().unwrap().insert(fake_key(Some("default"), name), dynamic);
    }

    fn reconciler(fake: FakeApiOps) -> ClaimReconciler<StubClaim, StubClaimed, FakeApiOps> {
        ClaimReconciler::new(
            Applicator::new(fake),
            Client::try_from(kube::Config::new("https://example.invalid".parse().unwrap())).unwrap(),
            Arc::new(MetricsSink::new(crate::metrics::Disabled::default())),
            "stub-claim",
        )
    }

    #[tokio::test]
    async fn missing_claim_is_a_noop() {
        let fake = FakeApiOps::default();
        let r = reconciler(fake);
        let action = r.reconcile("default", "missing").await.unwrap();
        assert_eq!(format!("{action:?}"), format!("{:?}", Action::await_change()));
    }

    #[tokio::test]
    async fn first_reconcile_allocates_and_binds_a_claimed_object() {
        let fake = FakeApiOps::default();
        seed_claim(&fake, "a");
        let r = reconciler(fake);
        r.reconcile("default", "a").await.unwrap();

        let stored = r
            .applicator
            .get(&r.claim_api_resource, Some("default"), "a")
            .await
            .unwrap()
            .unwrap();
        let claim: StubClaim = from_dynamic(stored).unwrap();
        let claimed_ref = claim.claimed_ref().unwrap();
        assert_eq!(claimed_ref.kind, "StubClaimed");
        assert!(claim.finalizers().iter().any(|f| f == labels::CLAIM_FINALIZER));

        let stored_claimed = r
            .applicator
            .get(&r.claimed_api_resource, None, &claimed_ref.name)
            .await
            .unwrap()
            .unwrap();
        let claimed: StubClaimed = from_dynamic(stored_claimed).unwrap();
        assert_eq!(claimed.claim_ref().unwrap().name, "a");
    }

    #[tokio::test]
    async fn ready_claimed_object_marks_the_claim_ready() {
        let fake = FakeApiOps::default();
        seed_claim(&fake, "a");
        let r = reconciler(fake);
        r.reconcile("default", "a").await.unwrap();

        // Mark the claimed object ready out of band, as its own FSM driver
        // (C6) would, then reconcile the claim again.
        let stored = r
            .applicator
            .get(&r.claim_api_resource, Some("default"), "a")
            .await
            .unwrap()
            .unwrap();
        let claim: StubClaim = from_dynamic(stored).unwrap();
        let claimed_ref = claim.claimed_ref().unwrap().clone();

        let stored_claimed = r
            .applicator
            .get(&r.claimed_api_resource, None, &claimed_ref.name)
            .await
            .unwrap()
            .unwrap();
        let mut claimed: StubClaimed = from_dynamic(stored_claimed).unwrap();
        claimed.set_condition(Condition::new(READY_CONDITION_TYPE, ConditionStatus::True, Utc::now()));
        let dynamic = to_dynamic(claimed).unwrap();
        r.applicator
            .apply(&r.claimed_api_resource, dynamic, ApplyHint { update_instead_of_patch: true, ..Default::default() })
            .await
            .unwrap();

        r.reconcile("default", "a").await.unwrap();

        let stored = r
            .applicator
            .get(&r.claim_api_resource, Some("default"), "a")
            .await
            .unwrap()
            .unwrap();
        let claim: StubClaim = from_dynamic(stored).unwrap();
        let ready = claim.conditions().iter().find(|c| c.type_ == READY_CONDITION_TYPE).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn mismatched_claim_ref_is_fatal() {
        let fake = FakeApiOps::default();
        seed_claim(&fake, "a");

        let mut other_claim_ref = StubClaimed::new("pre-existing", StubClaimedSpec {});
        other_claim_ref.set_claim_ref(ManagedResourceRef::new(
            "cloud.infrared.reddit.com",
            "v1",
            "StubClaim",
            "default",
            "someone-else",
        ));
        let dynamic = to_dynamic(other_claim_ref).unwrap();
        fake.objects
            .lock()
            .unwrap()
            .insert(fake_key(None, "pre-existing"), dynamic);

        let mut claim_dynamic = fake.objects.lock().unwrap().get(&fake_key(Some("default"), "a")).unwrap().clone();
        let mut claim: StubClaim = from_dynamic(claim_dynamic.clone()).unwrap();
        claim.set_claimed_ref(ManagedResourceRef::new(
            "cloud.infrared.reddit.com",
            "v1",
            "StubClaimed",
            "",
            "pre-existing",
        ));
        claim_dynamic = to_dynamic(claim).unwrap();
        fake.objects.lock().unwrap().insert(fake_key(Some("default"), "a"), claim_dynamic);

        let r = reconciler(fake);
        let err = r.reconcile("default", "a").await.unwrap_err();
        assert!(matches!(err, Error::ClaimRefMismatch));
    }
}
