//! # FSM driver module
//!
//! Implements C6: sequences a root object through its declared state chain,
//! accumulating conditions and an [`crate::output::OutputSet`], then hands
//! both to the output reconciler (C7) and persists the result. This is the
//! component every controller built by C9 actually installs as its
//! reconcile function; grounded on the teacher's `Reconciler<T>::reconcile`
//! shape in `svc/k8s/mod.rs`, generalized from "one CRD, one hand-written
//! reconcile loop" into "any `RootObject` walked through a declared graph".

pub mod condition;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use kube::{core::DynamicObject, discovery::ApiResource, runtime::controller::Action, Client, CustomResourceExt, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::capability::{Condition, ConditionStatus, ManagedKind, RootObject, READY_CONDITION_TYPE};
use crate::labels;
use crate::metrics::{Gvk, MetricsSink};
use crate::output::{
    applicator::{ApiOps, Error as ApplyError, KubeApiOps},
    from_dynamic,
    reconciler::{Error as ReconcilerError, Reconciler},
    to_dynamic, Error as OutputError, OutputSet,
};
use crate::processing::ProcessingIndex;
use crate::recorder;

pub use condition::{ConditionTemplate, TransitionResult};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fetching root object, {0}")]
    Fetch(#[source] ApplyError),
    #[error("patching a finalizer, {0}")]
    Apply(#[source] ApplyError),
    #[error(transparent)]
    Output(OutputError),
    #[error("applying outputs, {0}")]
    ApplyOutputs(#[source] ReconcilerError),
    #[error("state {0:?} not found in the state graph")]
    UnknownState(&'static str),
    #[error("{0}")]
    Backoff(String),
}

// -----------------------------------------------------------------------------
// Transition trait

/// A state's side-effecting step. Mutates `obj` and `out` freely and returns
/// the name of the next state (`None` terminates the walk) plus a
/// [`TransitionResult`] (spec §3's `State[T]`/`Result`).
#[async_trait]
pub trait Transition<T: RootObject>: Send + Sync {
    async fn run(&self, obj: &mut T, out: &mut OutputSet) -> (Option<&'static str>, TransitionResult);
}

#[async_trait]
impl<T, F, Fut> Transition<T> for F
where
    T: RootObject,
    F: Fn(&mut T, &mut OutputSet) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = (Option<&'static str>, TransitionResult)> + Send,
{
    async fn run(&self, obj: &mut T, out: &mut OutputSet) -> (Option<&'static str>, TransitionResult) {
        (self)(obj, out).await
    }
}

// -----------------------------------------------------------------------------
// State structure

/// One node of the state graph (spec §3). `transition == None` means a
/// terminal state: no side effects, but its condition is still recorded as
/// `done`.
pub struct State<T: RootObject> {
    name: &'static str,
    condition: ConditionTemplate,
    transition: Option<Box<dyn Transition<T>>>,
}

impl<T: RootObject> State<T> {
    pub fn new(name: &'static str, condition: ConditionTemplate) -> Self {
        Self { name, condition, transition: None }
    }

    pub fn with_transition(mut self, transition: impl Transition<T> + 'static) -> Self {
        self.transition = Some(Box::new(transition));
        self
    }
}

/// Seeds a root object for the `createIfNotFound` path (spec §4.6 step 1).
/// Returning `None` means the queue entry was stale and should be dropped
/// silently.
pub type CreateFn<T> = Box<dyn Fn(&str, &str) -> Option<T> + Send + Sync>;

// -----------------------------------------------------------------------------
// Fsm structure

/// The immutable state graph for one root kind, built once at controller
/// setup time (spec §3: "States are immutable, built at controller-setup
/// time").
pub struct Fsm<T: RootObject> {
    initial_state: &'static str,
    states: HashMap<&'static str, State<T>>,
    finalizer_state: Option<&'static str>,
    disable_ready_condition: bool,
    create_if_not_found: Option<CreateFn<T>>,
}

impl<T: RootObject> Fsm<T> {
    pub fn new(initial_state: &'static str) -> Self {
        Self {
            initial_state,
            states: HashMap::new(),
            finalizer_state: None,
            disable_ready_condition: false,
            create_if_not_found: None,
        }
    }

    pub fn with_state(mut self, state: State<T>) -> Self {
        self.states.insert(state.name, state);
        self
    }

    /// Declares a finalizer state: entered in place of `initial_state` once
    /// the object is being deleted, and whose successful completion removes
    /// the framework finalizer (spec §4.6 steps 3-4, 6).
    pub fn with_finalizer_state(mut self, name: &'static str) -> Self {
        self.finalizer_state = Some(name);
        self
    }

    pub fn disable_ready_condition(mut self) -> Self {
        self.disable_ready_condition = true;
        self
    }

    pub fn with_create_if_not_found(mut self, create_fn: CreateFn<T>) -> Self {
        self.create_if_not_found = Some(create_fn);
        self
    }
}

// -----------------------------------------------------------------------------
// Disposition: the driver's internal read of how a reconcile call ends

#[derive(Clone, Debug)]
enum Disposition {
    AwaitChange,
    RequeueAfter(std::time::Duration),
    Backoff(String),
}

fn summarize_unready<T: RootObject>(obj: &T) -> String {
    let unready: Vec<String> = obj
        .conditions()
        .iter()
        .filter(|c| c.type_ != READY_CONDITION_TYPE && c.status != ConditionStatus::True)
        .map(|c| format!("{}={}", c.type_, c.status))
        .collect();
    if unready.is_empty() {
        "one or more states did not complete".to_string()
    } else {
        format!("not ready: {}", unready.join(", "))
    }
}

// -----------------------------------------------------------------------------
// Driver structure

/// C6: drives one root kind's reconcile loop. Holds no per-request state;
/// safe to share across concurrent reconciles of different keys (spec §5's
/// per-key-only serialization guarantee).
pub struct Driver<T: RootObject, A: ApiOps = KubeApiOps> {
    fsm: Fsm<T>,
    reconciler: Reconciler<A>,
    metrics: Arc<MetricsSink>,
    processing: Arc<ProcessingIndex>,
    managed_kinds: Vec<ManagedKind>,
    api_resource: ApiResource,
    gvk: (String, String, String),
    client: Client,
    controller_name: String,
}

impl<T, A> Driver<T, A>
where
    T: RootObject + CustomResourceExt,
    T::DynamicType: Default,
    A: ApiOps,
{
    pub fn new(
        fsm: Fsm<T>,
        reconciler: Reconciler<A>,
        metrics: Arc<MetricsSink>,
        processing: Arc<ProcessingIndex>,
        managed_kinds: Vec<ManagedKind>,
        client: Client,
        controller_name: impl Into<String>,
    ) -> Self {
        let dt = T::DynamicType::default();
        let api_resource = ApiResource::erase::<T>(&dt);
        let gvk = (
            T::group(&dt).into_owned(),
            T::version(&dt).into_owned(),
            T::kind(&dt).into_owned(),
        );
        let driver = Self {
            fsm,
            reconciler,
            metrics,
            processing,
            managed_kinds,
            api_resource,
            gvk,
            client,
            controller_name: controller_name.into(),
        };
        driver.metrics.initialize_for_gvk(driver.gvk_ref());
        driver
    }

    fn gvk_ref(&self) -> Gvk<'_> {
        Gvk { group: &self.gvk.0, version: &self.gvk.1, kind: &self.gvk.2 }
    }

    /// `Reconcile(req)` (spec §4.6). `namespace`/`name` is the request key
    /// the controller builder (C9) derives from whatever triggered this
    /// reconcile; the object itself is always re-fetched here rather than
    /// reused from the trigger, matching "fetch the root object by req".
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, Error> {
        let gvk = self.gvk_ref();
        let applicator = self.reconciler.applicator();

        // Step 1: fetch.
        let dynamic = applicator
            .get(&self.api_resource, Some(namespace), name)
            .await
            .map_err(Error::Fetch)?;
        let dynamic = match dynamic {
            Some(dynamic) => dynamic,
            None => {
                if let Some(create_fn) = &self.fsm.create_if_not_found {
                    if let Some(seed) = create_fn(namespace, name) {
                        let seed_dynamic = to_dynamic(seed).map_err(Error::Output)?;
                        applicator
                            .create_if_absent(&self.api_resource, Some(namespace), &seed_dynamic)
                            .await
                            .map_err(Error::Fetch)?;
                    }
                    return Ok(Action::await_change());
                }
                self.metrics.delete_identity(gvk, namespace, name);
                return Ok(Action::await_change());
            }
        };

        let mut obj: T = from_dynamic(dynamic).map_err(Error::Output)?;
        let generation = obj.generation();
        let deleting = Resource::meta(&obj).deletion_timestamp.is_some();

        // Step 2: suspend.
        let suspended = labels::is_suspended(obj.labels());
        self.metrics.record_suspend(gvk, namespace, name, suspended);
        if suspended {
            debug!(namespace, name, "object suspended, skipping reconcile");
            return Ok(Action::await_change());
        }

        // Step 3: add the FSM finalizer.
        if self.fsm.finalizer_state.is_some()
            && !deleting
            && !obj.finalizers().iter().any(|f| f == labels::FSM_FINALIZER)
        {
            let mut finalizers = obj.finalizers().to_vec();
            finalizers.push(labels::FSM_FINALIZER.to_string());
            applicator
                .patch_finalizers(&self.api_resource, Some(namespace), name, &finalizers)
                .await
                .map_err(Error::Apply)?;
            *obj.finalizers_mut() = finalizers;
        }

        // Deletion with no finalizer state to run: the built-in sentinel
        // (spec §4.6 step 4's "or a built-in deleted sentinel"). Modeled as
        // a shortcut rather than a literal graph node, since its only
        // effect is exactly this condition.
        if deleting && self.fsm.finalizer_state.is_none() {
            let condition = Condition::new(READY_CONDITION_TYPE, ConditionStatus::False, Utc::now())
                .with_reason("Deleting")
                .with_message("object has no finalizer state to run before deletion")
                .with_observed_generation(generation);
            obj.set_condition(condition);
            self.metrics.record_condition(gvk, namespace, name, READY_CONDITION_TYPE, ConditionStatus::False, true);
            let out = OutputSet::new();
            self.reconciler
                .drain(&mut obj, &out, true, &self.managed_kinds)
                .await
                .map_err(Error::ApplyOutputs)?;
            return Ok(Action::await_change());
        }

        let initial = if deleting {
            self.fsm.finalizer_state.expect("checked above")
        } else {
            self.fsm.initial_state
        };

        // Step 5: walk the state graph.
        let mut out = OutputSet::new();
        let mut seen: HashSet<&'static str> = HashSet::new();
        let mut current = initial;
        let mut walk_succeeded = true;
        let mut disposition = Disposition::AwaitChange;
        let mut pending: Option<Disposition> = None;
        let now = Utc::now();

        loop {
            if !seen.insert(current) {
                let state = self.fsm.states.get(current).ok_or(Error::UnknownState(current))?;
                let message = format!("re-entered state {current:?}; state graphs must be a DAG");
                let condition = Condition::new(state.condition.type_, ConditionStatus::False, now)
                    .with_reason("StateLoop")
                    .with_message(message.clone())
                    .with_observed_generation(generation);
                obj.set_condition(condition.clone());
                self.metrics
                    .record_condition(gvk, namespace, name, &condition.type_, ConditionStatus::False, false);
                walk_succeeded = false;
                disposition = Disposition::Backoff(message);
                break;
            }

            let state = self.fsm.states.get(current).ok_or(Error::UnknownState(current))?;
            let (next, result) = match &state.transition {
                Some(transition) => {
                    let start = Instant::now();
                    let outcome = transition.run(&mut obj, &mut out).await;
                    self.metrics.record_state_duration(gvk, state.name, start.elapsed());
                    outcome
                }
                None => (None, TransitionResult::done()),
            };

            let is_done = result.is_done();
            let condition = result.custom_condition().cloned().unwrap_or_else(|| {
                let mut c = Condition::new(
                    state.condition.type_,
                    if is_done { ConditionStatus::True } else { ConditionStatus::False },
                    now,
                )
                .with_observed_generation(generation);
                if let Some(reason) = result.reason() {
                    c = c.with_reason(reason);
                }
                let message = result
                    .message()
                    .map(str::to_string)
                    .or_else(|| state.condition.message.map(str::to_string));
                if let Some(message) = message {
                    c = c.with_message(message);
                }
                c
            });
            obj.set_condition(condition.clone());
            self.metrics
                .record_condition(gvk, namespace, name, &condition.type_, condition.status, false);

            if is_done {
                self.reconciler
                    .drain(&mut obj, &out, deleting, &self.managed_kinds)
                    .await
                    .map_err(Error::ApplyOutputs)?;
            } else {
                walk_succeeded = false;
            }

            let this_disposition = if is_done {
                result.requeue_after_duration().map(Disposition::RequeueAfter)
            } else if let Some(message) = result.message() {
                Some(Disposition::Backoff(message.to_string()))
            } else if let Some(after) = result.requeue_after_duration() {
                Some(Disposition::RequeueAfter(after))
            } else {
                Some(Disposition::Backoff(result.reason().unwrap_or("not ready").to_string()))
            };

            if !is_done && !result.wants_requeue_after_completion() {
                disposition = this_disposition.expect("not-done result always has a disposition");
                break;
            }

            if let Some(d) = this_disposition {
                if is_done {
                    // Done-and-requeue: stop the walk now regardless of
                    // requeueAfterCompletion (spec §4.6 step 5, third bullet).
                    disposition = d;
                    break;
                }
                pending = Some(d);
            }

            match next {
                Some(n) => current = n,
                None => break,
            }
        }

        if let Some(d) = pending {
            disposition = d;
        }

        // Step 6: Ready roll-up + finalizer removal.
        if !self.fsm.disable_ready_condition {
            let ready_status = if walk_succeeded { ConditionStatus::True } else { ConditionStatus::False };
            let mut ready = Condition::new(READY_CONDITION_TYPE, ready_status, now).with_observed_generation(generation);
            if !walk_succeeded {
                ready = ready.with_message(summarize_unready(&obj));
            }
            obj.set_condition(ready);
            self.metrics.record_condition(gvk, namespace, name, READY_CONDITION_TYPE, ready_status, deleting);
        }

        if deleting && self.fsm.finalizer_state.is_some() && walk_succeeded {
            let finalizers: Vec<String> = obj
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != labels::FSM_FINALIZER)
                .cloned()
                .collect();
            applicator
                .patch_finalizers(&self.api_resource, Some(namespace), name, &finalizers)
                .await
                .map_err(Error::Apply)?;
            *obj.finalizers_mut() = finalizers;
            debug!(namespace, name, "removed fsm finalizer after successful deletion walk");
        }

        // Persist the final condition set (and any managed-ref drift) even
        // when this round produced no new outputs.
        self.reconciler
            .drain(&mut obj, &out, deleting, &self.managed_kinds)
            .await
            .map_err(Error::ApplyOutputs)?;

        // Step 7: processing-duration accounting.
        let start_times = self
            .processing
            .get_range(gvk.group, gvk.version, gvk.kind, namespace, name, generation, walk_succeeded);
        for start in start_times {
            let elapsed = (now - start).to_std().unwrap_or_default();
            self.metrics.record_processing_duration(gvk, walk_succeeded, elapsed);
        }
        if walk_succeeded {
            self.processing.delete_range(gvk.group, gvk.version, gvk.kind, namespace, name, generation);
        } else {
            self.processing.set_range_failed(gvk.group, gvk.version, gvk.kind, namespace, name, generation);
        }

        match disposition {
            Disposition::AwaitChange => Ok(Action::await_change()),
            Disposition::RequeueAfter(after) => Ok(Action::requeue(after)),
            Disposition::Backoff(message) => {
                warn!(namespace, name, message, "reconcile ending in backoff");
                // Spec §7: "no silent failures" — every terminal error is
                // observable in metrics and events, not just logs.
                if let Err(err) = recorder::warning(self.client.clone(), &self.metrics, gvk, &obj, &"ReconcileFailed", &message, &self.controller_name).await
                {
                    warn!(namespace, name, error = %err, "failed to publish reconcile-failure event");
                }
                Err(Error::Backoff(message))
            }
        }
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ManagedResourceRef;
    use crate::metrics::Disabled;
    use crate::output::applicator::Applicator;
    use async_trait::async_trait as async_trait_test;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    #[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
    #[kube(group = "infrared.reddit.com", version = "v1", kind = "Stub", namespaced, status = "StubStatus")]
    struct StubSpec {}

    #[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
    struct StubStatus {
        #[serde(default)]
        conditions: Vec<Condition>,
        #[serde(default, rename = "managedResourceRefs")]
        managed_resource_refs: Vec<ManagedResourceRef>,
    }

    impl RootObject for Stub {
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

    #[derive(Default)]
    struct FakeApiOps {
        objects: Mutex<StdHashMap<String, DynamicObject>>,
    }

    fn fake_key(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) => format!("{ns}/{name}"),
            None => name.to_string(),
        }
    }

    #[async_trait_test]
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

        async fn create_dry_run(
            &self,
            _api_resource: &ApiResource,
            _namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ApplyError> {
            Ok(obj.clone())
        }
    }

    fn seed_stub(fake: &FakeApiOps, name: &str) {
        let stub = Stub::new(name, StubSpec {});
        let mut dynamic = to_dynamic(stub).unwrap();
        dynamic.metadata.namespace = Some("default".to_string());
        dynamic.metadata.generation = Some(1);
        fake.objects.lock().unwrap().insert(fake_key(Some("default"), name), dynamic);
    }

    fn driver(fsm: Fsm<Stub>, fake: FakeApiOps) -> Driver<Stub, FakeApiOps> {
        let applicator = Applicator::new(fake);
        let reconciler = Reconciler::new(applicator);
        Driver::new(
            fsm,
            reconciler,
            Arc::new(MetricsSink::new(Disabled::default())),
            Arc::new(ProcessingIndex::new()),
            vec![],
            Client::try_from(kube::Config::new("https://example.invalid".parse().unwrap())).unwrap(),
            "stub",
        )
    }

    #[tokio::test]
    async fn missing_object_without_create_if_not_found_is_a_noop() {
        let fake = FakeApiOps::default();
        let fsm = Fsm::<Stub>::new("start").with_state(State::new("start", ConditionTemplate::new("Ready")));
        let d = driver(fsm, fake);
        let action = d.reconcile("default", "missing").await.unwrap();
        assert_eq!(format!("{action:?}"), format!("{:?}", Action::await_change()));
    }

    #[tokio::test]
    async fn single_terminal_state_marks_ready() {
        let fake = FakeApiOps::default();
        seed_stub(&fake, "a");
        let fsm = Fsm::<Stub>::new("start").with_state(State::new("start", ConditionTemplate::new("Provisioned")));
        let d = driver(fsm, fake);
        d.reconcile("default", "a").await.unwrap();

        let stored = d
            .reconciler
            .applicator()
            .get(&d.api_resource, Some("default"), "a")
            .await
            .unwrap()
            .unwrap();
        let stub: Stub = from_dynamic(stored).unwrap();
        let ready = stub.conditions().iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn re_entering_a_state_name_backs_off() {
        let fake = FakeApiOps::default();
        seed_stub(&fake, "loop");
        let fsm = Fsm::<Stub>::new("a")
            .with_state(
                State::new("a", ConditionTemplate::new("A")).with_transition(|_obj: &mut Stub, _out: &mut OutputSet| async {
                    (Some("b"), TransitionResult::done())
                }),
            )
            .with_state(
                State::new("b", ConditionTemplate::new("B")).with_transition(|_obj: &mut Stub, _out: &mut OutputSet| async {
                    (Some("a"), TransitionResult::done())
                }),
            );
        let d = driver(fsm, fake);
        let err = d.reconcile("default", "loop").await.unwrap_err();
        assert!(matches!(err, Error::Backoff(_)));
    }

    #[tokio::test]
    async fn not_done_without_requeue_after_stops_the_walk_and_backs_off() {
        let fake = FakeApiOps::default();
        seed_stub(&fake, "waiting");
        let fsm = Fsm::<Stub>::new("a").with_state(
            State::new("a", ConditionTemplate::new("A")).with_transition(|_obj: &mut Stub, _out: &mut OutputSet| async {
                (None, TransitionResult::requeue_backoff().with_reason("WaitingForDependency"))
            }),
        );
        let d = driver(fsm, fake);
        let err = d.reconcile("default", "waiting").await.unwrap_err();
        assert!(matches!(err, Error::Backoff(_)));
    }
}
