//! # Controller builder module
//!
//! Implements C9: wires a root kind, its managed/related kinds, and a
//! reconciler together into a [`kube::runtime::Controller`], the way the
//! teacher's `ControllerBuilder<T>`/`Reconciler<T>`/`Watcher<T>` trio does
//! in `svc/k8s/mod.rs` — generalized from "one hand-written reconcile
//! function per CRD" into "any [`KeyReconciler`] over any watched kind".
//!
//! Spec §2 marks the client, cache, watch informers and the reconcile
//! queue's rate limiting as external collaborators this framework assumes
//! rather than redesigns ("OUT OF SCOPE: ... a rate-limited reconcile
//! queue"); what's left for C9 to actually build is the wiring between a
//! [`Driver`](crate::fsm::Driver) or [`ClaimReconciler`](crate::claim::ClaimReconciler)
//! and [`Controller::run`]'s reconcile/error_policy/context triple, plus the
//! watch mapper closures spec §4.5 says install [`EventObserver::observe`]
//! calls.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use kube::{
    api::Api,
    core::ObjectRef,
    runtime::{
        controller::{trigger_self, Action},
        reflector::{reflector, store},
        watcher, Controller, WatchStreamExt,
    },
    CustomResourceExt, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::capability::{Claimed, RootObject};
use crate::claim::{self, Claim, ClaimReconciler};
use crate::events::{EventObserver, TriggerType, WatchEvent};
use crate::fsm::{self, Driver};
use crate::metrics::{Gvk, MetricsSink};
use crate::output::applicator::ApiOps;
use crate::processing::ProcessingIndex;

// -----------------------------------------------------------------------------
// KeyReconciler trait

/// Abstracts "drive one reconcile by namespace/name" over both the FSM
/// driver (C6, keyed on the root kind it watches) and the claim reconciler
/// (C8, keyed on the claim kind). [`ControllerSet`] is generic over this
/// trait rather than over `Driver`/`ClaimReconciler` directly so the same
/// wiring code serves both.
#[async_trait]
pub trait KeyReconciler<T>: Send + Sync
where
    T: Resource + ResourceExt + Send + Sync,
{
    type Error: std::error::Error + Send + Sync + 'static;

    async fn reconcile_key(&self, namespace: &str, name: &str) -> Result<Action, Self::Error>;
}

#[async_trait]
impl<T, A> KeyReconciler<T> for Driver<T, A>
where
    T: RootObject + CustomResourceExt,
    T::DynamicType: Default,
    A: ApiOps,
{
    type Error = fsm::Error;

    async fn reconcile_key(&self, namespace: &str, name: &str) -> Result<Action, Self::Error> {
        self.reconcile(namespace, name).await
    }
}

#[async_trait]
impl<C, K, A> KeyReconciler<C> for ClaimReconciler<C, K, A>
where
    C: Claim + CustomResourceExt,
    C::DynamicType: Default,
    K: Claimed + Default,
    K::DynamicType: Default,
    A: ApiOps,
{
    type Error = claim::Error;

    async fn reconcile_key(&self, namespace: &str, name: &str) -> Result<Action, Self::Error> {
        self.reconcile(namespace, name).await
    }
}

// -----------------------------------------------------------------------------
// Backoff

/// Per-key exponential backoff for reconcile errors (spec §3: "error results
/// requeue with exponential backoff"). Spec §2 treats the host's rate-limited
/// queue as an external collaborator the framework doesn't redesign; this is
/// the minimal bookkeeping `error_policy` needs to honor that contract when
/// `kube_runtime::Controller` itself has no such queue built in. Base and cap
/// match client-go's default controller rate limiter order of magnitude.
struct Backoff {
    base: Duration,
    max: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    fn new() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn next_delay(&self, namespace: &str, name: &str) -> Duration {
        let key = format!("{namespace}/{name}");
        let mut attempts = self.attempts.lock().unwrap();
        let entry = attempts.entry(key).or_insert(0);
        let delay = self.base.saturating_mul(1u32.checked_shl(*entry).unwrap_or(u32::MAX)).min(self.max);
        *entry = entry.saturating_add(1);
        delay
    }

    fn reset(&self, namespace: &str, name: &str) {
        self.attempts.lock().unwrap().remove(&format!("{namespace}/{name}"));
    }
}

// -----------------------------------------------------------------------------
// ControllerContext

struct ControllerContext<T, R> {
    reconciler: R,
    backoff: Backoff,
    controller_name: String,
    _marker: PhantomData<fn() -> T>,
}

async fn reconcile<T, R>(obj: Arc<T>, ctx: Arc<ControllerContext<T, R>>) -> Result<Action, R::Error>
where
    T: Resource + ResourceExt + Send + Sync + 'static,
    R: KeyReconciler<T>,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let result = ctx.reconciler.reconcile_key(&namespace, &name).await;
    if result.is_ok() {
        ctx.backoff.reset(&namespace, &name);
    }
    result
}

fn error_policy<T, R>(obj: Arc<T>, err: &R::Error, ctx: Arc<ControllerContext<T, R>>) -> Action
where
    T: Resource + ResourceExt + Send + Sync + 'static,
    R: KeyReconciler<T>,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let delay = ctx.backoff.next_delay(&namespace, &name);
    warn!(
        controller = %ctx.controller_name,
        namespace,
        name,
        error = %err,
        delay_ms = delay.as_millis() as u64,
        "reconcile failed, requeueing with backoff",
    );
    Action::requeue(delay)
}

// -----------------------------------------------------------------------------
// ControllerSet

/// C9: one watched root kind `T`, driven by reconciler `R`, plus whatever
/// owned/related kinds were registered with [`Self::owns`]/[`Self::watches`].
/// Mirrors the shape of the teacher's `Watcher<T>::watch` loop, but the
/// reconcile/error_policy pair is generic over [`KeyReconciler`] instead of
/// being hand-written per CRD.
pub struct ControllerSet<T, R>
where
    T: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T::DynamicType: Eq + Hash + Clone + Debug + Default + Unpin + Send + Sync,
    R: KeyReconciler<T> + 'static,
{
    controller: Controller<T>,
    context: Arc<ControllerContext<T, R>>,
    metrics: Arc<MetricsSink>,
    index: Arc<ProcessingIndex>,
    gvk: (String, String, String),
}

impl<T, R> ControllerSet<T, R>
where
    T: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T::DynamicType: Eq + Hash + Clone + Debug + Default + Unpin + Send + Sync,
    R: KeyReconciler<T> + 'static,
{
    pub fn new(
        api: Api<T>,
        watcher_config: watcher::Config,
        reconciler: R,
        metrics: Arc<MetricsSink>,
        index: Arc<ProcessingIndex>,
        controller_name: impl Into<String>,
    ) -> Self {
        let dt = T::DynamicType::default();
        let gvk = (
            T::group(&dt).into_owned(),
            T::version(&dt).into_owned(),
            T::kind(&dt).into_owned(),
        );
        let controller_name = controller_name.into();

        // Spec §4.5: the primary watch's Self_ observation (trigger metric +
        // ProcessingIndex.Set) must run for every event, same as `.owns`/
        // `.watches` below install in their own mapper closures.
        // `Controller::new` gives no hook into its internal primary trigger,
        // so it's built by hand here: reflect the watch ourselves and tap
        // every applied object before `trigger_self` collapses the stream
        // down to reconcile requests.
        let (reader, writer) = store();
        let reflected = reflector(writer, watcher(api, watcher_config));

        let observed_gvk = gvk.clone();
        let observed_metrics = metrics.clone();
        let observed_index = index.clone();
        let observed_controller = controller_name.clone();
        let observed = reflected.applied_objects().inspect_ok(move |obj: &T| {
            let observer = EventObserver::new(&observed_metrics, &observed_index, &observed_controller);
            let namespace = obj.namespace().unwrap_or_default();
            let name = obj.name_any();
            observer.observe(
                Gvk { group: &observed_gvk.0, version: &observed_gvk.1, kind: &observed_gvk.2 },
                WatchEvent::Generic,
                TriggerType::Self_,
                &namespace,
                &name,
                obj.meta().generation,
            );
        });

        let trigger = trigger_self(observed, dt);

        Self {
            controller: Controller::for_stream(trigger, reader),
            context: Arc::new(ControllerContext {
                reconciler,
                backoff: Backoff::new(),
                controller_name,
                _marker: PhantomData,
            }),
            metrics,
            index,
            gvk,
        }
    }

    /// Registers a "Child" trigger (spec §3's `TriggerType`): objects of
    /// `Child` carrying a controller owner reference to `T` enqueue their
    /// owner. `Controller::owns` already does the watch-and-map itself, but
    /// gives us no hook to call [`EventObserver::observe`] from, so this
    /// reimplements the owner-reference mapping with `Controller::watches`
    /// instead, installing the observer call spec §4.5 requires.
    pub fn owns<Child>(mut self, api: Api<Child>, watcher_config: watcher::Config) -> Self
    where
        Child: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let gvk = self.gvk.clone();
        let metrics = self.metrics.clone();
        let index = self.index.clone();
        let controller_name = self.context.controller_name.clone();

        self.controller = self.controller.watches(api, watcher_config, move |child: Child| {
            let owner = child
                .owner_references()
                .iter()
                .find(|o| o.controller == Some(true) && o.kind == gvk.2)?
                .clone();
            let namespace = child.namespace().unwrap_or_default();

            let observer = EventObserver::new(&metrics, &index, &controller_name);
            observer.observe(
                Gvk { group: &gvk.0, version: &gvk.1, kind: &gvk.2 },
                WatchEvent::Generic,
                TriggerType::Child,
                &namespace,
                &owner.name,
                None,
            );

            Some(ObjectRef::<T>::new(&owner.name).within(&namespace))
        });
        self
    }

    /// Registers a "Relative" trigger (spec §3's `TriggerType`): `mapper`
    /// computes the set of `T` request keys a `Watched` event should wake,
    /// with no owner-reference relationship assumed.
    pub fn watches<Watched, I>(mut self, api: Api<Watched>, watcher_config: watcher::Config, mapper: impl Fn(&Watched) -> I + Send + Sync + 'static) -> Self
    where
        Watched: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        I: IntoIterator<Item = (String, String)>,
    {
        let gvk = self.gvk.clone();
        let metrics = self.metrics.clone();
        let index = self.index.clone();
        let controller_name = self.context.controller_name.clone();

        self.controller = self.controller.watches(api, watcher_config, move |watched: Watched| {
            let keys: Vec<(String, String)> = mapper(&watched).into_iter().collect();
            let observer = EventObserver::new(&metrics, &index, &controller_name);
            for (namespace, name) in &keys {
                observer.observe(
                    Gvk { group: &gvk.0, version: &gvk.1, kind: &gvk.2 },
                    WatchEvent::Generic,
                    TriggerType::Relative,
                    namespace,
                    name,
                    None,
                );
            }
            keys.into_iter().map(|(namespace, name)| ObjectRef::<T>::new(&name).within(&namespace))
        });
        self
    }

    /// Runs the controller to completion, matching the teacher's
    /// `Watcher::watch` loop shape (consume the stream, log + count each
    /// result) but delegating reconcile/error_policy to `R` instead of a
    /// per-CRD hand-written pair.
    pub fn run(self) -> impl Stream<Item = Result<(ObjectRef<T>, Action), kube::runtime::controller::Error<R::Error, watcher::Error>>> {
        let gvk = self.gvk.clone();
        info!(group = %gvk.0, version = %gvk.1, kind = %gvk.2, "starting controller");
        self.controller.run(reconcile, error_policy, self.context)
    }
}
