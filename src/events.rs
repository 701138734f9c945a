//! # Event-observation layer module
//!
//! Implements C5: the thin wrapper every watch registration passes its
//! incoming events through before they reach the reconcile queue. Go's
//! `workqueue.Interface` gives the original design something concrete to
//! wrap; `kube_runtime::Controller` instead exposes `.owns`/`.watches` as
//! mapper closures, so here the "wrapped queue" becomes
//! [`EventObserver::observe`], called from inside the mapper the
//! controller builder (C9) installs at each watch site.

use chrono::Utc;

use crate::capability::ManagedResourceRef;
use crate::metrics::{Gvk, MetricsSink};
use crate::processing::ProcessingIndex;

/// Classification of what caused an enqueue (spec §3, §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerType {
    /// An event on the reconciled kind itself.
    Self_,
    /// An event propagated via a controller-owner reference.
    Child,
    /// An event whose request set was computed by a user-supplied mapping
    /// function.
    Relative,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Self_ => "self",
            Self::Child => "child",
            Self::Relative => "relative",
        }
    }
}

/// The four Kubernetes watch event kinds a trigger metric distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Create,
    Update,
    Delete,
    Generic,
}

impl WatchEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Generic => "generic",
        }
    }
}

/// C5: observes one incoming event before it is forwarded to the
/// reconcile queue.
pub struct EventObserver<'a> {
    metrics: &'a MetricsSink,
    index: &'a ProcessingIndex,
    controller: &'a str,
}

impl<'a> EventObserver<'a> {
    pub fn new(metrics: &'a MetricsSink, index: &'a ProcessingIndex, controller: &'a str) -> Self {
        Self { metrics, index, controller }
    }

    /// Called once per incoming event, before forwarding the derived
    /// reconcile request to the underlying queue.
    ///
    /// `self_generation` is the generation of the object the event carried,
    /// required when `trigger_type == Self_` to seed the processing-time
    /// index; callers for `Child`/`Relative` triggers may pass `None`.
    pub fn observe(
        &self,
        gvk: Gvk<'_>,
        watch_event: WatchEvent,
        trigger_type: TriggerType,
        req_namespace: &str,
        req_name: &str,
        self_generation: Option<i64>,
    ) {
        self.metrics.record_trigger(
            gvk,
            req_namespace,
            req_name,
            watch_event.as_str(),
            trigger_type,
            self.controller,
        );

        tracing::debug!(
            group = gvk.group,
            version = gvk.version,
            kind = gvk.kind,
            req_namespace,
            req_name,
            event = watch_event.as_str(),
            trigger_type = trigger_type.as_str(),
            controller = self.controller,
            "observed event"
        );

        if trigger_type == TriggerType::Self_ {
            if let Some(generation) = self_generation {
                self.index.set(gvk.group, gvk.version, gvk.kind, req_namespace, req_name, generation, Utc::now());
            }
        }
    }
}

/// Derives the `ManagedResourceRef` a `child`-triggered event refers to,
/// used by the controller builder (C9) when mapping an owned object's
/// event back to its owner's request key for logging/metrics purposes.
pub fn managed_ref_of(gvk: Gvk<'_>, namespace: &str, name: &str) -> ManagedResourceRef {
    ManagedResourceRef::new(gvk.group, gvk.version, gvk.kind, namespace, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Disabled;

    fn gvk() -> Gvk<'static> {
        Gvk { group: "infrared.reddit.com", version: "v1", kind: "Workload" }
    }

    #[test]
    fn self_trigger_seeds_the_processing_index() {
        let metrics = MetricsSink::new(Disabled::default());
        let index = ProcessingIndex::new();
        let observer = EventObserver::new(&metrics, &index, "workload-controller");

        observer.observe(gvk(), WatchEvent::Update, TriggerType::Self_, "default", "x", Some(3));
        let times = index.get_range("infrared.reddit.com", "v1", "Workload", "default", "x", 3, true);
        assert_eq!(times.len(), 1);
    }

    #[test]
    fn child_trigger_does_not_touch_the_processing_index() {
        let metrics = MetricsSink::new(Disabled::default());
        let index = ProcessingIndex::new();
        let observer = EventObserver::new(&metrics, &index, "workload-controller");

        observer.observe(gvk(), WatchEvent::Update, TriggerType::Child, "default", "x", None);
        let times = index.get_range("infrared.reddit.com", "v1", "Workload", "default", "x", 3, true);
        assert!(times.is_empty());
    }
}
