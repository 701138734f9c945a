//! # Metrics sink module
//!
//! Implements C4: the prometheus-backed families counters/gauges/
//! histograms record against, gated behind the `metrics` feature the same
//! way the teacher gates `kubernetes_operator_reconciliation_*` in
//! `svc::k8s::mod`. When the feature is off every recording method is a
//! no-op, so callers (C5, C6, C7) never need their own `#[cfg(...)]`.

#[cfg(feature = "metrics")]
use std::sync::LazyLock;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec, HistogramVec};

use crate::capability::ConditionStatus;
use crate::events::TriggerType;

#[cfg(feature = "metrics")]
static TRIGGER: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        opts!("achilles_trigger", "number of observed events that enqueued a reconcile"),
        &["group", "version", "kind", "req_namespace", "req_name", "event", "trigger_type", "controller"]
    )
    .expect("metrics 'achilles_trigger' to not be already registered")
});

#[cfg(feature = "metrics")]
static READINESS: LazyLock<GaugeVec> = LazyLock::new(|| {
    register_gauge_vec!(
        opts!("achilles_resource_readiness", "one gauge series per possible condition status value"),
        &["group", "version", "kind", "namespace", "name", "type", "status"]
    )
    .expect("metrics 'achilles_resource_readiness' to not be already registered")
});

#[cfg(feature = "metrics")]
static STATE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "achilles_state_duration_seconds",
        "time spent executing one state's transition function",
        &["group", "version", "kind", "state"]
    )
    .expect("metrics 'achilles_state_duration_seconds' to not be already registered")
});

#[cfg(feature = "metrics")]
static PROCESSING_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "achilles_processing_duration_seconds",
        "time from first observation of a generation to reconcile completion",
        &["group", "version", "kind", "success"]
    )
    .expect("metrics 'achilles_processing_duration_seconds' to not be already registered")
});

#[cfg(feature = "metrics")]
static SUSPEND: LazyLock<GaugeVec> = LazyLock::new(|| {
    register_gauge_vec!(
        opts!("achilles_object_suspended", "1 while the suspend label is present and non-empty"),
        &["group", "version", "kind", "namespace", "name"]
    )
    .expect("metrics 'achilles_object_suspended' to not be already registered")
});

#[cfg(feature = "metrics")]
static EVENT: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        opts!("achilles_event", "number of Kubernetes Events emitted"),
        &["group", "version", "kind", "obj_namespace", "obj_name", "event_type", "reason", "controller"]
    )
    .expect("metrics 'achilles_event' to not be already registered")
});

const READINESS_STATUSES: [&str; 4] = ["True", "False", "Unknown", "Deleted"];

/// Per-metric disable flags (spec §4.4: "per-metric disable flags are
/// honored").
#[derive(Clone, Copy, Default, Debug)]
pub struct Disabled {
    pub trigger: bool,
    pub readiness: bool,
    pub state_duration: bool,
    pub processing_duration: bool,
    pub suspend: bool,
    pub event: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct Gvk<'a> {
    pub group: &'a str,
    pub version: &'a str,
    pub kind: &'a str,
}

type Identity = (String, String, String, String, String);

/// C4: the shared metrics sink. Construct once per process and share it
/// (by reference or `Arc`) across every controller the builder (C9) wires
/// up — spec §5 calls this shared-by-all-controllers, internally
/// synchronized at the collector's own label-set granularity, which is
/// exactly what `CounterVec`/`GaugeVec`/`HistogramVec` already provide; the
/// only state this type owns itself is the bookkeeping needed for
/// `InitializeForGVK` and cardinality-bounding deletes.
#[derive(Default)]
pub struct MetricsSink {
    disabled: Disabled,
    initialized_gvks: Mutex<HashSet<(String, String, String)>>,
    condition_types_seen: Mutex<HashMap<Identity, HashSet<String>>>,
}

impl MetricsSink {
    pub fn new(disabled: Disabled) -> Self {
        Self {
            disabled,
            initialized_gvks: Mutex::new(HashSet::new()),
            condition_types_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Must be called during controller setup before `record_processing_duration`
    /// will emit anything for `gvk`.
    pub fn initialize_for_gvk(&self, gvk: Gvk<'_>) {
        self.initialized_gvks
            .lock()
            .unwrap()
            .insert((gvk.group.to_string(), gvk.version.to_string(), gvk.kind.to_string()));
    }

    pub fn record_trigger(&self, gvk: Gvk<'_>, req_namespace: &str, req_name: &str, event: &str, trigger_type: TriggerType, controller: &str) {
        if self.disabled.trigger {
            return;
        }
        #[cfg(feature = "metrics")]
        TRIGGER
            .with_label_values(&[gvk.group, gvk.version, gvk.kind, req_namespace, req_name, event, trigger_type.as_str(), controller])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, req_namespace, req_name, event, trigger_type, controller);
    }

    /// Writes one sample per possible status value; exactly one is `1`. When
    /// `deleting` is true the `Deleted` series receives `1` regardless of
    /// `status`.
    pub fn record_condition(&self, gvk: Gvk<'_>, namespace: &str, name: &str, type_: &str, status: ConditionStatus, deleting: bool) {
        if self.disabled.readiness {
            return;
        }
        let identity = (
            gvk.group.to_string(),
            gvk.version.to_string(),
            gvk.kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        self.condition_types_seen
            .lock()
            .unwrap()
            .entry(identity)
            .or_default()
            .insert(type_.to_string());

        let effective = if deleting {
            "Deleted"
        } else {
            match status {
                ConditionStatus::True => "True",
                ConditionStatus::False => "False",
                ConditionStatus::Unknown => "Unknown",
            }
        };
        #[cfg(feature = "metrics")]
        for candidate in READINESS_STATUSES {
            let value = if candidate == effective { 1.0 } else { 0.0 };
            READINESS
                .with_label_values(&[gvk.group, gvk.version, gvk.kind, namespace, name, type_, candidate])
                .set(value);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, namespace, name, type_, effective);
    }

    pub fn record_state_duration(&self, gvk: Gvk<'_>, state: &str, duration: Duration) {
        if self.disabled.state_duration {
            return;
        }
        #[cfg(feature = "metrics")]
        STATE_DURATION
            .with_label_values(&[gvk.group, gvk.version, gvk.kind, state])
            .observe(duration.as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, state, duration);
    }

    /// Returns `false` without recording if `initialize_for_gvk` was never
    /// called for this kind.
    pub fn record_processing_duration(&self, gvk: Gvk<'_>, success: bool, duration: Duration) -> bool {
        if self.disabled.processing_duration {
            return true;
        }
        let initialized = self
            .initialized_gvks
            .lock()
            .unwrap()
            .contains(&(gvk.group.to_string(), gvk.version.to_string(), gvk.kind.to_string()));
        if !initialized {
            return false;
        }
        #[cfg(feature = "metrics")]
        PROCESSING_DURATION
            .with_label_values(&[gvk.group, gvk.version, gvk.kind, if success { "true" } else { "false" }])
            .observe(duration.as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, success, duration);
        true
    }

    pub fn record_suspend(&self, gvk: Gvk<'_>, namespace: &str, name: &str, suspended: bool) {
        if self.disabled.suspend {
            return;
        }
        #[cfg(feature = "metrics")]
        SUSPEND
            .with_label_values(&[gvk.group, gvk.version, gvk.kind, namespace, name])
            .set(if suspended { 1.0 } else { 0.0 });
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, namespace, name, suspended);
    }

    pub fn record_event(&self, gvk: Gvk<'_>, obj_namespace: &str, obj_name: &str, event_type: &str, reason: &str, controller: &str) {
        if self.disabled.event {
            return;
        }
        #[cfg(feature = "metrics")]
        EVENT
            .with_label_values(&[gvk.group, gvk.version, gvk.kind, obj_namespace, obj_name, event_type, reason, controller])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, obj_namespace, obj_name, event_type, reason, controller);
    }

    /// Spec §4.6 step 1: when a root object is gone and `createIfNotFound`
    /// doesn't apply, delete every metric keyed by its identity so
    /// cardinality doesn't grow unbounded for objects that no longer exist.
    pub fn delete_identity(&self, gvk: Gvk<'_>, namespace: &str, name: &str) {
        let identity = (
            gvk.group.to_string(),
            gvk.version.to_string(),
            gvk.kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        let condition_types = self
            .condition_types_seen
            .lock()
            .unwrap()
            .remove(&identity)
            .unwrap_or_default();

        #[cfg(feature = "metrics")]
        {
            for type_ in &condition_types {
                for status in READINESS_STATUSES {
                    let _ = READINESS.remove_label_values(&[gvk.group, gvk.version, gvk.kind, namespace, name, type_, status]);
                }
            }
            let _ = SUSPEND.remove_label_values(&[gvk.group, gvk.version, gvk.kind, namespace, name]);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (gvk, namespace, name, condition_types);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvk() -> Gvk<'static> {
        Gvk { group: "infrared.reddit.com", version: "v1", kind: "Workload" }
    }

    #[test]
    fn processing_duration_requires_initialization() {
        let sink = MetricsSink::new(Disabled::default());
        assert!(!sink.record_processing_duration(gvk(), true, Duration::from_secs(1)));
        sink.initialize_for_gvk(gvk());
        assert!(sink.record_processing_duration(gvk(), true, Duration::from_secs(1)));
    }

    #[test]
    fn disabled_flags_are_honored() {
        let sink = MetricsSink::new(Disabled { trigger: true, ..Default::default() });
        // Should not panic even with the registry untouched; absence of a
        // panic here is the assertion, since record_trigger returns nothing.
        sink.record_trigger(gvk(), "default", "x", "create", TriggerType::Self_, "workload-controller");
    }

    #[test]
    fn delete_identity_forgets_tracked_condition_types() {
        let sink = MetricsSink::new(Disabled::default());
        sink.record_condition(gvk(), "default", "x", "Ready", ConditionStatus::True, false);
        assert!(sink.condition_types_seen.lock().unwrap().contains_key(&(
            "infrared.reddit.com".to_string(),
            "v1".to_string(),
            "Workload".to_string(),
            "default".to_string(),
            "x".to_string(),
        )));
        sink.delete_identity(gvk(), "default", "x");
        assert!(!sink.condition_types_seen.lock().unwrap().contains_key(&(
            "infrared.reddit.com".to_string(),
            "v1".to_string(),
            "Workload".to_string(),
            "default".to_string(),
            "x".to_string(),
        )));
    }
}
