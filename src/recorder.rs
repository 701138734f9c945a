//! # Event recorder module
//!
//! Publishes Kubernetes `core/v1/Event` objects the way the teacher's
//! `svc/k8s/recorder/{mod.rs, event.rs}` does, extended to also record the
//! `achilles_event` metric ([`MetricsSink::record_event`]) at the same call
//! site so a controller author gets both observability channels from one
//! call instead of having to remember the second.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectReference, Time};
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, CustomResourceExt, Resource, ResourceExt};
use tracing::debug;

use crate::metrics::{Gvk, MetricsSink};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse '{0}', available options are 'normal' or 'warning'")]
    Parse(String),
    #[error("failed to publish event, {0}")]
    Publish(#[source] kube::Error),
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Level {
    Warning,
    Normal,
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(Self::Warning),
            "normal" => Ok(Self::Normal),
            _ => Err(Error::Parse(s.to_string())),
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "Warning"),
            Self::Normal => write!(f, "Normal"),
        }
    }
}

fn source() -> EventSource {
    let host = hostname::get().ok().map(|host| host.to_string_lossy().to_string());
    EventSource { component: Some("achilles".to_string()), host }
}

fn object_reference<T>(obj: &T) -> ObjectReference
where
    T: ResourceExt + CustomResourceExt,
{
    let api_resource = T::api_resource();
    ObjectReference {
        api_version: Some(api_resource.api_version),
        kind: Some(api_resource.kind),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        resource_version: obj.resource_version(),
        uid: obj.uid(),
        ..Default::default()
    }
}

fn new_event<T, U>(obj: &T, level: Level, reason: &U, message: &str) -> Event
where
    T: ResourceExt + CustomResourceExt,
    U: ToString,
{
    let now = Utc::now();
    Event {
        metadata: ObjectMeta {
            namespace: obj.namespace(),
            name: Some(format!("{}-{}-{}", obj.name_any(), reason.to_string().to_lowercase(), now.timestamp())),
            ..Default::default()
        },
        type_: Some(level.to_string()),
        action: Some(reason.to_string()),
        count: Some(1),
        event_time: Some(MicroTime(now)),
        first_timestamp: Some(Time(now)),
        involved_object: object_reference(obj),
        last_timestamp: Some(Time(now)),
        message: Some(message.to_string()),
        reason: Some(reason.to_string()),
        reporting_component: Some("achilles".to_string()),
        reporting_instance: Some(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        series: None,
        source: Some(source()),
        ..Default::default()
    }
}

/// Publishes an Event for `obj` and records the `achilles_event` metric.
/// `controller` is the name under which the reconciler was registered
/// (spec §4's `controller` label on emitted metrics).
pub async fn record<T, U>(client: Client, metrics: &MetricsSink, gvk: Gvk<'_>, obj: &T, level: Level, reason: &U, message: &str, controller: &str) -> Result<Event, Error>
where
    T: Resource + ResourceExt + CustomResourceExt,
    U: ToString,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    debug!(namespace, name, reason = %reason.to_string(), message, "publishing event");

    let event = new_event(obj, level, reason, message);
    let created = Api::namespaced(client, &namespace).create(&PostParams::default(), &event).await.map_err(Error::Publish)?;

    metrics.record_event(gvk, &namespace, &name, &level.to_string(), &reason.to_string(), controller);

    Ok(created)
}

pub async fn normal<T, U>(client: Client, metrics: &MetricsSink, gvk: Gvk<'_>, obj: &T, reason: &U, message: &str, controller: &str) -> Result<Event, Error>
where
    T: Resource + ResourceExt + CustomResourceExt,
    U: ToString,
{
    record(client, metrics, gvk, obj, Level::Normal, reason, message, controller).await
}

pub async fn warning<T, U>(client: Client, metrics: &MetricsSink, gvk: Gvk<'_>, obj: &T, reason: &U, message: &str, controller: &str) -> Result<Event, Error>
where
    T: Resource + ResourceExt + CustomResourceExt,
    U: ToString,
{
    record(client, metrics, gvk, obj, Level::Warning, reason, message, controller).await
}
