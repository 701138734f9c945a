//! # achilles
//!
//! A framework for building Kubernetes custom-resource controllers as
//! explicit finite-state machines (spec §0-§9). Consumers declare a root
//! kind's capabilities ([`capability::RootObject`]), describe its state
//! graph ([`fsm::Fsm`]/[`fsm::State`]), and wire it into a
//! [`kube::runtime::Controller`] through [`builder::ControllerSet`]; the
//! framework takes care of condition bookkeeping, managed-child
//! reconciliation, metrics and event emission.
//!
//! `demo` (the `Workload` CRD and its claim pair) is intentionally not
//! re-exported here: it exists only to exercise the framework end to end
//! from `main.rs`, not as part of the library's public surface.

pub mod builder;
pub mod capability;
pub mod claim;
pub mod client;
pub mod config;
pub mod events;
pub mod fsm;
pub mod http;
pub mod identity;
pub mod labels;
pub mod leader;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod processing;
pub mod recorder;

#[doc(hidden)]
pub mod demo;
