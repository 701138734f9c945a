//! # achillesd
//!
//! The binary entrypoint: parses spec §6's flags, bootstraps the
//! Kubernetes client, logging and HTTP listeners, then wires the
//! illustrative `Workload`/`WorkloadClaim`/`ClaimedWorkload` controllers
//! (see [`achilles::demo`]) into a [`kube::runtime::Controller`] apiece via
//! [`achilles::builder::ControllerSet`]. Grounded on the teacher's
//! `cmd::daemon` (spawn-per-reconciler-task, `ctrl_c()`-triggered abort+join
//! shutdown) with the structopt/clevercloud-sdk specifics replaced by this
//! framework's own flags and CRDs.

use std::pin::Pin;
use std::sync::Arc;

use achilles::builder::ControllerSet;
use achilles::capability::ManagedKind;
use achilles::claim::ClaimReconciler;
use achilles::client::{self, ClientOptions};
use achilles::config::Args;
use achilles::demo::{self, ClaimedWorkload, Workload, WorkloadClaim};
use achilles::fsm::Driver;
use achilles::http;
use achilles::identity::{self, AppIdentity};
use achilles::leader::LeaderGuard;
use achilles::logging;
use achilles::metrics::{Disabled, MetricsSink};
use achilles::output::applicator::{Applicator, KubeApiOps};
use achilles::output::reconciler::Reconciler;
use achilles::processing::ProcessingIndex;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("failed to initialize logging, {0}")]
    Logging(#[source] logging::Error),
    #[error("failed to build kubernetes client, {0}")]
    Client(#[source] client::Error),
    #[error("leader election failed, {0}")]
    Leader(#[source] achilles::leader::Error),
}

/// Runs the three demo controllers (spec §9's worked example) concurrently
/// until cancelled. Each [`ControllerSet`] owns its reconcile loop; we only
/// drain the resulting streams and log per-item errors the way the
/// teacher's `cmd::daemon` logs a failed executor run.
async fn run_controllers(client: Client, metrics: Arc<MetricsSink>, processing: Arc<ProcessingIndex>) {
    let workload_driver = Driver::<Workload, KubeApiOps>::new(
        demo::fsm(),
        Reconciler::new(Applicator::new(KubeApiOps::new(client.clone()))),
        metrics.clone(),
        processing.clone(),
        demo::managed_kinds(),
        client.clone(),
        "workload",
    );
    let workload_controller = ControllerSet::new(
        Api::<Workload>::all(client.clone()),
        watcher::Config::default(),
        workload_driver,
        metrics.clone(),
        processing.clone(),
        "workload",
    )
    .owns::<ConfigMap>(Api::all(client.clone()), watcher::Config::default())
    .run()
    .for_each(|res| async move {
        if let Err(err) = res {
            error!(error = %err, "workload controller iteration failed");
        }
    });

    let claimed_driver = Driver::<ClaimedWorkload, KubeApiOps>::new(
        demo::claimed_fsm(),
        Reconciler::new(Applicator::new(KubeApiOps::new(client.clone()))),
        metrics.clone(),
        processing.clone(),
        Vec::<ManagedKind>::new(),
        client.clone(),
        "claimed-workload",
    );
    let claimed_controller = ControllerSet::new(
        Api::<ClaimedWorkload>::all(client.clone()),
        watcher::Config::default(),
        claimed_driver,
        metrics.clone(),
        processing.clone(),
        "claimed-workload",
    )
    .run()
    .for_each(|res| async move {
        if let Err(err) = res {
            error!(error = %err, "claimed-workload controller iteration failed");
        }
    });

    let claim_reconciler = ClaimReconciler::<WorkloadClaim, ClaimedWorkload, KubeApiOps>::new(
        Applicator::new(KubeApiOps::new(client.clone())),
        client.clone(),
        metrics.clone(),
        "workload-claim",
    );
    let claim_controller = ControllerSet::new(
        Api::<WorkloadClaim>::all(client),
        watcher::Config::default(),
        claim_reconciler,
        metrics.clone(),
        processing.clone(),
        "workload-claim",
    )
    .run()
    .for_each(|res| async move {
        if let Err(err) = res {
            error!(error = %err, "workload-claim controller iteration failed");
        }
    });

    tokio::join!(workload_controller, claimed_controller, claim_controller);
}

/// Spawns the metrics and health listeners as background tasks, mirroring
/// the teacher's `cmd::daemon` shape of one task per long-running service.
fn spawn_http(args: &Args) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    #[cfg(feature = "metrics")]
    {
        let addr = args.metrics_addr.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = http::server::serve_metrics(&addr).await {
                error!(error = %err, "metrics listener stopped");
            }
        }));
    }

    let addr = args.health_addr.clone();
    handles.push(tokio::spawn(async move {
        if let Err(err) = http::server::serve_health(&addr).await {
            error!(error = %err, "health listener stopped");
        }
    }));

    handles
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    logging::initialize(args.verbosity(), args.dev_logging).map_err(Error::Logging)?;

    identity::set(AppIdentity {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        component: "controller",
    });

    let client = client::try_new(ClientOptions {
        incluster: args.incluster,
        kubecontext: args.kubecontext.clone(),
        kubeconfig: args.kubeconfig.clone(),
        qps: args.client_qps,
        burst: args.client_burst,
    })
    .await
    .map_err(Error::Client)?;

    let metrics = Arc::new(MetricsSink::new(Disabled::default()));
    let processing = Arc::new(ProcessingIndex::new());

    let http_handles = spawn_http(&args);

    info!(leader_election = args.leader_election, sync_period = ?args.sync_period, "starting achilles");

    if args.leader_election {
        let namespace = client.default_namespace().to_string();
        let holder_id = hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "achilles".to_string());

        let task_client = client.clone();
        let task_metrics = metrics.clone();
        let task_processing = processing.clone();
        let spawn_task: Box<dyn Fn() -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync> =
            Box::new(move || Box::pin(run_controllers(task_client.clone(), task_metrics.clone(), task_processing.clone())));

        let guard = LeaderGuard::new(
            client,
            &namespace,
            "achilles-controller-lock",
            holder_id,
            std::time::Duration::from_secs(15),
            std::time::Duration::from_secs(5),
            spawn_task,
        );
        guard
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(Error::Leader)?;
    } else {
        tokio::select! {
            _ = run_controllers(client, metrics, processing) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
            }
        }
    }

    for handle in http_handles {
        handle.abort();
    }

    Ok(())
}
