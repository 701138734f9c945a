//! # Client module
//!
//! Builds the single `kube::Client` the binary shares across every
//! controller. Grounded on the teacher's `svc/k8s/client.rs`, extended per
//! spec §6 with in-cluster-vs-kubecontext selection (the teacher only ever
//! read a kubeconfig) and a client-side request-rate layer for
//! `client-qps`/`client-burst`.

use std::path::PathBuf;
use std::time::Duration;

use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use tower::limit::RateLimitLayer;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("reading kubeconfig, {0}")]
    Kubeconfig(#[source] KubeconfigError),
    #[error("loading in-cluster configuration, {0}")]
    InCluster(#[source] kube::Error),
    #[error("resolving kubecontext, {0}")]
    ResolveContext(#[source] kube::Error),
    #[error("building kubernetes client, {0}")]
    CreateClient(#[source] kube::Error),
    #[error("--incluster and --kubecontext are mutually exclusive")]
    KubeContextSetInCluster,
    #[error("no valid kube context: set --incluster or --kubecontext")]
    NoValidKubeContext,
}

/// Spec §6's client-construction flags.
pub struct ClientOptions {
    pub incluster: bool,
    pub kubecontext: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub qps: f32,
    pub burst: u32,
}

/// Builds a `kube::Client` per `opts`, rate-limited client-side to roughly
/// `qps` sustained requests per second with bursts up to `burst` (spec §6).
/// `tower::limit::RateLimitLayer` is a fixed-window limiter rather than a
/// token bucket, so the window is sized to allow `burst` requests every
/// `burst / qps` seconds, which averages to the target rate while still
/// letting a `burst`-sized spike through at the start of each window.
pub async fn try_new(opts: ClientOptions) -> Result<Client, Error> {
    if opts.incluster && opts.kubecontext.is_some() {
        return Err(Error::KubeContextSetInCluster);
    }

    let config = if opts.incluster {
        Config::from_cluster_env().map_err(Error::InCluster)?
    } else if opts.kubecontext.is_some() || opts.kubeconfig.is_some() {
        let kubeconfig = match &opts.kubeconfig {
            Some(path) => Kubeconfig::read_from(path).map_err(Error::Kubeconfig)?,
            None => Kubeconfig::read().map_err(Error::Kubeconfig)?,
        };
        let kube_opts = KubeConfigOptions {
            context: opts.kubecontext.clone(),
            ..Default::default()
        };
        Config::from_custom_kubeconfig(kubeconfig, &kube_opts)
            .await
            .map_err(Error::ResolveContext)?
    } else {
        return Err(Error::NoValidKubeContext);
    };

    let window = Duration::from_secs_f32((opts.burst as f32 / opts.qps.max(0.001)).max(0.001));
    let rate_limit = RateLimitLayer::new(opts.burst.max(1) as u64, window);

    let client = ClientBuilder::try_from(config)
        .map_err(Error::CreateClient)?
        .with_layer(&rate_limit)
        .build();
    Ok(client)
}
