//! # Leader election module
//!
//! Active-passive HA via a Kubernetes `Lease`, gated behind `--leader-election`
//! (spec §6). The teacher never needed this, so it's grounded instead on the
//! `kube-leader-election` usage found elsewhere in the pack: acquire-or-renew
//! on a tick, spawn the guarded task while held, abort it the moment
//! leadership is lost or a renew call fails.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("leader election renew/acquire failed, {0}")]
    Lease(#[source] kube::Error),
}

type GuardedTask = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Runs `spawn_task` only while this process holds the named lease, retrying
/// acquisition every `renew_every`. Loses leadership either on a failed
/// renew (treated as "not safe to lead") or when another holder wins the
/// lease.
pub struct LeaderGuard {
    lease: LeaseLock,
    renew_every: Duration,
    task: GuardedTask,
}

impl LeaderGuard {
    pub fn new(client: Client, namespace: &str, lease_name: impl Into<String>, holder_id: impl Into<String>, lease_ttl: Duration, renew_every: Duration, spawn_task: GuardedTask) -> Self {
        let lease = LeaseLock::new(
            client,
            namespace,
            LeaseLockParams {
                holder_id: holder_id.into(),
                lease_name: lease_name.into(),
                lease_ttl,
            },
        );
        Self { lease, renew_every, task: spawn_task }
    }

    /// Runs until `shutdown` resolves, at which point any held task is
    /// aborted and joined before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        tokio::pin!(shutdown);

        let mut held: Option<JoinHandle<()>> = None;
        let mut tick = tokio::time::interval(self.renew_every);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    if let Some(task) = held.take() {
                        task.abort();
                        let _ = task.await;
                    }
                    return Ok(());
                }
                _ = tick.tick() => {}
            }

            let lease = match self.lease.try_acquire_or_renew().await {
                Ok(lease) => lease,
                Err(err) => {
                    warn!(error = %err, "leader election renew/acquire failed");
                    if let Some(task) = held.take() {
                        task.abort();
                        warn!("aborted guarded task after losing the lease");
                    }
                    continue;
                }
            };

            match lease {
                LeaseLockResult::Acquired(_) if held.is_none() => {
                    info!("acquired leadership, starting guarded task");
                    held = Some(tokio::spawn((self.task)()));
                }
                LeaseLockResult::Acquired(_) => {}
                _ => {
                    if let Some(task) = held.take() {
                        warn!("lost leadership, stopping guarded task");
                        task.abort();
                    }
                }
            }
        }
    }
}
