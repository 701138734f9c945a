//! # Configuration module
//!
//! The binary's command-line surface (spec §6), superseding the teacher's
//! `structopt`-based `cmd::Args` and `svc::cfg::Configuration` (config-crate
//! file layer) with a single `clap` struct — this framework takes no
//! configuration file, only flags and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Parses a duration given as a bare integer (seconds) or suffixed with
/// `s`/`m`/`h` (spec §6's `sync-period` default is `"10h"`). Kept local
/// rather than pulling in a duration-parsing crate the rest of the pack
/// never uses for one flag.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.strip_suffix('h') {
        Some(d) => (d, 3600),
        None => match raw.strip_suffix('m') {
            Some(d) => (d, 60),
            None => (raw.strip_suffix('s').unwrap_or(raw), 1),
        },
    };
    let count: u64 = digits.parse().map_err(|_| format!("invalid duration {raw:?}"))?;
    Ok(Duration::from_secs(count * unit))
}

#[derive(Parser, Clone, Debug)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version)]
pub struct Args {
    /// Use the host-runtime's service-account credentials.
    #[arg(long, env = "ACHILLES_INCLUSTER")]
    pub incluster: bool,

    /// Select a named context from kubeconfig (mutually exclusive with
    /// --incluster; exactly one of the two must be set).
    #[arg(long, env = "ACHILLES_KUBECONTEXT")]
    pub kubecontext: Option<String>,

    /// Path to kubeconfig (default: standard lookup).
    #[arg(long, env = "ACHILLES_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Bind address for the metrics endpoint.
    #[arg(long, env = "ACHILLES_METRICS_ADDR", default_value = ":8080")]
    pub metrics_addr: String,

    /// Bind address for the health endpoints.
    #[arg(long, env = "ACHILLES_HEALTH_ADDR", default_value = ":8081")]
    pub health_addr: String,

    /// Debug-level logging.
    #[arg(long, env = "ACHILLES_VERBOSE")]
    pub verbose: bool,

    /// Human-readable log encoder (never in prod).
    #[arg(long, env = "ACHILLES_DEV_LOGGING")]
    pub dev_logging: bool,

    /// Max QPS to the API server.
    #[arg(long, env = "ACHILLES_CLIENT_QPS", default_value_t = 5.0)]
    pub client_qps: f32,

    /// Max request burst.
    #[arg(long, env = "ACHILLES_CLIENT_BURST", default_value_t = 10)]
    pub client_burst: u32,

    /// Full-resync period.
    #[arg(long, env = "ACHILLES_SYNC_PERIOD", default_value = "10h", value_parser = parse_duration)]
    pub sync_period: Duration,

    /// Active-passive HA via a Kubernetes lease.
    #[arg(long, env = "ACHILLES_LEADER_ELECTION")]
    pub leader_election: bool,
}

impl Args {
    /// Maps `--verbose` onto `logging::level`'s numeric scale (spec §6
    /// exposes only a boolean, the teacher's `-v` counted occurrences).
    pub fn verbosity(&self) -> usize {
        if self.verbose {
            3
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("10h").unwrap(), Duration::from_secs(36_000));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1_800));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert!(parse_duration("soon").is_err());
    }
}
