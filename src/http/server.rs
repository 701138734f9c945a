//! # Server module
//!
//! Binds the two listeners spec §6 asks for: `--metrics-addr` (prometheus
//! exposition) and `--health-addr` (`/healthz`, `/readyz`). The teacher ran
//! a single listener multiplexing both concerns; this framework keeps them
//! independently bindable since a cluster's liveness probe and its metrics
//! scrape are usually wired to different ports.

use std::net::{AddrParseError, SocketAddr};

use axum::routing::get;
use axum::Router;
use tracing::{info, Instrument};

use crate::http::{healthz, not_found, readyz};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse listen address '{0}', {1}")]
    Listen(String, AddrParseError),
    #[error("failed to bind server, {0}")]
    Bind(hyper::Error),
    #[error("failed to serve content, {0}")]
    Serve(hyper::Error),
}

/// Spec §6's addr flags are given as `":8080"` style strings (bind-all,
/// port-only); `SocketAddr`'s `FromStr` requires a host, so a bare leading
/// colon is expanded to `0.0.0.0:<port>`.
fn parse_addr(raw: &str) -> Result<SocketAddr, AddrParseError> {
    if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}").parse()
    } else {
        raw.parse()
    }
}

#[cfg(feature = "metrics")]
#[tracing::instrument(skip_all)]
pub async fn serve_metrics(addr: &str) -> Result<(), Error> {
    let addr = parse_addr(addr).map_err(|err| Error::Listen(addr.to_owned(), err))?;
    let app = Router::new()
        .route("/metrics", get(crate::http::metrics::handler))
        .fallback(not_found)
        .layer(axum::middleware::from_fn(crate::http::layer::access));

    info!(%addr, "starting metrics listener");
    axum::Server::try_bind(&addr)
        .map_err(Error::Bind)?
        .serve(app.into_make_service())
        .instrument(tracing::info_span!("http::serve_metrics"))
        .await
        .map_err(Error::Serve)
}

#[tracing::instrument(skip_all)]
pub async fn serve_health(addr: &str) -> Result<(), Error> {
    let addr = parse_addr(addr).map_err(|err| Error::Listen(addr.to_owned(), err))?;
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback(not_found)
        .layer(axum::middleware::from_fn(crate::http::layer::access));

    info!(%addr, "starting health listener");
    axum::Server::try_bind(&addr)
        .map_err(Error::Bind)?
        .serve(app.into_make_service())
        .instrument(tracing::info_span!("http::serve_health"))
        .await
        .map_err(Error::Serve)
}
