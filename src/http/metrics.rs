//! # Prometheus module
//!
//! Adapted from the teacher's `svc/http/metrics.rs`: exports the process'
//! prometheus registry in text exposition format.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};

#[tracing::instrument(skip_all)]
pub async fn handler() -> Response {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();

    let mut buf = vec![];
    match encoder.encode(&families, &mut buf) {
        Ok(_) => {
            let mut res = buf.into_response();
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(encoder.format_type()).expect("prometheus format type to be iso8859-1 compliant"),
            );
            res
        }
        Err(err) => {
            let body = serde_json::json!({"error": err.to_string()}).to_string();
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}
