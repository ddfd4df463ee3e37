use std::time::Instant;

use anyhow::{Result, anyhow};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
static START_TIME: OnceCell<Instant> = OnceCell::new();

pub fn init() -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("bucketdb_http_request_duration_seconds".into()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|err| anyhow!("failed to configure prometheus exporter: {err}"))?;
    let handle = builder
        .install_recorder()
        .map_err(|err| anyhow!("failed to initialise prometheus recorder: {err}"))?;

    describe_counter!(
        "bucketdb_http_requests_total",
        "Total number of HTTP requests processed."
    );
    describe_histogram!(
        "bucketdb_http_request_duration_seconds",
        "HTTP request latency."
    );
    describe_counter!(
        "bucketdb_records_stored_total",
        "Total number of records written to buckets."
    );
    describe_counter!(
        "bucketdb_store_save_retries_total",
        "Document writes retried after a transient store failure."
    );
    describe_counter!(
        "bucketdb_queries_total",
        "Queries executed, labelled by classification."
    );
    describe_counter!(
        "bucketdb_rejected_requests_total",
        "Requests rejected because of caller input."
    );

    let _ = PROMETHEUS_HANDLE.set(handle);
    let _ = START_TIME.set(Instant::now());
    Ok(())
}

pub async fn metrics_handler() -> Response {
    if PROMETHEUS_HANDLE.get().is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialised",
        )
            .into_response();
    }

    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    )];
    (StatusCode::OK, headers, render_metrics()).into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "bucketdb_http_requests_total",
        1,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone()
    );
    histogram!(
        "bucketdb_http_request_duration_seconds",
        latency,
        "method" => method,
        "path" => path,
        "status" => status
    );

    response
}

pub fn record_stored(bucket: &str, records: usize) {
    counter!(
        "bucketdb_records_stored_total",
        records as u64,
        "bucket" => bucket.to_owned()
    );
}

pub fn record_save_retry(bucket: &str) {
    counter!(
        "bucketdb_store_save_retries_total",
        1,
        "bucket" => bucket.to_owned()
    );
}

pub fn record_query(bucket: &str, kind: &str) {
    counter!(
        "bucketdb_queries_total",
        1,
        "bucket" => bucket.to_owned(),
        "kind" => kind.to_owned()
    );
}

pub fn record_rejected(operation: &str) {
    counter!(
        "bucketdb_rejected_requests_total",
        1,
        "operation" => operation.to_owned()
    );
}

pub fn render_metrics() -> String {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        let mut body = handle.render();
        if let Some(start) = START_TIME.get() {
            let uptime = start.elapsed().as_secs_f64();
            body.push_str(&format!("bucketdb_uptime_seconds{{}} {}\n", uptime));
        }
        body
    } else {
        String::new()
    }
}
