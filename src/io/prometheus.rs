//! Prometheus metrics HTTP endpoint
//!
//! Exposes scan engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_CLASSIFY_BOUNDS, METRICS_COMMIT_BOUNDS, METRICS_NUM_BUCKETS,
    METRICS_STATUSES,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_scan_metrics(&mut output, site_id, &summary);
    write_commit_metrics(&mut output, site_id, &summary);
    write_queue_metrics(&mut output, site_id, &summary);

    output
}

fn write_scan_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scan_engine_scans_total",
        "Total scans classified",
        MetricType::Counter,
        site,
        summary.scans_total,
    );
    write_gauge_f64(
        output,
        "scan_engine_scans_per_sec",
        "Scans classified per second",
        site,
        summary.scans_per_sec,
    );

    let _ = writeln!(output, "# HELP scan_engine_scans_by_status_total Scans per outcome status");
    let _ = writeln!(output, "# TYPE scan_engine_scans_by_status_total counter");
    for (status, count) in METRICS_STATUSES.iter().zip(summary.scans_by_status.iter()) {
        let _ = writeln!(
            output,
            "scan_engine_scans_by_status_total{{site=\"{site}\",status=\"{}\"}} {count}",
            status.as_str()
        );
    }

    write_metric(
        output,
        "scan_engine_cooldown_replays_total",
        "Scans answered from the cooldown cache",
        MetricType::Counter,
        site,
        summary.replays_total,
    );
    write_metric(
        output,
        "scan_engine_validation_errors_total",
        "Scans refused for unknown identifiers",
        MetricType::Counter,
        site,
        summary.validation_errors_total,
    );
    write_metric(
        output,
        "scan_engine_config_errors_total",
        "Scans blocked by an invalid session config",
        MetricType::Counter,
        site,
        summary.config_errors_total,
    );

    write_histogram(
        output,
        "scan_engine_classify_latency_us",
        "Classification latency in microseconds",
        site,
        &summary.classify_buckets,
        &METRICS_CLASSIFY_BOUNDS,
        summary.classify_avg_us,
    );
    write_metric(
        output,
        "scan_engine_classify_latency_p99_us",
        "99th percentile classification latency",
        MetricType::Gauge,
        site,
        summary.classify_p99_us,
    );
    write_metric(
        output,
        "scan_engine_classify_latency_max_us",
        "Maximum classification latency",
        MetricType::Gauge,
        site,
        summary.classify_max_us,
    );
}

fn write_commit_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scan_engine_commits_applied_total",
        "Commits applied by the authoritative store",
        MetricType::Counter,
        site,
        summary.commits_applied_total,
    );
    write_metric(
        output,
        "scan_engine_commits_already_applied_total",
        "Commits the store had already applied",
        MetricType::Counter,
        site,
        summary.commits_already_applied_total,
    );
    write_metric(
        output,
        "scan_engine_commits_failed_total",
        "Commits failed by timeout, network or server error",
        MetricType::Counter,
        site,
        summary.commits_failed_total,
    );
    write_metric(
        output,
        "scan_engine_commits_rejected_total",
        "Commits rejected by the store",
        MetricType::Counter,
        site,
        summary.commits_rejected_total,
    );
    write_histogram(
        output,
        "scan_engine_commit_latency_ms",
        "Authoritative commit latency in milliseconds",
        site,
        &summary.commit_buckets,
        &METRICS_COMMIT_BOUNDS,
        summary.commit_avg_ms,
    );
    write_metric(
        output,
        "scan_engine_commit_latency_p99_ms",
        "99th percentile commit latency",
        MetricType::Gauge,
        site,
        summary.commit_p99_ms,
    );
}

fn write_queue_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scan_engine_offline_enqueued_total",
        "Scans moved to the offline queue",
        MetricType::Counter,
        site,
        summary.offline_enqueued_total,
    );
    write_metric(
        output,
        "scan_engine_queue_quota_rejections_total",
        "Scans not persisted because the offline queue was full",
        MetricType::Counter,
        site,
        summary.quota_rejections_total,
    );
    write_metric(
        output,
        "scan_engine_parked_total",
        "Pending scans moved to manual review",
        MetricType::Counter,
        site,
        summary.parked_total,
    );
    write_metric(
        output,
        "scan_engine_sync_cycles_total",
        "Offline queue sync cycles run",
        MetricType::Counter,
        site,
        summary.sync_cycles_total,
    );
    write_metric(
        output,
        "scan_engine_sync_replayed_total",
        "Pending scans confirmed by sync",
        MetricType::Counter,
        site,
        summary.sync_replayed_total,
    );
    write_metric(
        output,
        "scan_engine_queue_depth",
        "Pending scans awaiting retry",
        MetricType::Gauge,
        site,
        summary.queue_depth,
    );
    write_metric(
        output,
        "scan_engine_manual_review_depth",
        "Pending scans parked for manual review",
        MetricType::Gauge,
        site,
        summary.manual_review_depth,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
