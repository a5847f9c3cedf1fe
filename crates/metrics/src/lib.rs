//! Metrics and tracing setup for ringkv.
//!
//! [`RingMetrics`] owns its own `prometheus` registry, so every ring carries
//! an independent set of counters. An optional lightweight HTTP server
//! exposes them for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// All Prometheus metrics for one ring.
pub struct RingMetrics {
    pub registry: Registry,

    // ── Client operation counters ──
    pub puts: IntCounter,
    pub gets: IntCounter,
    pub deletes: IntCounter,

    // ── Client operation latency ──
    pub op_latency_secs: HistogramVec,

    // ── Per-replica failures, by op ──
    pub replica_failures: IntCounterVec,

    // ── Repair ──
    pub repair_sweeps: IntCounter,
    pub repair_copies: IntCounter,
    pub repair_inconsistencies: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for RingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for operation latency.
const LATENCY_BUCKETS: &[f64] = &[0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 1.0];

impl RingMetrics {
    /// Create a fresh set of metrics on a private registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let puts = IntCounter::with_opts(Opts::new("ringkv_puts_total", "Ring PUT operations"))?;
        let gets = IntCounter::with_opts(Opts::new("ringkv_gets_total", "Ring GET operations"))?;
        let deletes = IntCounter::with_opts(Opts::new(
            "ringkv_deletes_total",
            "Ring DELETE operations",
        ))?;

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "ringkv_op_latency_seconds",
                "Ring operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op_type"],
        )?;

        let replica_failures = IntCounterVec::new(
            Opts::new(
                "ringkv_replica_failures_total",
                "Replica operations that failed or timed out, by op",
            ),
            &["op_type"],
        )?;

        let repair_sweeps = IntCounter::with_opts(Opts::new(
            "ringkv_repair_sweeps_total",
            "Completed repair sweeps",
        ))?;
        let repair_copies = IntCounter::with_opts(Opts::new(
            "ringkv_repair_copies_total",
            "Values copied to lagging replicas by repair",
        ))?;
        let repair_inconsistencies = IntCounter::with_opts(Opts::new(
            "ringkv_repair_inconsistencies_total",
            "Enumerated keys that vanished before repair could read them",
        ))?;

        registry.register(Box::new(puts.clone()))?;
        registry.register(Box::new(gets.clone()))?;
        registry.register(Box::new(deletes.clone()))?;
        registry.register(Box::new(op_latency_secs.clone()))?;
        registry.register(Box::new(replica_failures.clone()))?;
        registry.register(Box::new(repair_sweeps.clone()))?;
        registry.register(Box::new(repair_copies.clone()))?;
        registry.register(Box::new(repair_inconsistencies.clone()))?;

        Ok(Self {
            registry,
            puts,
            gets,
            deletes,
            op_latency_secs,
            replica_failures,
            repair_sweeps,
            repair_copies,
            repair_inconsistencies,
        })
    }

    /// Start an operation latency timer. Records elapsed time on drop.
    pub fn start_op_timer(&self, op_type: &str) -> prometheus::HistogramTimer {
        self.op_latency_secs
            .with_label_values(&[op_type])
            .start_timer()
    }

    /// Count a failed or timed out replica operation.
    pub fn replica_failed(&self, op_type: &str) {
        self.replica_failures.with_label_values(&[op_type]).inc();
    }

    /// Encode all registered metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    metrics: Arc<RingMetrics>,
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match metrics.encode() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(body))),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from(e.to_string()))),
    }
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<RingMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(metrics.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
