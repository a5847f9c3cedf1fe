//! ringkv-node: host process for an in-memory replicated ring.
//!
//! Loads config, builds a ring of memory nodes, spawns the repair task and
//! the optional metrics server, runs a short smoke workload, then waits for
//! Ctrl+C.

use ringkv_common::{KeyHasher, Sha1KeyHasher};
use ringkv_config::RingConfig;
use ringkv_metrics::RingMetrics;
use ringkv_ring::{spawn_repair_task, RepairConfig, Replicator, Ring, RingOptions};
use ringkv_storage::Node;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ringkv_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = ringkv_config::load_from_file(std::path::Path::new(&config_path))
        .unwrap_or_else(|e| {
            tracing::warn!(
                "failed to load config from {}: {}, using defaults",
                config_path,
                e
            );
            RingConfig::default()
        });

    // Build ring options from config
    let options = RingOptions {
        replica_count: config.ring.replica_count,
        write_quorum: config.ring.write_quorum,
        read_quorum: config.ring.read_quorum,
        op_timeout: Duration::from_millis(config.ring.op_timeout_ms),
    };

    // One registry shared by the ring and the metrics server
    let metrics = Arc::new(RingMetrics::new()?);
    let ring = Ring::with_memory_nodes(Arc::new(Sha1KeyHasher), options, config.ring.ring_size)?
        .with_span(tracing::info_span!("ring", size = config.ring.ring_size))
        .with_metrics(metrics.clone());
    let ring = Arc::new(ring);
    tracing::info!(
        "ring of {} node(s) up, replica count {}",
        ring.len(),
        config.ring.replica_count
    );

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], metrics_port));
        tokio::spawn(async move {
            if let Err(e) = ringkv_metrics::serve_metrics(metrics_addr, metrics).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Spawn periodic repair task
    let repair_task = if config.repair.enabled {
        Some(spawn_repair_task(
            ring.clone(),
            RepairConfig {
                interval: Duration::from_secs(config.repair.interval_secs),
            },
        ))
    } else {
        tracing::info!("repair disabled");
        None
    };

    smoke(&ring).await?;

    tracing::info!("running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");

    if let Some(task) = repair_task {
        task.shutdown().await?;
    }
    Ok(())
}

/// Write, read, lose a replica, and repair.
async fn smoke(ring: &Arc<Ring>) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = ring.put("asd", "123", None).await?;
    tracing::info!(
        "put asd ({:016x}) -> {} replica(s)",
        ring.hasher().hash("asd"),
        outcome.acked.len()
    );

    let value = ring.get("asd", None).await?;
    tracing::info!("get asd = {:?}", value);

    if ring.len() > ring.options().replica_count {
        if let Some(primary) = ring.replica_set_for("asd").primary().map(|p| p.id()) {
            let dropped = ring.drop_node(primary)?;
            tracing::info!("dropped primary {} of asd", dropped.id());
        }
        let report = Replicator::new(ring.clone()).repair().await;
        tracing::info!("repair after drop copied {} value(s)", report.copies);
        tracing::info!("get asd = {:?}", ring.get("asd", None).await?);
    }
    Ok(())
}
