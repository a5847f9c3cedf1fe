//! Anti-entropy repair.
//!
//! A sweep visits every node on the ring and every key that node holds,
//! recomputes the key's ReplicaSet from live membership, and copies the value
//! to any member that lacks it. Sweeps are idempotent: a second sweep over a
//! quiet ring copies nothing.
//!
//! Only missing keys are repaired. A member holding a different value for the
//! key is left alone, and keys are never removed from nodes that are no
//! longer replicas. A delete only reaches the current replicas, so a copy left
//! on a former replica is copied back by the next sweep.

use crate::ring::Ring;
use ringkv_common::NodeId;
use ringkv_storage::{Node, NodeError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{Instrument, Span};

/// Shortest period the background task will tick at.
pub const MIN_REPAIR_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the background repair task.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Time between the start of consecutive sweeps. Raised to
    /// [`MIN_REPAIR_INTERVAL`] if shorter.
    pub interval: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub nodes_scanned: usize,
    pub keys_scanned: usize,
    /// Values written to lagging replicas.
    pub copies: usize,
    /// Node operations that failed or timed out.
    pub failures: usize,
    /// Keys a node listed but no longer held when read.
    pub inconsistencies: usize,
    /// The sweep stopped early on shutdown.
    pub cancelled: bool,
}

/// Runs repair sweeps over a ring.
pub struct Replicator {
    ring: Arc<Ring>,
    shutdown: Option<watch::Receiver<bool>>,
    span: Span,
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Replicator {
    pub fn new(ring: Arc<Ring>) -> Self {
        let span = tracing::info_span!(parent: ring.span(), "replicator");
        Self {
            ring,
            shutdown: None,
            span,
        }
    }

    /// Stop sweeps early once `shutdown` reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one full sweep.
    ///
    /// Failing nodes are logged and skipped; the sweep itself never fails.
    pub async fn repair(&self) -> RepairReport {
        self.sweep().instrument(self.span.clone()).await
    }

    async fn sweep(&self) -> RepairReport {
        let mut report = RepairReport::default();
        let limit = self.ring.options().op_timeout;
        let sources: Vec<Arc<dyn Node>> = self.ring.snapshot().nodes().cloned().collect();

        'nodes: for source in sources {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if !self.ring.snapshot().contains(source.id()) {
                tracing::debug!("node {} left the ring, skipping", source.id());
                continue;
            }

            let keys = match bounded(source.id(), limit, source.keys()).await {
                Ok(keys) => keys,
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!("failed to list keys on node {}: {}", source.id(), e);
                    continue;
                }
            };
            report.nodes_scanned += 1;

            for key in keys {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break 'nodes;
                }
                report.keys_scanned += 1;
                self.repair_key(&source, &key, limit, &mut report).await;
            }
        }

        let metrics = self.ring.metrics();
        metrics.repair_copies.inc_by(report.copies as u64);
        metrics
            .repair_inconsistencies
            .inc_by(report.inconsistencies as u64);
        if report.cancelled {
            tracing::info!(
                "repair sweep cancelled after {} node(s), {} copy(ies)",
                report.nodes_scanned,
                report.copies
            );
        } else {
            metrics.repair_sweeps.inc();
            tracing::info!(
                "repair sweep: {} node(s), {} key(s), {} copied, {} failure(s), {} inconsistent",
                report.nodes_scanned,
                report.keys_scanned,
                report.copies,
                report.failures,
                report.inconsistencies
            );
        }
        report
    }

    /// Copy `key` from `source` to every current replica that lacks it.
    async fn repair_key(
        &self,
        source: &Arc<dyn Node>,
        key: &str,
        limit: Duration,
        report: &mut RepairReport,
    ) {
        let replicas = self.ring.replica_set_for(key);
        // Fetched on first need, then reused for every lagging member.
        let mut value: Option<String> = None;

        for member in replicas.iter() {
            if member.id() == source.id() {
                continue;
            }
            match bounded(member.id(), limit, member.get(key)).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!("failed to check key '{}' on node {}: {}", key, member.id(), e);
                    continue;
                }
            }

            if value.is_none() {
                match bounded(source.id(), limit, source.get(key)).await {
                    Ok(Some(v)) => value = Some(v),
                    Ok(None) => {
                        report.inconsistencies += 1;
                        tracing::debug!(
                            "key '{}' vanished from node {} during repair",
                            key,
                            source.id()
                        );
                        return;
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!("failed to read key '{}' from node {}: {}", key, source.id(), e);
                        return;
                    }
                }
            }
            let Some(v) = value.as_deref() else {
                return;
            };

            match bounded(member.id(), limit, member.set(key, v)).await {
                Ok(()) => {
                    report.copies += 1;
                    tracing::debug!("copied key '{}' from {} to {}", key, source.id(), member.id());
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!("failed to copy key '{}' to node {}: {}", key, member.id(), e);
                }
            }
        }
    }
}

/// Bound a node operation by `limit`, mapping expiry to `NodeError::Timeout`.
async fn bounded<T>(
    id: NodeId,
    limit: Duration,
    op: impl Future<Output = Result<T, NodeError>>,
) -> Result<T, NodeError> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout(id)),
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// Handle to a running repair task.
#[derive(Debug)]
pub struct RepairTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RepairTask {
    /// Signal shutdown and wait for the task to exit.
    ///
    /// A sweep in progress stops at its next node or key boundary.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        // The task may already have exited and dropped its receiver.
        let _ = self.shutdown_tx.send(true);
        self.handle.await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the periodic repair task. The first sweep starts immediately.
#[allow(clippy::needless_pass_by_value)] // config is moved into the spawned task
pub fn spawn_repair_task(ring: Arc<Ring>, config: RepairConfig) -> RepairTask {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let replicator = Replicator::new(ring).with_shutdown(shutdown_rx.clone());

    let period = config.interval.max(MIN_REPAIR_INTERVAL);
    if period != config.interval {
        tracing::warn!(
            parent: replicator.span(),
            "repair interval {:?} too short, using {:?}",
            config.interval,
            period
        );
    }

    let handle = tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tick.tick() => {
                    if replicator.repair().await.cancelled {
                        break;
                    }
                }
            }
        }
        tracing::info!(parent: replicator.span(), "repair task stopped");
    });

    RepairTask {
        shutdown_tx,
        handle,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
