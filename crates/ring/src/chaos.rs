//! Chaos injection wrapper for [`Node`].
//!
//! [`ChaosNode`] wraps any `N: Node` and injects configurable failures:
//! random errors, an explicit down flag, and latency.

use rand::Rng;
use ringkv_common::NodeId;
use ringkv_storage::{Node, NodeError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Configuration for node chaos injection.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// A [`Node`] wrapper that injects chaos (failures, latency, a down flag).
pub struct ChaosNode<N: Node> {
    inner: Arc<N>,
    config: Arc<RwLock<ChaosConfig>>,
    down: AtomicBool,
}

impl<N: Node> std::fmt::Debug for ChaosNode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosNode")
            .field("id", &self.inner.id())
            .field("down", &self.down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<N: Node> ChaosNode<N> {
    pub fn new(inner: N, config: ChaosConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(RwLock::new(config)),
            down: AtomicBool::new(false),
        }
    }

    /// The wrapped node, reachable regardless of injected faults.
    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// Fail every operation until [`recover`](Self::recover) is called.
    pub fn fail(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    /// Dynamically update the random failure rate.
    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    /// Dynamically update the fixed latency.
    pub async fn set_latency(&self, latency: Duration) {
        self.config.write().await.latency = latency;
    }

    /// Apply chaos checks: returns Err if the request should fail.
    async fn maybe_fail(&self) -> Result<(), NodeError> {
        let id = self.inner.id();
        if self.is_down() {
            return Err(NodeError::Unavailable(id));
        }

        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            let delay = config.latency + Duration::from_millis(jitter_ms);
            (delay, config.failure_rate)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(NodeError::Failed {
                node: id,
                reason: "chaos: random failure".into(),
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<N: Node> Node for ChaosNode<N> {
    fn id(&self) -> NodeId {
        self.inner.id()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), NodeError> {
        self.maybe_fail().await?;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, NodeError> {
        self.maybe_fail().await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), NodeError> {
        self.maybe_fail().await?;
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<(), NodeError> {
        self.maybe_fail().await?;
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<HashSet<String>, NodeError> {
        self.maybe_fail().await?;
        self.inner.keys().await
    }
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ringkv_storage::MemoryNode;

    fn chaos(config: ChaosConfig) -> ChaosNode<MemoryNode> {
        ChaosNode::new(MemoryNode::new(NodeId::new(7)), config)
    }

    #[tokio::test]
    async fn test_chaos_passthrough() {
        let node = chaos(ChaosConfig::default());
        node.set("key", "val").await.unwrap();
        assert_eq!(node.get("key").await.unwrap().as_deref(), Some("val"));
        assert_eq!(node.keys().await.unwrap().len(), 1);
        assert_eq!(node.id(), NodeId::new(7));
    }

    #[tokio::test]
    async fn test_chaos_fail_and_recover() {
        let node = chaos(ChaosConfig::default());
        node.set("key", "val").await.unwrap();

        node.fail();
        assert!(matches!(
            node.get("key").await,
            Err(NodeError::Unavailable(id)) if id == NodeId::new(7)
        ));
        assert!(node.set("key", "other").await.is_err());
        assert!(node.keys().await.is_err());
        // The data underneath is untouched.
        assert_eq!(node.inner().get("key").await.unwrap().as_deref(), Some("val"));

        node.recover();
        assert_eq!(node.get("key").await.unwrap().as_deref(), Some("val"));
    }

    #[tokio::test]
    async fn test_chaos_random_failure() {
        let node = chaos(ChaosConfig {
            failure_rate: 1.0,
            ..Default::default()
        });

        for _ in 0..10 {
            assert!(node.set("key", "val").await.is_err());
        }

        node.set_failure_rate(0.0).await;
        assert!(node.set("key", "val").await.is_ok());
    }

    #[tokio::test]
    async fn test_chaos_latency() {
        tokio::time::pause();
        let node = chaos(ChaosConfig::default());
        node.set_latency(Duration::from_secs(30)).await;

        let started = tokio::time::Instant::now();
        node.set("key", "val").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
