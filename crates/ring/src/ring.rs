//! The ring: node membership, placement, and client operations.
//!
//! A client operation:
//! 1. Hashes the key to a ring position
//! 2. Computes the ReplicaSet from the current membership snapshot
//! 3. Fans the operation out to the members under a deadline
//! 4. Applies the acknowledgement quorum and reports the outcome
//!
//! Membership is copy-on-write: `add_node`/`drop_node` build a new immutable
//! snapshot and publish it atomically, so placements never hold a lock across
//! a fan-out.

use crate::placement;
use crate::replica_set::{FanOut, ReplicaSet};
use ringkv_common::{KeyHasher, NodeId};
use ringkv_metrics::RingMetrics;
use ringkv_storage::{MemoryNode, Node, NodeError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{Instrument, Span};

/// Replication and client operation settings.
#[derive(Debug, Clone)]
pub struct RingOptions {
    /// Replication factor (N).
    pub replica_count: usize,
    /// Acknowledgements required for a put/delete to succeed.
    pub write_quorum: usize,
    /// Clean answers required before a get may report not-found.
    pub read_quorum: usize,
    /// Default client operation deadline.
    pub op_timeout: Duration,
}

impl Default for RingOptions {
    fn default() -> Self {
        Self {
            replica_count: 3,
            write_quorum: 1,
            read_quorum: 1,
            op_timeout: Duration::from_secs(5),
        }
    }
}

impl RingOptions {
    pub fn validate(&self) -> Result<(), RingError> {
        let n = self.replica_count;
        if n == 0 {
            return Err(RingError::InvalidOptions(
                "replica_count must be > 0".into(),
            ));
        }
        if self.write_quorum == 0 || self.write_quorum > n {
            return Err(RingError::InvalidOptions(format!(
                "write_quorum ({}) must be in 1..={}",
                self.write_quorum, n
            )));
        }
        if self.read_quorum == 0 || self.read_quorum > n {
            return Err(RingError::InvalidOptions(format!(
                "read_quorum ({}) must be in 1..={}",
                self.read_quorum, n
            )));
        }
        if self.op_timeout.is_zero() {
            return Err(RingError::InvalidOptions("op_timeout must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring size {size} is smaller than replica count {replicas}")]
    RingTooSmall { size: usize, replicas: usize },
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("invalid ring options: {0}")]
    InvalidOptions(String),
    #[error("quorum not reached: need {needed}, got {got}")]
    QuorumNotReached { needed: usize, got: usize },
    #[error("operation on key '{key}' timed out after {elapsed:?}")]
    Timeout { key: String, elapsed: Duration },
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Outcome of a successful put or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Replicas that applied the write.
    pub acked: Vec<NodeId>,
    /// Replicas that failed or missed the deadline. Repair will catch them up.
    pub missed: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Membership snapshot
// ---------------------------------------------------------------------------

/// An immutable view of ring membership, ordered by position.
#[derive(Clone, Default)]
pub struct Membership {
    nodes: BTreeMap<NodeId, Arc<dyn Node>>,
    version: u64,
}

impl Membership {
    /// Incremented on every published membership change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(&id)
    }

    /// Member ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Members, ascending by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<dyn Node>> {
        self.nodes.values()
    }

    /// The `n` members responsible for `position`.
    pub fn replica_set(&self, position: u64, n: usize) -> ReplicaSet {
        let mut set = ReplicaSet::with_capacity(n);
        for (_, node) in placement::walk(&self.nodes, position, n) {
            set.push(node.clone());
        }
        set
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("version", &self.version)
            .field("ids", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ring
// ---------------------------------------------------------------------------

/// A replicated, hash-partitioned key/value ring.
pub struct Ring {
    hasher: Arc<dyn KeyHasher>,
    options: RingOptions,
    membership: RwLock<Arc<Membership>>,
    metrics: Arc<RingMetrics>,
    span: Span,
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("options", &self.options)
            .field("membership", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Ring {
    /// Build a ring over `nodes`.
    ///
    /// Fails if the options are invalid, if there are fewer nodes than
    /// replicas, or if two nodes share an id.
    pub fn new(
        hasher: Arc<dyn KeyHasher>,
        options: RingOptions,
        nodes: Vec<Arc<dyn Node>>,
    ) -> Result<Self, RingError> {
        options.validate()?;
        if nodes.len() < options.replica_count {
            return Err(RingError::RingTooSmall {
                size: nodes.len(),
                replicas: options.replica_count,
            });
        }

        let span = tracing::info_span!("ring");
        let mut membership = Membership::default();
        for node in nodes {
            let id = node.id();
            if membership.nodes.insert(id, node).is_some() {
                return Err(RingError::DuplicateNode(id));
            }
            tracing::debug!(parent: &span, "created instance {}", id);
        }

        Ok(Self {
            hasher,
            options,
            membership: RwLock::new(Arc::new(membership)),
            metrics: Arc::new(RingMetrics::new()?),
            span,
        })
    }

    /// Build a ring of `size` in-memory nodes at random, distinct positions.
    pub fn with_memory_nodes(
        hasher: Arc<dyn KeyHasher>,
        options: RingOptions,
        size: usize,
    ) -> Result<Self, RingError> {
        if size < options.replica_count {
            return Err(RingError::RingTooSmall {
                size,
                replicas: options.replica_count,
            });
        }

        let mut ids = BTreeSet::new();
        let mut collisions = 0usize;
        while ids.len() < size {
            if !ids.insert(NodeId::random()) {
                collisions += 1;
            }
        }
        let nodes = ids
            .into_iter()
            .map(|id| Arc::new(MemoryNode::new(id)) as Arc<dyn Node>)
            .collect();
        let ring = Self::new(hasher, options, nodes)?;
        if collisions > 0 {
            tracing::debug!(parent: &ring.span, "regenerated {} colliding node id(s)", collisions);
        }
        Ok(ring)
    }

    /// Attach the span every ring log line and operation is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Replace the ring's metrics, e.g. to share one registry with a host.
    pub fn with_metrics(mut self, metrics: Arc<RingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &RingOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<RingMetrics> {
        &self.metrics
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn hasher(&self) -> &Arc<dyn KeyHasher> {
        &self.hasher
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// The current membership snapshot. Later changes do not affect it.
    pub fn snapshot(&self) -> Arc<Membership> {
        self.membership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` to a copy of the membership and publish it.
    ///
    /// Enforces the ring-size invariant on the result.
    fn update<R>(
        &self,
        change: impl FnOnce(&mut Membership) -> Result<R, RingError>,
    ) -> Result<R, RingError> {
        let mut current = self
            .membership
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Membership::clone(&current);
        let out = change(&mut next)?;
        if next.len() < self.options.replica_count {
            return Err(RingError::RingTooSmall {
                size: next.len(),
                replicas: self.options.replica_count,
            });
        }
        next.version += 1;
        *current = Arc::new(next);
        Ok(out)
    }

    /// Add a node at its own position. Rejects an id already on the ring.
    pub fn add_node(&self, node: Arc<dyn Node>) -> Result<(), RingError> {
        let id = node.id();
        let size = self.update(|m| {
            if m.contains(id) {
                return Err(RingError::DuplicateNode(id));
            }
            m.nodes.insert(id, node);
            Ok(m.len())
        })?;
        tracing::info!(parent: &self.span, "added node {} (ring size {})", id, size);
        Ok(())
    }

    /// Add a fresh in-memory node at a random free position.
    pub fn add_memory_node(&self) -> Result<NodeId, RingError> {
        let (id, size) = self.update(|m| {
            let mut id = NodeId::random();
            while m.contains(id) {
                id = NodeId::random();
            }
            m.nodes.insert(id, Arc::new(MemoryNode::new(id)));
            Ok((id, m.len()))
        })?;
        tracing::info!(parent: &self.span, "added node {} (ring size {})", id, size);
        Ok(id)
    }

    /// Remove a node immediately.
    ///
    /// Its data is not migrated: keys it held remain readable only where they
    /// were already replicated. Rejected if the ring would drop below N nodes.
    pub fn drop_node(&self, id: NodeId) -> Result<Arc<dyn Node>, RingError> {
        let (node, size) = self.update(|m| {
            let node = m.nodes.remove(&id).ok_or(RingError::UnknownNode(id))?;
            Ok((node, m.len()))
        })?;
        tracing::info!(
            parent: &self.span,
            "dropped node {} (ring size {}, data not migrated)",
            id,
            size
        );
        Ok(node)
    }

    /// Look up a member by id.
    pub fn node(&self, id: NodeId) -> Option<Arc<dyn Node>> {
        self.snapshot().get(id).cloned()
    }

    /// Member ids, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.snapshot().ids().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// The ReplicaSet for `key` under the current membership.
    pub fn replica_set_for(&self, key: &str) -> ReplicaSet {
        let position = self.hasher.hash(key);
        let set = self
            .snapshot()
            .replica_set(position, self.options.replica_count);
        tracing::debug!(
            parent: &self.span,
            "use nodes [{}] for key {} ({:x})",
            set,
            key,
            position
        );
        set
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// PUT a value on every replica of `key`.
    ///
    /// Succeeds once `write_quorum` replicas have acknowledged; replicas that
    /// fail or miss the deadline are logged and left for repair.
    pub async fn put(
        &self,
        key: &str,
        value: &str,
        timeout_override: Option<Duration>,
    ) -> Result<WriteOutcome, RingError> {
        self.metrics.puts.inc();
        let _timer = self.metrics.start_op_timer("put");
        let started = Instant::now();
        let deadline = started + timeout_override.unwrap_or(self.options.op_timeout);

        let fan_out = self
            .replica_set_for(key)
            .write(key, value, deadline)
            .instrument(self.span.clone())
            .await;
        self.settle_write("put", key, fan_out, started)
    }

    /// DELETE `key` from every replica. Absent keys are not an error.
    pub async fn delete(
        &self,
        key: &str,
        timeout_override: Option<Duration>,
    ) -> Result<WriteOutcome, RingError> {
        self.metrics.deletes.inc();
        let _timer = self.metrics.start_op_timer("delete");
        let started = Instant::now();
        let deadline = started + timeout_override.unwrap_or(self.options.op_timeout);

        let fan_out = self
            .replica_set_for(key)
            .delete(key, deadline)
            .instrument(self.span.clone())
            .await;
        self.settle_write("delete", key, fan_out, started)
    }

    /// GET `key`, consulting replicas primary-first.
    ///
    /// `Ok(None)` means at least `read_quorum` replicas answered and none had
    /// the key.
    pub async fn get(
        &self,
        key: &str,
        timeout_override: Option<Duration>,
    ) -> Result<Option<String>, RingError> {
        self.metrics.gets.inc();
        let _timer = self.metrics.start_op_timer("get");
        let started = Instant::now();
        let deadline = started + timeout_override.unwrap_or(self.options.op_timeout);

        let replicas = self.replica_set_for(key);
        let outcome = replicas
            .read(key, deadline)
            .instrument(self.span.clone())
            .await;

        for (id, e) in &outcome.failed {
            self.metrics.replica_failed("get");
            tracing::warn!(parent: &self.span, "get of key '{}' failed on node {}: {}", key, id, e);
        }

        if let Some((id, value)) = outcome.hit {
            if replicas.primary().map(|p| p.id()) != Some(id) {
                tracing::debug!(parent: &self.span, "key '{}' served by non-primary node {}", key, id);
            }
            return Ok(Some(value));
        }

        if outcome.timed_out {
            self.metrics.replica_failed("get");
            tracing::warn!(parent: &self.span, "get of key '{}' hit its deadline", key);
            return Err(RingError::Timeout {
                key: key.to_string(),
                elapsed: started.elapsed(),
            });
        }

        if outcome.answered < self.options.read_quorum {
            return Err(RingError::QuorumNotReached {
                needed: self.options.read_quorum,
                got: outcome.answered,
            });
        }
        Ok(None)
    }

    /// Wipe every node on the ring.
    ///
    /// Every node is attempted; the first failure is returned.
    pub async fn clear(&self) -> Result<(), RingError> {
        let mut first_error = None;
        for node in self.snapshot().nodes() {
            if let Err(e) = node.clear().await {
                tracing::warn!(parent: &self.span, "failed to clear node {}: {}", node.id(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Log per-replica failures and apply the write quorum.
    fn settle_write(
        &self,
        op: &str,
        key: &str,
        fan_out: FanOut,
        started: Instant,
    ) -> Result<WriteOutcome, RingError> {
        for (id, e) in &fan_out.failed {
            self.metrics.replica_failed(op);
            tracing::warn!(parent: &self.span, "{} of key '{}' failed on node {}: {}", op, key, id, e);
        }
        for id in &fan_out.timed_out {
            self.metrics.replica_failed(op);
            tracing::warn!(parent: &self.span, "{} of key '{}' timed out on node {}", op, key, id);
        }

        let needed = self.options.write_quorum;
        let got = fan_out.acks();
        if got >= needed {
            let missed = fan_out
                .failed
                .iter()
                .map(|(id, _)| *id)
                .chain(fan_out.timed_out.iter().copied())
                .collect();
            return Ok(WriteOutcome {
                acked: fan_out.acked,
                missed,
            });
        }

        if fan_out.timed_out.is_empty() {
            Err(RingError::QuorumNotReached { needed, got })
        } else {
            Err(RingError::Timeout {
                key: key.to_string(),
                elapsed: started.elapsed(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
