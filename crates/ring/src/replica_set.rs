//! The ordered set of nodes responsible for one key.
//!
//! Writes and deletes fan out to every member concurrently and are
//! best-effort: each member succeeds or fails on its own and nothing is rolled
//! back. Reads walk the members in placement order and stop at the first hit.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use ringkv_common::NodeId;
use ringkv_storage::{Node, NodeError};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Per-member result of a write or delete fan-out.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Members that applied the operation.
    pub acked: Vec<NodeId>,
    /// Members that reported an error.
    pub failed: Vec<(NodeId, NodeError)>,
    /// Members still in flight when the deadline passed.
    pub timed_out: Vec<NodeId>,
}

impl FanOut {
    pub fn acks(&self) -> usize {
        self.acked.len()
    }

    /// True if every member acknowledged.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Result of an ordered read.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// The first member holding the key, and its value.
    pub hit: Option<(NodeId, String)>,
    /// Members that answered without error, the hit included.
    pub answered: usize,
    pub failed: Vec<(NodeId, NodeError)>,
    /// The deadline passed before the walk finished.
    pub timed_out: bool,
}

#[derive(Clone, Copy)]
enum WriteOp<'a> {
    Set { key: &'a str, value: &'a str },
    Delete { key: &'a str },
}

/// Fixed-size, ordered view of the nodes selected for one key.
///
/// The first member is the primary: it is consulted first on reads. All
/// members are equal targets for writes.
#[derive(Clone, Default)]
pub struct ReplicaSet {
    members: Vec<Arc<dyn Node>>,
}

impl ReplicaSet {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            members: Vec::with_capacity(n),
        }
    }

    /// Append a member unless it is already present. Returns whether it was added.
    pub(crate) fn push(&mut self, node: Arc<dyn Node>) -> bool {
        if self.contains(node.id()) {
            return false;
        }
        self.members.push(node);
        true
    }

    /// Whether the node with `id` is a member.
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id() == id)
    }

    /// The first member in read order.
    pub fn primary(&self) -> Option<&Arc<dyn Node>> {
        self.members.first()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Node>> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Set `key` on every member.
    pub async fn write(&self, key: &str, value: &str, deadline: Instant) -> FanOut {
        self.fan_out(WriteOp::Set { key, value }, deadline).await
    }

    /// Delete `key` on every member.
    pub async fn delete(&self, key: &str, deadline: Instant) -> FanOut {
        self.fan_out(WriteOp::Delete { key }, deadline).await
    }

    /// Query members in order; the first hit wins.
    ///
    /// A failing member is recorded and skipped. Stops at the deadline.
    pub async fn read(&self, key: &str, deadline: Instant) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        for node in &self.members {
            match tokio::time::timeout_at(deadline, node.get(key)).await {
                Ok(Ok(Some(value))) => {
                    outcome.answered += 1;
                    outcome.hit = Some((node.id(), value));
                    break;
                }
                Ok(Ok(None)) => outcome.answered += 1,
                Ok(Err(e)) => outcome.failed.push((node.id(), e)),
                Err(_) => {
                    outcome.timed_out = true;
                    break;
                }
            }
        }
        outcome
    }

    /// Run `op` against every member concurrently until all settle or the
    /// deadline passes. Members still pending at the deadline are dropped.
    async fn fan_out(&self, op: WriteOp<'_>, deadline: Instant) -> FanOut {
        let mut futs: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|node| async move {
                let result = match op {
                    WriteOp::Set { key, value } => node.set(key, value).await,
                    WriteOp::Delete { key } => node.delete(key).await,
                };
                (node.id(), result)
            })
            .collect();

        let mut outcome = FanOut::default();
        while let Some((id, result)) = tokio::time::timeout_at(deadline, futs.next())
            .await
            .ok()
            .flatten()
        {
            match result {
                Ok(()) => outcome.acked.push(id),
                Err(e) => outcome.failed.push((id, e)),
            }
        }
        drop(futs);

        outcome.timed_out = self
            .members
            .iter()
            .map(|m| m.id())
            .filter(|id| {
                !outcome.acked.contains(id) && !outcome.failed.iter().any(|(f, _)| f == id)
            })
            .collect();
        outcome
    }
}

impl FromIterator<Arc<dyn Node>> for ReplicaSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Node>>>(iter: I) -> Self {
        let mut set = Self::default();
        for node in iter {
            set.push(node);
        }
        set
    }
}

impl fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl fmt::Display for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", member.id())?;
        }
        Ok(())
    }
}
