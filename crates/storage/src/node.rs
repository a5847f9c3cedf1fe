//! The node capability set.
//!
//! Same pattern as a transport trait: the ring depends on this trait only,
//! so durable or networked stores can be dropped in underneath it.

use ringkv_common::NodeId;
use std::collections::HashSet;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    #[error("node {0} unavailable")]
    Unavailable(NodeId),
    #[error("node {0} timed out")]
    Timeout(NodeId),
    #[error("node {node} failed: {reason}")]
    Failed { node: NodeId, reason: String },
}

/// One storage unit on the ring.
///
/// A node never discovers or contacts other nodes; all replication logic
/// lives above it. `get` reports absence as `Ok(None)`, never as an error.
#[async_trait::async_trait]
pub trait Node: Send + Sync + 'static {
    /// The node's position on the ring.
    fn id(&self) -> NodeId;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), NodeError>;

    async fn get(&self, key: &str) -> Result<Option<String>, NodeError>;

    /// Remove a key. Absent keys are a no-op.
    async fn delete(&self, key: &str) -> Result<(), NodeError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), NodeError>;

    /// Point-in-time snapshot of the stored keys. Not required to be
    /// consistent with writes that race the call.
    async fn keys(&self) -> Result<HashSet<String>, NodeError>;
}
