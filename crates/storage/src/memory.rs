//! In-memory node backed by a hash map.

use crate::node::{Node, NodeError};
use ringkv_common::NodeId;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-memory key-value node. Data lives as long as the process.
///
/// The map sits behind a readers-writer lock that is held for exactly one
/// operation, so concurrent readers never block each other.
#[derive(Debug)]
pub struct MemoryNode {
    id: NodeId,
    data: RwLock<HashMap<String, String>>,
}

impl MemoryNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a node at a random ring position.
    pub fn random() -> Self {
        Self::new(NodeId::random())
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl Node for MemoryNode {
    fn id(&self) -> NodeId {
        self.id
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), NodeError> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, NodeError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), NodeError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), NodeError> {
        let dropped = {
            let mut data = self.data.write().await;
            let n = data.len();
            data.clear();
            n
        };
        tracing::debug!("node {} cleared ({} key(s) dropped)", self.id, dropped);
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>, NodeError> {
        Ok(self.data.read().await.keys().cloned().collect())
    }
}
