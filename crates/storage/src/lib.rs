//! Node storage for ringkv.
//!
//! A [`Node`] is one addressable store on the ring. The ring and the
//! replicator only ever talk to nodes through this trait; [`MemoryNode`]
//! is the in-process implementation used by the host and the tests.

pub mod memory;
pub mod node;

pub use memory::MemoryNode;
pub use node::{Node, NodeError};
