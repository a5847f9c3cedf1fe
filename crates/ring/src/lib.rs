//! Replicated, hash-partitioned key/value ring.
//!
//! Provides: key placement (N nodes strictly clockwise of the key's hash),
//! best-effort replicated writes with an acknowledgement quorum, primary-first
//! reads, and an anti-entropy replicator that copies keys to replicas that
//! lack them.

pub mod chaos;
pub mod placement;
pub mod replica_set;
pub mod replicator;
pub mod ring;

pub use replica_set::ReplicaSet;
pub use replicator::{spawn_repair_task, RepairConfig, RepairReport, RepairTask, Replicator};
pub use ring::{Membership, Ring, RingError, RingOptions, WriteOutcome};
