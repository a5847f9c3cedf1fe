//! ringkv-common: shared types for the ringkv workspace.
//!
//! Provides the 64-bit `NodeId` that positions a node on the hash ring,
//! and the `KeyHasher` abstraction that maps keys into the same space.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

/// Number of bytes of a key digest that make up a ring position.
pub const POSITION_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// A node's position in the 64-bit hash space.
///
/// Ordering follows the numeric value, which is the clockwise order of the ring.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The lowest position on the ring.
    pub const MIN: Self = Self(0);

    /// The highest position on the ring.
    pub const MAX: Self = Self(u64::MAX);

    pub const fn new(position: u64) -> Self {
        Self(position)
    }

    /// The raw ring position.
    pub const fn position(&self) -> u64 {
        self.0
    }

    /// Generate a random `NodeId`.
    ///
    /// Collisions are possible in principle; the ring rejects duplicates.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl From<u64> for NodeId {
    fn from(position: u64) -> Self {
        Self(position)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Key hashing
// ---------------------------------------------------------------------------

/// Maps an arbitrary string key to a position in the 64-bit hash space.
///
/// Implementations must be deterministic and free of side effects. The ring
/// holds one behind an `Arc<dyn KeyHasher>`, so tests can pin keys to known
/// positions without touching placement or repair logic.
pub trait KeyHasher: Send + Sync + 'static {
    fn hash(&self, key: &str) -> u64;
}

/// Default hasher: the first eight bytes of the key's SHA-1 digest,
/// read little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1KeyHasher;

impl Sha1KeyHasher {
    pub fn new() -> Self {
        Self
    }
}

impl KeyHasher for Sha1KeyHasher {
    fn hash(&self, key: &str) -> u64 {
        let digest = Sha1::digest(key.as_bytes());
        let mut bytes = [0u8; POSITION_BYTES];
        bytes.copy_from_slice(&digest[..POSITION_BYTES]);
        u64::from_le_bytes(bytes)
    }
}

/// Hasher with explicitly pinned positions for chosen keys.
///
/// Keys without a pin fall back to [`Sha1KeyHasher`]. Used to lay out
/// placements deterministically in tests and benchmarks.
#[derive(Debug, Clone, Default)]
pub struct FixedKeyHasher {
    positions: HashMap<String, u64>,
    fallback: Sha1KeyHasher,
}

impl FixedKeyHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `key` to `position`, builder style.
    pub fn with(mut self, key: impl Into<String>, position: u64) -> Self {
        self.pin(key, position);
        self
    }

    /// Pin `key` to `position`, replacing any earlier pin.
    pub fn pin(&mut self, key: impl Into<String>, position: u64) {
        self.positions.insert(key.into(), position);
    }
}

impl KeyHasher for FixedKeyHasher {
    fn hash(&self, key: &str) -> u64 {
        match self.positions.get(key) {
            Some(&position) => position,
            None => self.fallback.hash(key),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
