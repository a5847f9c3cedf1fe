//! Key placement: maps a ring position to the N nodes responsible for it.
//!
//! Members are kept in a `BTreeMap` ordered by `NodeId`, so a placement is a
//! range walk rather than a sort: the ids strictly greater than the key's
//! position come first, ascending, then the walk wraps around to the
//! smallest ids until N have been collected.

use ringkv_common::NodeId;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Walk the ring clockwise from `position`, yielding at most `n` members.
///
/// Never yields the same member twice. Yields fewer than `n` only if the ring
/// itself holds fewer than `n` members.
pub fn walk<V>(
    members: &BTreeMap<NodeId, V>,
    position: u64,
    n: usize,
) -> impl Iterator<Item = (&NodeId, &V)> {
    let start = NodeId::new(position);
    members
        .range((Excluded(start), Unbounded))
        .chain(members.range(..=start))
        .take(n)
}

/// The ids of the `n` members responsible for `position`, in placement order.
pub fn replica_ids<V>(members: &BTreeMap<NodeId, V>, position: u64, n: usize) -> Vec<NodeId> {
    walk(members, position, n).map(|(id, _)| *id).collect()
}
