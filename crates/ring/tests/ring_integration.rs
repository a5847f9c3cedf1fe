//! Multi-node chaos integration tests.
//!
//! These tests drive a whole ring built from chaos-wrapped memory nodes,
//! verifying placement, quorum resilience, deadlines, and repair under
//! failure conditions.

use ringkv_common::{FixedKeyHasher, KeyHasher, NodeId, Sha1KeyHasher};
use ringkv_ring::chaos::{ChaosConfig, ChaosNode};
use ringkv_ring::{spawn_repair_task, RepairConfig, Replicator, Ring, RingError, RingOptions};
use ringkv_storage::{MemoryNode, Node};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Duration;

// ────────────────────────── TestCluster ──────────────────────────

struct TestCluster {
    ring: Arc<Ring>,
    chaos: Vec<Arc<ChaosNode<MemoryNode>>>,
}

impl TestCluster {
    fn new(ids: &[u64], hasher: Arc<dyn KeyHasher>, options: RingOptions) -> Self {
        let chaos: Vec<_> = ids
            .iter()
            .map(|&id| {
                Arc::new(ChaosNode::new(
                    MemoryNode::new(NodeId::new(id)),
                    ChaosConfig::default(),
                ))
            })
            .collect();
        let nodes = chaos.iter().map(|c| c.clone() as Arc<dyn Node>).collect();
        let ring = Ring::new(hasher, options, nodes).unwrap();
        Self {
            ring: Arc::new(ring),
            chaos,
        }
    }

    /// Five nodes at 10..=50; "foo" and "baz" hash to 25, "bar" to 45.
    fn scenario(options: RingOptions) -> Self {
        let hasher = FixedKeyHasher::new()
            .with("foo", 25)
            .with("baz", 25)
            .with("bar", 45);
        Self::new(&[10, 20, 30, 40, 50], Arc::new(hasher), options)
    }

    fn random(size: usize, options: RingOptions) -> Self {
        let ids: HashSet<u64> = std::iter::repeat_with(rand::random::<u64>)
            .take(size * 2)
            .collect();
        let ids: Vec<u64> = ids.into_iter().take(size).collect();
        Self::new(&ids, Arc::new(Sha1KeyHasher), options)
    }

    fn node(&self, id: u64) -> &Arc<ChaosNode<MemoryNode>> {
        self.chaos
            .iter()
            .find(|c| c.id() == NodeId::new(id))
            .unwrap()
    }

    /// Number of nodes physically holding `key`.
    async fn copies_of(&self, key: &str) -> usize {
        let mut n = 0;
        for c in &self.chaos {
            if c.inner().get(key).await.unwrap().is_some() {
                n += 1;
            }
        }
        n
    }
}

// ────────────────────────── Placement ──────────────────────────

#[tokio::test]
async fn test_scenario_placement_and_storage() {
    let cluster = TestCluster::scenario(RingOptions::default());

    cluster.ring.put("foo", "1", None).await.unwrap();
    cluster.ring.put("bar", "2", None).await.unwrap();

    for id in [30, 40, 50] {
        assert_eq!(
            cluster.node(id).inner().get("foo").await.unwrap().as_deref(),
            Some("1")
        );
    }
    for id in [50, 10, 20] {
        assert_eq!(
            cluster.node(id).inner().get("bar").await.unwrap().as_deref(),
            Some("2")
        );
    }
    assert_eq!(cluster.copies_of("foo").await, 3);
    assert_eq!(cluster.copies_of("bar").await, 3);
}

#[tokio::test]
async fn test_every_key_stored_exactly_n_times() {
    let cluster = TestCluster::random(7, RingOptions::default());
    for i in 0..100 {
        cluster
            .ring
            .put(&format!("key-{}", i), "v", None)
            .await
            .unwrap();
    }
    for i in 0..100 {
        assert_eq!(cluster.copies_of(&format!("key-{}", i)).await, 3);
    }
}

// ────────────────────────── Failures ──────────────────────────

#[tokio::test]
async fn test_read_survives_two_replica_failures() {
    let cluster = TestCluster::scenario(RingOptions::default());
    cluster.ring.put("foo", "v", None).await.unwrap();

    cluster.node(30).fail();
    cluster.node(40).fail();
    assert_eq!(
        cluster.ring.get("foo", None).await.unwrap().as_deref(),
        Some("v")
    );

    cluster.node(50).fail();
    assert!(matches!(
        cluster.ring.get("foo", None).await,
        Err(RingError::QuorumNotReached { .. })
    ));
}

#[tokio::test]
async fn test_majority_quorum_under_failures() {
    let options = RingOptions {
        write_quorum: 2,
        read_quorum: 2,
        ..Default::default()
    };
    let cluster = TestCluster::scenario(options);

    cluster.node(40).fail();
    let outcome = cluster.ring.put("foo", "v", None).await.unwrap();
    assert_eq!(outcome.missed, vec![NodeId::new(40)]);

    cluster.node(50).fail();
    assert!(matches!(
        cluster.ring.put("foo", "w", None).await,
        Err(RingError::QuorumNotReached { needed: 2, got: 1 })
    ));

    // Only one clean answer for a missing key is not enough to report absence.
    assert!(matches!(
        cluster.ring.get("baz", None).await,
        Err(RingError::QuorumNotReached { needed: 2, got: 1 })
    ));
}

#[tokio::test]
async fn test_random_failures_do_not_break_quorum_one() {
    let cluster = TestCluster::scenario(RingOptions::default());
    for c in &cluster.chaos {
        c.set_failure_rate(0.2).await;
    }

    let mut succeeded = 0;
    for i in 0..50 {
        if cluster.ring.put(&format!("k{}", i), "v", None).await.is_ok() {
            succeeded += 1;
        }
    }
    // All three replicas failing at once is rare at 20%.
    assert!(succeeded >= 40, "only {} of 50 puts succeeded", succeeded);
}

#[tokio::test]
async fn test_deadline_expires_on_slow_ring() {
    let options = RingOptions {
        op_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let cluster = TestCluster::scenario(options);
    for id in [30, 40, 50] {
        cluster.node(id).set_latency(Duration::from_secs(10)).await;
    }

    let started = tokio::time::Instant::now();
    let result = cluster.ring.put("foo", "v", None).await;
    assert!(matches!(result, Err(RingError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));

    // A per-call override extends the deadline.
    for id in [30, 40, 50] {
        cluster.node(id).set_latency(Duration::from_millis(150)).await;
    }
    cluster
        .ring
        .put("foo", "v", Some(Duration::from_secs(5)))
        .await
        .unwrap();
}

// ────────────────────────── Membership + repair ──────────────────────────

#[tokio::test]
async fn test_repair_after_recovery_restores_full_replication() {
    let cluster = TestCluster::scenario(RingOptions::default());
    cluster.node(40).fail();
    for key in ["foo", "bar"] {
        cluster.ring.put(key, "v", None).await.unwrap();
    }
    assert_eq!(cluster.copies_of("foo").await, 2);

    cluster.node(40).recover();
    let report = Replicator::new(cluster.ring.clone()).repair().await;
    assert_eq!(report.copies, 1);
    assert_eq!(cluster.copies_of("foo").await, 3);
    assert_eq!(cluster.copies_of("bar").await, 3);
}

#[tokio::test]
async fn test_drop_then_repair_refills_replica_sets() {
    let cluster = TestCluster::scenario(RingOptions::default());
    cluster.ring.put("foo", "v", None).await.unwrap();

    // foo's replicas become [40, 50, 10].
    cluster.ring.drop_node(NodeId::new(30)).unwrap();
    let report = Replicator::new(cluster.ring.clone()).repair().await;
    assert_eq!(report.copies, 1);
    assert_eq!(
        cluster.node(10).inner().get("foo").await.unwrap().as_deref(),
        Some("v")
    );
    assert_eq!(
        cluster.ring.get("foo", None).await.unwrap().as_deref(),
        Some("v")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_puts_and_repair() {
    let cluster = TestCluster::random(8, RingOptions::default());
    let task = spawn_repair_task(
        cluster.ring.clone(),
        RepairConfig {
            interval: Duration::from_millis(10),
        },
    );

    let mut handles = Vec::new();
    for t in 0..8 {
        let ring = cluster.ring.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                ring.put(&format!("t{}-{}", t, i), &format!("{}", i), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    task.shutdown().await.unwrap();

    for t in 0..8 {
        for i in 0..50 {
            let key = format!("t{}-{}", t, i);
            assert_eq!(
                cluster.ring.get(&key, None).await.unwrap(),
                Some(format!("{}", i))
            );
        }
    }
}

#[tokio::test]
async fn test_background_repair_heals_after_node_recovers() {
    let cluster = TestCluster::scenario(RingOptions::default());
    let task = spawn_repair_task(
        cluster.ring.clone(),
        RepairConfig {
            interval: Duration::from_millis(20),
        },
    );

    cluster.node(20).fail();
    cluster.ring.put("bar", "v", None).await.unwrap();
    cluster.node(20).recover();

    let healed = tokio::time::timeout(Duration::from_secs(5), async {
        while cluster.node(20).inner().get("bar").await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(healed.is_ok(), "node 20 was never repaired");

    task.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_slow_sweep() {
    let options = RingOptions {
        op_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let cluster = TestCluster::scenario(options);
    for i in 0..20 {
        cluster
            .ring
            .put(&format!("k{}", i), "v", None)
            .await
            .unwrap();
    }
    for c in &cluster.chaos {
        c.set_latency(Duration::from_millis(20)).await;
    }

    let task = spawn_repair_task(
        cluster.ring.clone(),
        RepairConfig {
            interval: Duration::from_secs(60),
        },
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A full sweep at this latency takes seconds; shutdown must not wait for it.
    let stopped = tokio::time::timeout(Duration::from_secs(2), task.shutdown()).await;
    assert!(stopped.is_ok(), "repair task did not stop");
    assert_eq!(cluster.ring.metrics().repair_sweeps.get(), 0);
}
