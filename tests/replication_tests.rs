mod common;

use async_trait::async_trait;
use common::test_utils::test_config;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use term_bloom_rs::snapshot;
use term_bloom_rs::{
    BloomStateMachine, Command, CommandOutcome, FilterConfig, LocalReplicator,
    Replicator, StateMachine, Store, StoreConfig, StoreConfigBuilder,
    StoreError, StoreResult,
};

fn filter_config() -> FilterConfig {
    test_config(50, 1e-6, 3)
}

fn store_config(timeout: Duration) -> StoreConfig {
    StoreConfigBuilder::default()
        .filter(filter_config())
        .apply_timeout(timeout)
        .snapshot_threshold(64)
        .build()
        .unwrap()
}

fn replica() -> Arc<BloomStateMachine> {
    Arc::new(BloomStateMachine::new(filter_config()).unwrap())
}

struct Cluster {
    store: Store,
    replicator: Arc<LocalReplicator>,
    replicas: Vec<Arc<BloomStateMachine>>,
}

async fn setup_cluster(followers: usize) -> Cluster {
    let leader = replica();
    let replicator = Arc::new(LocalReplicator::new(leader.clone(), 64));
    let mut replicas = vec![leader.clone()];
    for _ in 0..followers {
        let follower = replica();
        replicator.add_replica(follower.clone()).await.unwrap();
        replicas.push(follower);
    }
    let store = Store::with_replicator(
        store_config(Duration::from_secs(5)),
        leader,
        replicator.clone(),
    );
    Cluster {
        store,
        replicator,
        replicas,
    }
}

/// Never commits anything
struct StalledReplicator;

#[async_trait]
impl Replicator for StalledReplicator {
    fn is_leader(&self) -> bool {
        true
    }

    async fn propose(&self, _command: Vec<u8>) -> StoreResult<CommandOutcome> {
        std::future::pending().await
    }

    async fn compact(&self) -> StoreResult<Vec<u8>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_replicas_stay_identical() {
    let cluster = setup_cluster(2).await;
    let mut rng = rand::rng();

    for i in 0..600 {
        let key = format!("event_{}", rng.random_range(0..400));
        if i % 97 == 0 {
            // capacity rotation may already have moved the window
            let (_, latest) = cluster.store.terms().unwrap();
            let next = latest + rng.random_range(1..3);
            cluster.store.set_with_term(next, &key).await.unwrap();
        } else {
            cluster.store.set(&key).await.unwrap();
        }
    }

    let expected = cluster.replicas[0].snapshot().unwrap();
    for replica in &cluster.replicas[1..] {
        assert_eq!(replica.snapshot().unwrap(), expected);
        assert_eq!(replica.terms().unwrap(), cluster.store.terms().unwrap());
    }
}

#[tokio::test]
async fn test_late_replica_catches_up() {
    let cluster = setup_cluster(0).await;
    for i in 0..200 {
        cluster.store.set(&format!("k{i}")).await.unwrap();
    }
    // 200 entries with a threshold of 64: part snapshot, part log
    assert_eq!(cluster.replicator.commit_index().await, 200);
    assert_eq!(cluster.replicator.log_len().await, 200 % 64);

    let late = replica();
    cluster.replicator.add_replica(late.clone()).await.unwrap();
    assert_eq!(
        late.snapshot().unwrap(),
        cluster.replicas[0].snapshot().unwrap()
    );

    cluster.store.set("after").await.unwrap();
    assert!(late.local_check("after").unwrap());
}

#[tokio::test]
async fn test_writes_rejected_off_leader() {
    let cluster = setup_cluster(1).await;
    assert!(!cluster.store.set("before").await.unwrap());

    cluster.replicator.set_leader(false);
    assert!(!cluster.store.is_leader());
    let err = cluster.store.set("rejected").await.unwrap_err();
    assert!(matches!(err, StoreError::NotLeader));
    let err = cluster.store.check_consistent("before").await.unwrap_err();
    assert!(matches!(err, StoreError::NotLeader));

    // local reads still work and nothing reached any replica
    assert!(cluster.store.check("before").unwrap());
    for replica in &cluster.replicas {
        assert!(!replica.local_check("rejected").unwrap());
    }

    cluster.replicator.set_leader(true);
    assert!(!cluster.store.set("rejected").await.unwrap());
}

#[tokio::test]
async fn test_write_timeout() {
    let timeout = Duration::from_millis(50);
    let store = Store::with_replicator(
        store_config(timeout),
        replica(),
        Arc::new(StalledReplicator),
    );

    let err = store.set("slow").await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(t) if t == timeout));
    assert!(!store.check("slow").unwrap());
}

#[tokio::test]
async fn test_expired_term_reaches_client() {
    let cluster = setup_cluster(1).await;
    cluster.store.set_with_term(4, "a").await.unwrap();
    let err = cluster.store.set_with_term(2, "b").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Filter(term_bloom_rs::FilterError::ExpiredTerm {
            current: 4,
            given: 2
        })
    ));
    for replica in &cluster.replicas {
        assert_eq!(replica.terms().unwrap(), (2, 4));
        assert!(!replica.local_check("b").unwrap());
    }
}

#[tokio::test]
async fn test_manual_snapshot() {
    let cluster = setup_cluster(0).await;
    cluster.store.set("x").await.unwrap();
    let bytes = cluster.store.snapshot().await.unwrap();
    assert_eq!(cluster.replicator.log_len().await, 0);

    let restored = replica();
    restored.restore(&bytes).unwrap();
    assert!(restored.local_check("x").unwrap());
}

#[test]
fn test_concurrent_readers_during_apply() {
    let retention = 40;
    let total = 2_000;
    // 100 keys per term: the writer crosses ~20 rotations, all retained
    let machine =
        BloomStateMachine::new(test_config(100, 1e-7, retention)).unwrap();
    let written = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..total {
                let command =
                    Command::set(format!("key_{i}")).encode().unwrap();
                machine.apply(&command).unwrap();
                written.store(i + 1, Ordering::Release);
            }
            done.store(true, Ordering::Release);
        });

        for reader in 0..3 {
            let (machine, written, done) = (&machine, &written, &done);
            scope.spawn(move || {
                let mut rng = rand::rng();
                let mut snapshots = 0;
                while !done.load(Ordering::Acquire) || snapshots == 0 {
                    let upto = written.load(Ordering::Acquire);
                    if upto > 0 {
                        let i = rng.random_range(0..upto);
                        assert!(
                            machine.local_check(&format!("key_{i}")).unwrap(),
                            "reader {reader} lost key_{i}"
                        );
                    }

                    if rng.random_range(0..20) == 0 {
                        let bytes = machine.snapshot().unwrap();
                        let window =
                            snapshot::read_window(&mut bytes.as_slice())
                                .unwrap();
                        let header = window.header;
                        assert!(header.earliest <= header.latest);
                        assert!(header.latest - header.earliest < retention);
                        let latest = header.latest;
                        assert!(window.terms.iter().any(|t| t.term == latest));
                        snapshots += 1;
                    }
                }
            });
        }
    });

    assert_eq!(written.load(Ordering::Acquire), total);
    assert!(machine.terms().unwrap().1 >= 19);
}
