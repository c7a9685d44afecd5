//! Daemon-level scenarios: full supervisors over shared collaborators.

use std::sync::Arc;
use std::time::Duration;

use pgsentinel_server::bus::MemoryBus;
use pgsentinel_server::kv::{KvStore, MemoryKv};
use pgsentinel_server::supervisor;
use tokio::time::timeout;

use crate::helpers::{self, FakeDb, PREFIX};

/// Three whole daemons, health probes and all, discover the primary is
/// gone and promote the standby, every peer exiting 0.
#[tokio::test]
async fn fleet_promotes_and_exits_clean() {
    let dir = tempfile::tempdir().unwrap();
    let trigger = dir.path().join("trigger");
    let cluster = helpers::cluster(&trigger);

    let kv = Arc::new(MemoryKv::new());
    helpers::seed_kv(&kv, &cluster).await;
    let bus = Arc::new(MemoryBus::new());

    // each peer reads one healthy position, then loses the primary for good
    let peers = [("h1", "0/50"), ("h2", "0/60"), ("h3", "0/55")].map(|(host, wal)| {
        let db = Arc::new(
            FakeDb::new()
                .primary_script([FakeDb::ok(wal)])
                .standby_wal("0/5A"),
        );
        let kv = Arc::clone(&kv);
        let bus = Arc::clone(&bus);
        (
            host,
            tokio::spawn(async move { supervisor::run(kv, bus, db, PREFIX, host).await }),
        )
    });

    for (host, handle) in peers {
        let code = timeout(Duration::from_secs(10), handle)
            .await
            .unwrap_or_else(|_| panic!("{host} did not exit"))
            .unwrap();
        assert_eq!(code, 0, "{host} should exit clean after the promotion");
    }

    assert!(trigger.exists(), "the standby must have been triggered");
    assert_eq!(
        kv.get(&format!("{PREFIX}/prod/master/fqdn"))
            .await
            .unwrap()
            .unwrap(),
        "h2",
        "the kv primary must point at the promoted standby"
    );
}

/// A probe that dies before ever reading a WAL position takes the daemon
/// down with the no-baseline code.
#[tokio::test]
async fn probe_without_baseline_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = helpers::cluster(&dir.path().join("trigger"));

    let kv = Arc::new(MemoryKv::new());
    helpers::seed_kv(&kv, &cluster).await;
    let bus = Arc::new(MemoryBus::new());
    // never a valid answer: the probe must refuse to vote and die instead
    let db = Arc::new(FakeDb::new());

    let code = timeout(
        Duration::from_secs(10),
        supervisor::run(kv, bus, db, PREFIX, "h1"),
    )
    .await
    .expect("supervisor did not exit");
    assert_eq!(code, 4);
}

/// Any child dying brings down every task of every cluster, promptly.
#[tokio::test]
async fn crashed_child_stops_the_whole_daemon_with_3() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());

    // two clusters, four tasks
    let mut first = helpers::cluster(&dir.path().join("trigger-prod"));
    first.name = "prod".into();
    helpers::seed_kv(&kv, &first).await;
    let mut second = helpers::cluster(&dir.path().join("trigger-staging"));
    second.name = "staging".into();
    helpers::seed_kv(&kv, &second).await;

    let bus = Arc::new(MemoryBus::new());
    let db = Arc::new(FakeDb::panicking());

    let code = timeout(
        Duration::from_secs(10),
        supervisor::run(kv, bus, db, PREFIX, "h1"),
    )
    .await
    .expect("supervisor must exit within one supervision tick");
    assert_eq!(code, 3);
}
