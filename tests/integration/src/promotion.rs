//! Elector-level protocol scenarios: three peers on one bus.

use std::sync::Arc;
use std::time::Duration;

use pgsentinel_server::bus::{Bus, MemoryBus};
use pgsentinel_server::error::SentinelError;
use pgsentinel_server::kv::{KvStore, MemoryKv};
use tokio::time::timeout;

use crate::helpers::{self, FakeDb, CHANNEL, PREFIX};

struct Fleet {
    kv: Arc<MemoryKv>,
    bus: Arc<MemoryBus>,
    tap: pgsentinel_server::bus::Subscription,
    handles: Vec<(
        &'static str,
        tokio::task::JoinHandle<Result<(), SentinelError>>,
    )>,
    _dir: tempfile::TempDir,
    trigger: std::path::PathBuf,
}

/// Three electors `h1`, `h2`, `h3` watching `prod`, standby `h2`, plus a
/// tap on the channel that sees every line.
async fn fleet(standby_wal: &str) -> Fleet {
    let dir = tempfile::tempdir().unwrap();
    let trigger = dir.path().join("trigger");
    let cluster = helpers::cluster(&trigger);

    let kv = Arc::new(MemoryKv::new());
    helpers::seed_kv(&kv, &cluster).await;
    let bus = Arc::new(MemoryBus::new());
    let db = Arc::new(FakeDb::new().standby_wal(standby_wal));

    let tap = bus.subscribe(CHANNEL).await.unwrap();
    let handles = ["h1", "h2", "h3"]
        .map(|host| (host, helpers::spawn_elector(&cluster, host, &kv, &bus, &db)))
        .into_iter()
        .collect();
    helpers::settle().await;

    Fleet {
        kv,
        bus,
        tap,
        handles,
        _dir: dir,
        trigger,
    }
}

async fn publish_sdowns(bus: &MemoryBus, votes: &[(&str, &str)]) {
    for (voter, wal) in votes {
        bus.publish(CHANNEL, &format!("+SDOWN pg-m {voter} {wal}"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn clean_promotion() {
    let mut fleet = fleet("0/5A").await;

    publish_sdowns(&fleet.bus, &[("h1", "0/50"), ("h2", "0/60"), ("h3", "0/55")]).await;

    // every elector exits cleanly: h2 after promoting, the rest on NEWMASTER
    for (host, handle) in fleet.handles {
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap_or_else(|_| panic!("{host} did not exit"))
            .unwrap();
        assert!(result.is_ok(), "{host} should exit cleanly");
    }

    // the promotion side effects all happened
    assert!(fleet.trigger.exists(), "trigger file must exist");
    assert_eq!(
        fleet
            .kv
            .get(&format!("{PREFIX}/prod/master/fqdn"))
            .await
            .unwrap()
            .unwrap(),
        "h2"
    );
    assert_eq!(
        fleet
            .kv
            .get(&format!("{PREFIX}/prod/master/ip"))
            .await
            .unwrap()
            .unwrap(),
        "10.0.0.2"
    );

    // protocol invariants over the full trace
    let lines = helpers::drain(&mut fleet.tap, Duration::from_millis(300)).await;

    let odowns = helpers::per_voter_counts(&lines, "+ODOWN ");
    assert!(!odowns.is_empty(), "someone must declare ODOWN");
    assert!(
        odowns.values().all(|&n| n == 1),
        "at most one +ODOWN per elector, got {odowns:?}"
    );

    let selects: Vec<&String> = lines.iter().filter(|l| l.starts_with("+SELECT ")).collect();
    assert!(selects.len() >= 2, "quorum needs at least two endorsements");
    assert!(
        selects.iter().all(|l| l.split_whitespace().nth(1) == Some("h2")),
        "every endorsement names the standby: {selects:?}"
    );
    let select_counts = helpers::per_voter_counts(&lines, "+SELECT ");
    assert!(
        select_counts.values().all(|&n| n == 1),
        "at most one +SELECT per elector, got {select_counts:?}"
    );

    let newmasters = lines.iter().filter(|l| *l == "+NEWMASTER").count();
    assert_eq!(newmasters, 1, "exactly one peer promotes");
}

#[tokio::test]
async fn transient_blip_never_escalates() {
    let mut fleet = fleet("0/5A").await;

    fleet
        .bus
        .publish(CHANNEL, "+SDOWN pg-m h1 0/50")
        .await
        .unwrap();
    fleet.bus.publish(CHANNEL, "-SDOWN pg-m h1").await.unwrap();

    let lines = helpers::drain(&mut fleet.tap, Duration::from_millis(300)).await;
    assert!(
        !lines.iter().any(|l| l.starts_with("+ODOWN")),
        "a rescinded vote must not escalate: {lines:?}"
    );

    // the daemon keeps running
    for (host, handle) in &fleet.handles {
        assert!(!handle.is_finished(), "{host} should still be watching");
    }
    for (_, handle) in fleet.handles {
        handle.abort();
    }
}

#[tokio::test]
async fn lag_unsafe_standby_stalls_the_election() {
    // standby is ~4 GB behind the last known primary position
    let mut fleet = fleet("0/10").await;

    publish_sdowns(&fleet.bus, &[("h1", "0/FFFFFFFF"), ("h3", "0/FFFFFFFF")]).await;

    let lines = helpers::drain(&mut fleet.tap, Duration::from_millis(300)).await;
    assert!(
        lines.iter().any(|l| l.starts_with("+ODOWN")),
        "quorum was reached, ODOWN must fire: {lines:?}"
    );
    assert!(
        !lines.iter().any(|l| l.starts_with("+SELECT")),
        "an unsafe standby must not be endorsed: {lines:?}"
    );
    assert!(
        !lines.iter().any(|l| l == "+NEWMASTER"),
        "no promotion may happen: {lines:?}"
    );
    assert!(!fleet.trigger.exists(), "no trigger file may be created");

    // everyone stalls in place rather than dying
    for (host, handle) in &fleet.handles {
        assert!(!handle.is_finished(), "{host} should stall, not exit");
    }
    for (_, handle) in fleet.handles {
        handle.abort();
    }
}

#[tokio::test]
async fn malformed_standby_answer_kills_every_checker() {
    let fleet = fleet("whatever-this-is").await;

    publish_sdowns(&fleet.bus, &[("h1", "0/50"), ("h3", "0/55")]).await;

    for (host, handle) in fleet.handles {
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap_or_else(|_| panic!("{host} did not exit"))
            .unwrap();
        let err = result.expect_err("a garbage standby answer is fatal");
        assert!(
            matches!(err, SentinelError::MalformedStandbyWal(_)),
            "{host}: unexpected error {err}"
        );
        assert_eq!(err.exit_code(), 5);
    }

    assert!(!fleet.trigger.exists());
}

#[tokio::test]
async fn duplicate_delivery_is_tolerated() {
    let mut fleet = fleet("0/5A").await;

    // the bus is at-least-once: replay every vote twice
    publish_sdowns(
        &fleet.bus,
        &[
            ("h1", "0/50"),
            ("h1", "0/50"),
            ("h2", "0/60"),
            ("h2", "0/60"),
            ("h3", "0/55"),
        ],
    )
    .await;

    for (host, handle) in fleet.handles {
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap_or_else(|_| panic!("{host} did not exit"))
            .unwrap();
        assert!(result.is_ok(), "{host} should exit cleanly");
    }

    let lines = helpers::drain(&mut fleet.tap, Duration::from_millis(300)).await;
    let odowns = helpers::per_voter_counts(&lines, "+ODOWN ");
    assert!(odowns.values().all(|&n| n == 1), "latches hold: {odowns:?}");
    assert_eq!(lines.iter().filter(|l| *l == "+NEWMASTER").count(), 1);
}
