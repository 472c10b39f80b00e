mod common;

use std::time::Duration;

use serde_json::{Value, json};
use session::SessionConfig;
use session::reaper::{SessionReaper, StaleReason};
use session::store::ReplicatedStore;
use tokio_util::sync::CancellationToken;

use crate::common::{START_MS, TestEnvironment, eventually, player, public_options, within};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn record(created_at: i64, last_activity_at: i64, active: bool) -> Value {
    json!({
        "players": {"player0": {"active": active, "playerName": "p"}},
        "mazeSeed": 7,
        "matchDurationMs": 180000,
        "mazeComplexity": "LOW",
        "gameMode": "COVERAGE",
        "isPrivate": false,
        "createdAt": created_at,
        "lastActivityAt": last_activity_at,
        "started": false,
        "playerCount": 1
    })
}

async fn seed(env: &TestEnvironment, code: &str, record: Value) {
    env.store.set(&format!("sessions/{}", code), record).await.unwrap();
    env.store
        .set(
            &format!("sessionDirectory/{}", code),
            json!({"isPrivate": false, "playerCount": 1, "started": false, "createdAt": 0}),
        )
        .await
        .unwrap();
}

async fn exists(env: &TestEnvironment, code: &str) -> bool {
    env.store.get(&format!("sessions/{}", code)).await.unwrap().is_some()
}

#[tokio::test]
async fn test_sweep_deletes_only_stale_sessions() {
    let env = TestEnvironment::new();
    let now = START_MS;
    seed(&env, "EXPIRD", record(now - 5 * HOUR_MS, now - 4 * HOUR_MS, true)).await;
    seed(&env, "EMPTY1", record(now - HOUR_MS, now - 60_000, false)).await;
    seed(&env, "LIVE01", record(now - HOUR_MS, now - 60_000, true)).await;
    seed(&env, "FRESH1", record(now - 60_000, now - 60_000, false)).await;

    let reaper = SessionReaper::new(env.shared_store(), env.shared_clock(), &env.config);
    let mut report = reaper.sweep().await;
    report.deleted.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(report.scanned, 4);
    assert_eq!(report.failures, 0);
    assert_eq!(
        report.deleted,
        vec![("EMPTY1".to_string(), StaleReason::Abandoned), ("EXPIRD".to_string(), StaleReason::Expired)]
    );
    assert!(exists(&env, "LIVE01").await);
    assert!(exists(&env, "FRESH1").await);
    assert!(!exists(&env, "EXPIRD").await);
    assert_eq!(env.store.get("sessionDirectory/EXPIRD").await.unwrap(), None);
    assert!(env.store.get("sessionDirectory/LIVE01").await.unwrap().is_some());
}

#[tokio::test]
async fn test_records_without_timestamps_are_expired() {
    let env = TestEnvironment::new();
    env.store
        .set("sessions/BROKEN", json!({"players": {"player0": {"active": true}}}))
        .await
        .unwrap();

    let reaper = SessionReaper::new(env.shared_store(), env.shared_clock(), &env.config);
    let report = reaper.sweep().await;
    assert_eq!(report.deleted, vec![("BROKEN".to_string(), StaleReason::Expired)]);
}

#[tokio::test]
async fn test_scan_is_bounded_to_oldest_sessions() {
    let env = TestEnvironment::with_config(SessionConfig { reaper_scan_limit: 2, ..SessionConfig::default() });
    for (i, code) in ["OLD001", "OLD002", "OLD003"].iter().enumerate() {
        let created_at = START_MS - 10 * HOUR_MS + i as i64;
        seed(&env, code, record(created_at, created_at, false)).await;
    }

    let reaper = SessionReaper::new(env.shared_store(), env.shared_clock(), &env.config);
    let report = reaper.sweep().await;
    assert_eq!(report.scanned, 2);
    assert!(!exists(&env, "OLD001").await);
    assert!(!exists(&env, "OLD002").await);
    assert!(exists(&env, "OLD003").await);
}

#[tokio::test]
async fn test_failed_scan_is_not_fatal() {
    let env = TestEnvironment::new();
    seed(&env, "EXPIRD", record(0, 0, true)).await;
    env.store.fail_reads(true);

    let reaper = SessionReaper::new(env.shared_store(), env.shared_clock(), &env.config);
    let report = reaper.sweep().await;
    assert_eq!(report.scanned, 0);
    assert!(report.deleted.is_empty());

    env.store.fail_reads(false);
    env.store.fail_writes(true);
    let report = reaper.sweep().await;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.failures, 1);
}

#[tokio::test]
async fn test_create_session_triggers_sweep() {
    let env = TestEnvironment::new();
    seed(&env, "EXPIRD", record(0, 0, true)).await;

    let (host, _) = env.directory();
    let created = host.create_session(&player("host"), public_options()).await.unwrap();

    let env = &env;
    eventually(move || async move { !exists(env, "EXPIRD").await }).await;
    assert!(exists(env, created.session_id.as_str()).await);
}

#[tokio::test]
async fn test_periodic_reaper_stops_on_cancel() {
    let env = TestEnvironment::new();
    let reaper = SessionReaper::new(env.shared_store(), env.shared_clock(), &env.config);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { reaper.run(Duration::from_millis(10), cancel).await }
    });
    seed(&env, "EXPIRD", record(0, 0, true)).await;
    let env = &env;
    eventually(move || async move { !exists(env, "EXPIRD").await }).await;

    cancel.cancel();
    within(task).await.unwrap();
}
