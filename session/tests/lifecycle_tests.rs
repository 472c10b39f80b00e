mod common;

use std::time::Duration;

use ::common::{PlayerId, SessionId};
use serde_json::json;
use session::lifecycle::{MatchClock, MatchLifecycle, MatchPhase};
use session::store::ReplicatedStore;

use crate::common::{START_MS, TestEnvironment, player, public_options, within};

/// Creates a session with a host and one guest and returns its id
async fn two_player_session(env: &TestEnvironment) -> SessionId {
    let (host, _) = env.directory();
    let (guest, _) = env.directory();
    let created = host.create_session(&player("host"), public_options()).await.unwrap();
    guest
        .join_session(Some(created.session_id.as_str()), &player("guest"))
        .await
        .unwrap();
    created.session_id
}

fn lifecycle(env: &TestEnvironment, session_id: &SessionId, player_id: PlayerId) -> MatchLifecycle {
    MatchLifecycle::new(
        env.shared_store(),
        session_id.clone(),
        player_id,
        env.shared_clock(),
        &env.config,
        180_000,
    )
}

#[tokio::test]
async fn test_host_signals_start_one_lead_ahead() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let host = lifecycle(&env, &session_id, PlayerId::host());

    assert_eq!(within(host.wait_for_players()).await.unwrap(), 2);
    assert_eq!(host.phase(), MatchPhase::AwaitingPlayers);

    // A listing that lags behind the session is brought back in line
    env.store
        .set(&format!("sessionDirectory/{}/playerCount", session_id), json!(1))
        .await
        .unwrap();
    let start_time = host.signal_start().await.unwrap();
    assert_eq!(start_time, START_MS + 4_000);

    let record = env.store.get(&format!("sessions/{}", session_id)).await.unwrap().unwrap();
    assert_eq!(record["started"], json!(true));
    assert_eq!(record["startTime"], json!(START_MS + 4_000));
    assert_eq!(record["playerCount"], json!(2));
    let listed = env.store.get(&format!("sessionDirectory/{}", session_id)).await.unwrap().unwrap();
    assert_eq!(listed["started"], json!(true));
    assert_eq!(listed["playerCount"], json!(2));
    assert_eq!(listed["isPrivate"], json!(false));
}

#[tokio::test]
async fn test_wait_for_players_resolves_on_join() {
    let env = TestEnvironment::new();
    let (host_directory, _) = env.directory();
    let (guest_directory, _) = env.directory();
    let created = host_directory.create_session(&player("host"), public_options()).await.unwrap();
    let host = lifecycle(&env, &created.session_id, PlayerId::host());

    let (count, joined) = tokio::join!(within(host.wait_for_players()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        guest_directory
            .join_session(Some(created.session_id.as_str()), &player("guest"))
            .await
    });
    assert_eq!(count.unwrap(), 2);
    assert_eq!(joined.unwrap().player_id, PlayerId::slot(1));
}

#[tokio::test]
async fn test_every_client_agrees_on_start_time() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let host = lifecycle(&env, &session_id, PlayerId::host());
    let guest = lifecycle(&env, &session_id, PlayerId::slot(1));

    let (guest_clock, host_start) = tokio::join!(within(guest.await_start()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        env.clock.advance(250);
        host.signal_start().await
    });

    let expected = MatchClock { start_time_ms: START_MS + 250 + 4_000, duration_ms: 180_000 };
    assert_eq!(host_start.unwrap(), expected.start_time_ms);
    assert_eq!(guest_clock.unwrap(), expected);
    assert_eq!(guest.phase(), MatchPhase::Countdown);

    // The host reads the same value back
    assert_eq!(within(host.await_start()).await.unwrap(), expected);
}

#[tokio::test]
async fn test_unreadable_start_time_falls_back_to_local_clock() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let guest = lifecycle(&env, &session_id, PlayerId::slot(1));

    env.store.fail_reads(true);
    env.store
        .set(&format!("sessions/{}/started", session_id), json!(true))
        .await
        .unwrap();

    let clock = within(guest.await_start()).await.unwrap();
    assert_eq!(clock.start_time_ms, START_MS + 4_000);
}

#[tokio::test]
async fn test_missing_start_time_falls_back_to_local_clock() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let guest = lifecycle(&env, &session_id, PlayerId::slot(1));

    env.clock.advance(1_000);
    env.store
        .set(&format!("sessions/{}/started", session_id), json!(true))
        .await
        .unwrap();

    let clock = within(guest.await_start()).await.unwrap();
    assert_eq!(clock.start_time_ms, START_MS + 1_000 + 4_000);
}

#[tokio::test]
async fn test_previous_match_start_is_not_reused() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let host = lifecycle(&env, &session_id, PlayerId::host());
    let guest = lifecycle(&env, &session_id, PlayerId::slot(1));

    host.signal_start().await.unwrap();
    let first = within(guest.await_start()).await.unwrap();
    assert_eq!(first.start_time_ms, START_MS + 4_000);
    guest.reset();

    // `started` and `startTime` still hold the first match
    let pending = tokio::time::timeout(Duration::from_millis(100), guest.await_start()).await;
    assert!(pending.is_err(), "stale start flag was accepted");

    env.clock.advance(60_000);
    let (next, _) = tokio::join!(within(guest.await_start()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        env.store
            .set(&format!("sessions/{}/started", session_id), json!(false))
            .await
            .unwrap();
        host.signal_start().await.unwrap()
    });
    assert_eq!(next.unwrap().start_time_ms, START_MS + 60_000 + 4_000);
}

#[tokio::test]
async fn test_new_start_time_counts_while_flag_stays_set() {
    let env = TestEnvironment::new();
    let session_id = two_player_session(&env).await;
    let host = lifecycle(&env, &session_id, PlayerId::host());
    let guest = lifecycle(&env, &session_id, PlayerId::slot(1));

    host.signal_start().await.unwrap();
    within(guest.await_start()).await.unwrap();
    guest.reset();

    // `started` never leaves true; only `startTime` moves
    env.clock.advance(30_000);
    let (next, signalled) = tokio::join!(within(guest.await_start()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.signal_start().await.unwrap()
    });
    assert_eq!(signalled, START_MS + 30_000 + 4_000);
    assert_eq!(next.unwrap().start_time_ms, signalled);
}

#[tokio::test]
async fn test_run_match_moves_through_phases() {
    let env = TestEnvironment::new();
    let session_id = SessionId::parse("CLOCK1").unwrap();
    let mut timeline = lifecycle(&env, &session_id, PlayerId::host());
    timeline.set_duration_ms(50);

    let clock = MatchClock { start_time_ms: START_MS, duration_ms: 50 };
    assert_eq!(timeline.tick(&clock), MatchPhase::Active);

    let mut phases = timeline.phase_changes();
    assert_eq!(within(timeline.run_match(clock)).await, MatchPhase::Ended);
    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), MatchPhase::Ended);

    env.clock.advance(-1_000);
    assert_eq!(timeline.tick(&clock), MatchPhase::Countdown);
    timeline.reset();
    assert_eq!(timeline.phase(), MatchPhase::Idle);
}
