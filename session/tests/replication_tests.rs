mod common;

use ::common::{NormalizedPoint, PlayerId, PlayerMode, SessionId};
use serde_json::json;
use session::replication::{PlayerStatePatch, PlayerUpdate, StateChannel};
use session::store::ReplicatedStore;

use crate::common::{TestEnvironment, player, within};

fn room() -> SessionId {
    SessionId::parse("ROOM42").unwrap()
}

#[tokio::test]
async fn test_subscription_delivers_snapshot_then_live_changes() {
    let env = TestEnvironment::new();
    let host = StateChannel::new(env.shared_store(), room(), PlayerId::host());
    let guest = StateChannel::new(env.shared_store(), room(), PlayerId::slot(1));

    host.publish_full(&player("host")).await.unwrap();
    let mut updates = host.subscribe().await.unwrap();

    match within(updates.next()).await.unwrap() {
        PlayerUpdate::Changed { player_id, state } => {
            assert_eq!(player_id, PlayerId::host());
            assert_eq!(state.player_name, "host");
        }
        other => panic!("unexpected update {:?}", other),
    }

    let mut guest_state = player("guest");
    guest_state.set_position(NormalizedPoint::new(0.5, 0.25));
    guest.publish_full(&guest_state).await.unwrap();

    let update = within(updates.next()).await.unwrap();
    assert_eq!(update, PlayerUpdate::Changed { player_id: PlayerId::slot(1), state: guest_state });
}

#[tokio::test]
async fn test_partial_publish_leaves_other_fields() {
    let env = TestEnvironment::new();
    let guest = StateChannel::new(env.shared_store(), room(), PlayerId::slot(1));

    let mut state = player("guest");
    state.mode = PlayerMode::Fill;
    state.ink = 42.0;
    guest.publish_full(&state).await.unwrap();
    guest
        .publish_partial(&PlayerStatePatch::position(NormalizedPoint::new(0.75, 0.5)))
        .await
        .unwrap();

    let node = env.store.get("sessions/ROOM42/players/player1").await.unwrap().unwrap();
    assert_eq!(node["normX"], json!(0.75));
    assert_eq!(node["normY"], json!(0.5));
    assert_eq!(node["mode"], json!("FILL"));
    assert_eq!(node["ink"], json!(42.0));
    assert_eq!(node["playerName"], json!("guest"));

    // Nothing to write
    guest.publish_partial(&PlayerStatePatch::default()).await.unwrap();
}

#[tokio::test]
async fn test_malformed_player_nodes_are_dropped() {
    let env = TestEnvironment::new();
    let host = StateChannel::new(env.shared_store(), room(), PlayerId::host());
    let guest = StateChannel::new(env.shared_store(), room(), PlayerId::slot(1));
    let mut updates = host.subscribe().await.unwrap();

    env.store
        .set("sessions/ROOM42/players/player9", json!({"normX": "left"}))
        .await
        .unwrap();
    guest.publish_full(&player("guest")).await.unwrap();

    match within(updates.next()).await.unwrap() {
        PlayerUpdate::Changed { player_id, .. } => assert_eq!(player_id, PlayerId::slot(1)),
        other => panic!("unexpected update {:?}", other),
    }
    assert_eq!(updates.dropped_records(), 1);
}

#[tokio::test]
async fn test_removed_player_is_reported() {
    let env = TestEnvironment::new();
    let host = StateChannel::new(env.shared_store(), room(), PlayerId::host());
    let guest = StateChannel::new(env.shared_store(), room(), PlayerId::slot(1));

    guest.publish_full(&player("guest")).await.unwrap();
    let mut updates = host.subscribe().await.unwrap();
    within(updates.next()).await.unwrap();

    env.store.remove("sessions/ROOM42/players/player1").await.unwrap();
    let update = within(updates.next()).await.unwrap();
    assert_eq!(update, PlayerUpdate::Removed { player_id: PlayerId::slot(1) });
}

#[tokio::test]
async fn test_cancelled_subscription_stops() {
    let env = TestEnvironment::new();
    let host = StateChannel::new(env.shared_store(), room(), PlayerId::host());
    let mut updates = host.subscribe().await.unwrap();

    updates.cancel();
    assert!(within(updates.next()).await.is_err());
}
