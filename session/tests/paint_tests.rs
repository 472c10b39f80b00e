mod common;

use std::time::Duration;

use ::common::{Color, NormalizedPoint, PlayerId, SessionId};
use session::paint::PaintStream;
use session::store::ReplicatedStore;

use crate::common::{START_MS, TestEnvironment, within};

const RED: Color = Color::rgb(0xE6, 0x39, 0x46);
const BLUE: Color = Color::rgb(0x1D, 0x35, 0x57);

fn streams(env: &TestEnvironment) -> (PaintStream, PaintStream) {
    let room = SessionId::parse("PAINT1").unwrap();
    (
        PaintStream::new(env.shared_store(), room.clone(), PlayerId::host()),
        PaintStream::new(env.shared_store(), room, PlayerId::slot(1)),
    )
}

#[tokio::test]
async fn test_own_events_are_not_delivered() {
    let env = TestEnvironment::new();
    let (host, guest) = streams(&env);
    let mut events = host.subscribe_from_now().await.unwrap();

    for i in 0..3 {
        host.publish(RED, Some(NormalizedPoint::new(0.1 * i as f64, 0.5))).await.unwrap();
    }
    guest.publish(BLUE, Some(NormalizedPoint::new(0.3, 0.6))).await.unwrap();

    let event = within(events.next()).await.unwrap();
    assert_eq!(event.player, PlayerId::slot(1));
    assert_eq!(event.color, BLUE);
    assert_eq!(event.point(), NormalizedPoint::new(0.3, 0.6));
    assert_eq!(event.timestamp, START_MS);

    // Only the host's events are left, so nothing more arrives
    let more = tokio::time::timeout(Duration::from_millis(100), events.next()).await;
    assert!(more.is_err());
}

#[tokio::test]
async fn test_subscription_starts_from_now() {
    let env = TestEnvironment::new();
    let (host, guest) = streams(&env);

    guest.publish(BLUE, Some(NormalizedPoint::new(0.9, 0.9))).await.unwrap();
    env.clock.advance(10);
    let mut events = host.subscribe_from_now().await.unwrap();
    guest.publish(BLUE, Some(NormalizedPoint::new(0.2, 0.2))).await.unwrap();

    let event = within(events.next()).await.unwrap();
    assert_eq!(event.point(), NormalizedPoint::new(0.2, 0.2));
    assert_eq!(event.timestamp, START_MS + 10);
}

#[tokio::test]
async fn test_events_without_coordinates_are_not_sent() {
    let env = TestEnvironment::new();
    let (host, _) = streams(&env);

    assert_eq!(host.publish(RED, None).await.unwrap(), None);
    assert_eq!(env.store.get("sessions/PAINT1/paint").await.unwrap(), None);

    let key = host.publish(RED, Some(NormalizedPoint::new(0.0, 1.0))).await.unwrap();
    assert!(key.is_some());
    host.clear().await.unwrap();
    assert_eq!(env.store.get("sessions/PAINT1/paint").await.unwrap(), None);
}

#[tokio::test]
async fn test_malformed_events_are_skipped() {
    let env = TestEnvironment::new();
    let (host, guest) = streams(&env);
    let mut events = host.subscribe_from_now().await.unwrap();

    env.store
        .push("sessions/PAINT1/paint", serde_json::json!({"timestamp": START_MS, "color": "red"}))
        .await
        .unwrap();
    guest.publish(BLUE, Some(NormalizedPoint::new(0.4, 0.4))).await.unwrap();

    let event = within(events.next()).await.unwrap();
    assert_eq!(event.player, PlayerId::slot(1));
}
