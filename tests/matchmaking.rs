mod common;

use std::sync::Arc;

use common::{hub, pair};
use strangerlink::{
    client::{Backend, ClientConfig, ClientError, ClientEvent, LocalBackend, MatchClient, PollerState},
    error::Error,
    hub::Hub,
    model::{Gender, LookingFor, RoomStatus},
    proto::{JoinRequest, NewMessage},
    store::MatchStore,
};

fn client(hub: &Hub, user_id: &str) -> MatchClient {
    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(hub.clone()));
    MatchClient::new(backend, user_id, ClientConfig::default())
}

fn music_fan(user_id: &str, gender: Gender) -> JoinRequest {
    JoinRequest::new(user_id, gender).with_interests(["music"])
}

async fn connected_pair(hub: &Hub) -> (MatchClient, MatchClient) {
    let mut a = client(hub, "a");
    let mut b = client(hub, "b");
    a.join(music_fan("a", Gender::Male)).await.unwrap();
    b.join(music_fan("b", Gender::Female)).await.unwrap();
    match a.next_event().await {
        Some(ClientEvent::Matched { .. }) => {}
        other => panic!("expected a match, got {other:?}"),
    }
    (a, b)
}

#[tokio::test(start_paused = true)]
async fn test_waiting_user_is_matched_by_polling() {
    let hub = hub();
    let mut a = client(&hub, "a");
    let mut b = client(&hub, "b");

    assert_eq!(a.join(music_fan("a", Gender::Male)).await.unwrap(), PollerState::Searching);
    assert!(a.is_polling());

    assert_eq!(
        b.join(JoinRequest::new("b", Gender::Female).with_interests(["music", "art"]))
            .await
            .unwrap(),
        PollerState::Connected
    );
    assert_eq!(b.shared_interests(), ["music"]);
    assert_eq!(b.peer_id(), Some("a"));

    let Some(ClientEvent::Matched { room, .. }) = a.next_event().await else {
        panic!("expected a match");
    };
    assert_eq!(Some(&room), b.room());
    assert_eq!(a.state(), PollerState::Connected);
    assert!(!a.is_polling());
    assert!(a.is_subscribed());
    assert_eq!(hub.store().queue_len().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_disconnects_the_peer() {
    let hub = hub();
    let (mut a, mut b) = connected_pair(&hub).await;
    let room_id = a.room().unwrap().id;

    a.leave().await.unwrap();
    assert_eq!(a.state(), PollerState::Idle);
    assert!(a.room().is_none());
    assert!(!a.is_subscribed());

    let Some(ClientEvent::PeerLeft { room_id: left }) = b.next_event().await else {
        panic!("expected the peer to leave");
    };
    assert_eq!(left, room_id);
    assert_eq!(b.state(), PollerState::Disconnected);
    assert!(b.room().is_none());
    assert!(!b.is_subscribed());

    let room = hub.store().room(room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Ended);
    assert!(room.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_find_next_lands_in_a_new_room() {
    let hub = hub();
    let (mut a, mut b) = connected_pair(&hub).await;
    let first = a.room().unwrap().id;

    let mut c = client(&hub, "c");
    assert_eq!(c.join(JoinRequest::new("c", Gender::Other)).await.unwrap(), PollerState::Searching);

    assert_eq!(a.find_next().await.unwrap(), PollerState::Connected);
    let second = a.room().unwrap();
    assert_ne!(second.id, first);
    assert_eq!(a.peer_id(), Some("c"));
    assert!(matches!(b.next_event().await, Some(ClientEvent::PeerLeft { .. })));

    assert!(matches!(c.next_event().await, Some(ClientEvent::Matched { .. })));
    assert_eq!(c.room().map(|r| r.id), Some(second.id));
    assert_eq!(hub.store().room(first).await.unwrap().unwrap().status, RoomStatus::Ended);
}

#[tokio::test]
async fn test_find_next_requires_a_previous_join() {
    let hub = hub();
    let mut a = client(&hub, "a");
    assert!(matches!(a.find_next().await, Err(ClientError::NeverJoined)));
}

#[tokio::test(start_paused = true)]
async fn test_messages_flow_and_failed_sends_roll_back() {
    let hub = hub();
    let (mut a, mut b) = connected_pair(&hub).await;

    let sent = a.send_message("  hello  ").await.unwrap();
    assert_eq!(sent.content, "hello");
    assert_eq!(a.messages(), [sent.clone()]);

    let Some(ClientEvent::Message(received)) = b.next_event().await else {
        panic!("expected the message");
    };
    assert_eq!(received, sent);
    assert_eq!(b.messages(), [sent.clone()]);

    assert!(a.send_message("   ").await.is_err());
    assert_eq!(a.messages().len(), 1);

    b.leave().await.unwrap();
    let err = a.send_message("anyone there?").await.unwrap_err();
    assert!(matches!(err, ClientError::Server(Error::RoomNotActive(_))));
    assert_eq!(a.messages(), [sent]);
}

#[tokio::test]
async fn test_send_without_room_is_rejected() {
    let hub = hub();
    let mut a = client(&hub, "a");
    assert!(matches!(a.send_message("hi").await, Err(ClientError::NoRoom)));
    assert!(a.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_poll_timer() {
    let hub = hub();
    let mut a = client(&hub, "a");
    let premium = JoinRequest::new("a", Gender::Male).premium(LookingFor::Female);

    a.join(premium.clone()).await.unwrap();
    a.join(premium.clone()).await.unwrap();
    a.find_next().await.unwrap();
    assert!(a.is_polling());
    assert_eq!(hub.store().queue_len().await.unwrap(), 1);

    a.leave().await.unwrap();
    assert!(!a.is_polling());
    assert_eq!(a.state(), PollerState::Idle);
    assert_eq!(hub.store().queue_len().await.unwrap(), 0);
    assert!(a.next_event().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_premium_filter_skips_incompatible_waiters() {
    let hub = hub();
    let mut picky = client(&hub, "picky");
    let mut other_male = client(&hub, "m");
    picky
        .join(JoinRequest::new("picky", Gender::Male).premium(LookingFor::Female))
        .await
        .unwrap();
    other_male.join(JoinRequest::new("m", Gender::Male)).await.unwrap();

    let mut f = client(&hub, "f");
    f.join(JoinRequest::new("f", Gender::Female)).await.unwrap();
    assert_eq!(f.peer_id(), Some("picky"));
    assert!(other_male.is_polling());
}

#[tokio::test]
async fn test_connect_direct_loads_history() {
    let hub = hub();
    let room = pair(&hub, "a", "b").await;
    hub.send_message(room.id, NewMessage { sender_id: "b".into(), content: "hey friend".into() })
        .await
        .unwrap();

    let mut a = client(&hub, "a");
    a.connect_direct(room.clone()).await.unwrap();
    assert_eq!(a.state(), PollerState::Connected);
    assert_eq!(a.peer_id(), Some("b"));
    assert_eq!(a.messages().len(), 1);

    let mut stranger = client(&hub, "z");
    assert!(matches!(
        stranger.connect_direct(room).await,
        Err(ClientError::Server(Error::NotParticipant { .. }))
    ));
    assert_eq!(stranger.state(), PollerState::Idle);
}

#[tokio::test]
async fn test_online_count_through_client() {
    let hub = hub();
    pair(&hub, "a", "b").await;
    let mut c = client(&hub, "c");
    c.join(JoinRequest::new("c", Gender::Male).premium(LookingFor::Other))
        .await
        .unwrap();
    assert_eq!(c.online_count().await.unwrap(), 3);
}
