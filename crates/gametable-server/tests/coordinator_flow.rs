//! End-to-end coordinator flows driven through the event surface, with the
//! transport replaced by plain channels.

use std::{sync::Arc, time::Duration};

use gametable_proto::{
    ClientEvent, ConnectionId, LogEntry, PlayerId, PlayerIdentity, RoomId, ServerEvent,
    TokenPlacement,
};
use gametable_server::{
    ACK_EXISTING_PLAYER, ACK_NEW_PLAYER, Coordinator, CoordinatorConfig, DocumentStore,
    MemoryStore, SystemEnv,
};
use tokio::sync::mpsc::UnboundedReceiver;

type TestCoordinator = Coordinator<SystemEnv, MemoryStore>;

fn coordinator() -> (Arc<TestCoordinator>, MemoryStore) {
    let store = MemoryStore::new();
    let config = CoordinatorConfig {
        flush_backoff: Duration::from_millis(10),
        ..CoordinatorConfig::default()
    };
    (Arc::new(Coordinator::new(SystemEnv::new(), store.clone(), config)), store)
}

async fn connect(
    coordinator: &TestCoordinator,
) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let connection_id = coordinator.register_connection(sender).await;
    (connection_id, receiver)
}

async fn recv(receiver: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn identity(id: &str, name: &str) -> PlayerIdentity {
    PlayerIdentity {
        player_id: PlayerId::from(id),
        display_name: name.to_string(),
        avatar_ref: None,
    }
}

async fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}

#[tokio::test]
async fn connect_join_and_roll() {
    let (coordinator, _store) = coordinator();
    let room = RoomId::from("r1");

    let (conn_a, mut rx_a) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_a, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx_a).await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));

    coordinator
        .handle_event(
            conn_a,
            ClientEvent::JoinGame { room_id: room.clone(), initial_document: None },
        )
        .await
        .unwrap();

    match recv(&mut rx_a).await {
        ServerEvent::GameStatusUpdated(snapshot) => {
            assert_eq!(snapshot.members.len(), 1);
            assert_eq!(snapshot.members[0].player_id, PlayerId::from("p-a"));
            assert!(snapshot.log.is_empty());
        },
        other => panic!("expected GameStatusUpdated, got {other:?}"),
    }

    // Second player joins; both see the two-member snapshot.
    let (conn_b, mut rx_b) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_b, ClientEvent::PlayerConnect(identity("p-b", "Bob")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx_b).await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));
    coordinator
        .handle_event(
            conn_b,
            ClientEvent::JoinGame { room_id: room.clone(), initial_document: None },
        )
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        match recv(rx).await {
            ServerEvent::GameStatusUpdated(snapshot) => {
                assert_eq!(snapshot.members.len(), 2);
            },
            other => panic!("expected GameStatusUpdated, got {other:?}"),
        }
    }

    // One roll reaches both subscribers with the full log.
    coordinator
        .handle_event(conn_a, ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 7")))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        match recv(rx).await {
            ServerEvent::UpdateLog(log) => {
                assert_eq!(log, vec![LogEntry::new("Alice", "rolled 7")]);
            },
            other => panic!("expected UpdateLog, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn token_updates_are_broadcast() {
    let (coordinator, _store) = coordinator();
    let room = RoomId::from("r1");

    let (conn_a, mut rx_a) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_a, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx_a).await; // ack
    coordinator
        .handle_event(conn_a, ClientEvent::JoinGame { room_id: room, initial_document: None })
        .await
        .unwrap();
    recv(&mut rx_a).await; // snapshot

    let tokens = vec![TokenPlacement {
        id: "t1".to_string(),
        image: "orc.png".to_string(),
        x: 2.0,
        y: 5.0,
    }];
    coordinator.handle_event(conn_a, ClientEvent::UpdateTokens(tokens.clone())).await.unwrap();
    assert_eq!(recv(&mut rx_a).await, ServerEvent::UpdateToken(tokens.clone()));

    // Deleting also carries the full remaining layout.
    coordinator.handle_event(conn_a, ClientEvent::DeleteToken(vec![])).await.unwrap();
    assert_eq!(recv(&mut rx_a).await, ServerEvent::UpdateToken(vec![]));
}

#[tokio::test]
async fn leave_broadcasts_and_last_leave_flushes_once() {
    let (coordinator, store) = coordinator();
    let room = RoomId::from("r1");

    let (conn_a, mut rx_a) = connect(&coordinator).await;
    let (conn_b, mut rx_b) = connect(&coordinator).await;
    for (conn, rx, id, name) in
        [(conn_a, &mut rx_a, "p-a", "Alice"), (conn_b, &mut rx_b, "p-b", "Bob")]
    {
        coordinator
            .handle_event(conn, ClientEvent::PlayerConnect(identity(id, name)))
            .await
            .unwrap();
        recv(rx).await; // ack
        coordinator
            .handle_event(
                conn,
                ClientEvent::JoinGame { room_id: room.clone(), initial_document: None },
            )
            .await
            .unwrap();
        recv(rx).await; // snapshot
    }
    recv(&mut rx_a).await; // Bob's join snapshot

    coordinator
        .handle_event(conn_a, ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 3")))
        .await
        .unwrap();
    recv(&mut rx_a).await;
    recv(&mut rx_b).await;

    // Alice leaves: Bob sees the shrunken member list, nothing is flushed.
    coordinator.handle_event(conn_a, ClientEvent::LeaveGame).await.unwrap();
    match recv(&mut rx_b).await {
        ServerEvent::PlayerLeft(members) => {
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].player_id, PlayerId::from("p-b"));
        },
        other => panic!("expected PlayerLeft, got {other:?}"),
    }
    assert_eq!(store.save_count(&room), 0);

    // Bob leaves: the room drains and flushes exactly once.
    coordinator.handle_event(conn_b, ClientEvent::LeaveGame).await.unwrap();
    wait_for("drain flush", || store.save_count(&room) == 1).await;

    let document = store.load(&room).unwrap().expect("document should be flushed");
    assert_eq!(document.log, vec![LogEntry::new("Alice", "rolled 3")]);

    // The room is gone from the live map.
    assert!(coordinator.room_snapshot(&room).await.is_none());

    // No second flush sneaks in later.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.save_count(&room), 1);
}

#[tokio::test]
async fn out_of_order_events_are_rejected_not_dropped() {
    let (coordinator, _store) = coordinator();
    let room = RoomId::from("r1");

    let (conn, mut rx) = connect(&coordinator).await;

    // Join before identifying.
    coordinator
        .handle_event(
            conn,
            ClientEvent::JoinGame { room_id: room.clone(), initial_document: None },
        )
        .await
        .unwrap();
    assert!(matches!(recv(&mut rx).await, ServerEvent::Rejected(_)));

    // Roll before joining.
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx).await; // ack
    coordinator
        .handle_event(conn, ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 1")))
        .await
        .unwrap();
    assert!(matches!(recv(&mut rx).await, ServerEvent::Rejected(_)));

    // Join twice.
    coordinator
        .handle_event(
            conn,
            ClientEvent::JoinGame { room_id: room.clone(), initial_document: None },
        )
        .await
        .unwrap();
    recv(&mut rx).await; // snapshot
    coordinator
        .handle_event(
            conn,
            ClientEvent::JoinGame { room_id: RoomId::from("r2"), initial_document: None },
        )
        .await
        .unwrap();
    assert!(matches!(recv(&mut rx).await, ServerEvent::Rejected(_)));

    // The rejections changed nothing: the player is still in r1 alone.
    let snapshot = coordinator.room_snapshot(&room).await.expect("room should be open");
    assert_eq!(snapshot.members.len(), 1);
}

#[tokio::test]
async fn logout_removes_the_session() {
    let (coordinator, _store) = coordinator();

    let (conn, mut rx) = connect(&coordinator).await;
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx).await;
    assert_eq!(coordinator.session_count().await, 1);

    coordinator.handle_event(conn, ClientEvent::Logout).await.unwrap();
    assert_eq!(coordinator.session_count().await, 0);

    // The connection survives and can identify again, as a new player.
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));
}

#[tokio::test]
async fn reconnect_ack_differs_from_first_contact() {
    let (coordinator, _store) = coordinator();

    let (conn_1, mut rx_1) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_1, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx_1).await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));

    let (conn_2, mut rx_2) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_2, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx_2).await, ServerEvent::NewPlayer(ACK_EXISTING_PLAYER.to_string()));

    assert_eq!(coordinator.session_count().await, 1);
}

#[tokio::test]
async fn log_is_capped_at_seventy_entries() {
    let (coordinator, _store) = coordinator();
    let room = RoomId::from("r1");

    let (conn, mut rx) = connect(&coordinator).await;
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx).await;
    coordinator
        .handle_event(conn, ClientEvent::JoinGame { room_id: room, initial_document: None })
        .await
        .unwrap();
    recv(&mut rx).await;

    for n in 0..75 {
        coordinator
            .handle_event(conn, ClientEvent::DiceRoll(LogEntry::new("Alice", format!("roll {n}"))))
            .await
            .unwrap();
    }

    let mut last_log = None;
    for _ in 0..75 {
        match recv(&mut rx).await {
            ServerEvent::UpdateLog(log) => last_log = Some(log),
            other => panic!("expected UpdateLog, got {other:?}"),
        }
    }

    let log = last_log.expect("at least one log update");
    assert_eq!(log.len(), 70);
    assert_eq!(log[0], LogEntry::new("Alice", "roll 5"));
    assert_eq!(log[69], LogEntry::new("Alice", "roll 74"));
}
