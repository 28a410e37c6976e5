//! Disconnect, grace-period, and reconnection behavior.

use std::{sync::Arc, time::Duration};

use gametable_proto::{
    ClientEvent, ConnectionId, LogEntry, PlayerId, PlayerIdentity, RoomId, ServerEvent,
};
use gametable_server::{
    ACK_EXISTING_PLAYER, Coordinator, CoordinatorConfig, DocumentStore, MemoryStore, SystemEnv,
};
use tokio::sync::mpsc::UnboundedReceiver;

type TestCoordinator = Coordinator<SystemEnv, MemoryStore>;

fn coordinator_with_grace(grace: Duration) -> (Arc<TestCoordinator>, MemoryStore) {
    let store = MemoryStore::new();
    let config = CoordinatorConfig {
        disconnect_grace: grace,
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

async fn join(
    coordinator: &TestCoordinator,
    conn: ConnectionId,
    rx: &mut UnboundedReceiver<ServerEvent>,
    player: &str,
    name: &str,
    room: &RoomId,
) {
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity(player, name)))
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
async fn reconnect_within_grace_resumes_room() {
    let (coordinator, _store) = coordinator_with_grace(Duration::from_secs(60));
    let room = RoomId::from("r1");

    let (conn_a, mut rx_a) = connect(&coordinator).await;
    let (conn_b, mut rx_b) = connect(&coordinator).await;
    join(&coordinator, conn_a, &mut rx_a, "p-a", "Alice", &room).await;
    join(&coordinator, conn_b, &mut rx_b, "p-b", "Bob", &room).await;
    recv(&mut rx_a).await; // Bob's join snapshot

    // Alice's transport dies; Bob sees her leave, but her session survives.
    coordinator.connection_closed(conn_a).await;
    match recv(&mut rx_b).await {
        ServerEvent::PlayerLeft(members) => assert_eq!(members.len(), 1),
        other => panic!("expected PlayerLeft, got {other:?}"),
    }
    assert_eq!(coordinator.session_count().await, 2);

    // She comes back on a fresh connection and lands in the same room.
    let (conn_a2, mut rx_a2) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_a2, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx_a2).await, ServerEvent::NewPlayer(ACK_EXISTING_PLAYER.to_string()));
    match recv(&mut rx_a2).await {
        ServerEvent::GameStatusUpdated(snapshot) => {
            assert_eq!(snapshot.members.len(), 2);
        },
        other => panic!("expected GameStatusUpdated, got {other:?}"),
    }

    // Bob sees the rejoin too.
    match recv(&mut rx_b).await {
        ServerEvent::GameStatusUpdated(snapshot) => assert_eq!(snapshot.members.len(), 2),
        other => panic!("expected GameStatusUpdated, got {other:?}"),
    }

    // The new connection is live in the room.
    coordinator
        .handle_event(conn_a2, ClientEvent::DiceRoll(LogEntry::new("Alice", "back")))
        .await
        .unwrap();
    match recv(&mut rx_b).await {
        ServerEvent::UpdateLog(log) => assert_eq!(log, vec![LogEntry::new("Alice", "back")]),
        other => panic!("expected UpdateLog, got {other:?}"),
    }
}

#[tokio::test]
async fn session_is_evicted_after_grace_period() {
    let (coordinator, _store) = coordinator_with_grace(Duration::from_millis(50));

    let (conn, mut rx) = connect(&coordinator).await;
    coordinator
        .handle_event(conn, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx).await;
    coordinator.connection_closed(conn).await;

    // Within the grace period the session is still there.
    coordinator.tick().await;
    assert_eq!(coordinator.session_count().await, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    coordinator.tick().await;
    assert_eq!(coordinator.session_count().await, 0);
}

#[tokio::test]
async fn last_disconnect_drains_and_flushes_the_room() {
    let (coordinator, store) = coordinator_with_grace(Duration::from_secs(60));
    let room = RoomId::from("r1");

    let (conn, mut rx) = connect(&coordinator).await;
    join(&coordinator, conn, &mut rx, "p-a", "Alice", &room).await;
    coordinator
        .handle_event(conn, ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 9")))
        .await
        .unwrap();
    recv(&mut rx).await;

    coordinator.connection_closed(conn).await;

    wait_for("drain flush", || store.save_count(&room) == 1).await;
    let document = store.load(&room).unwrap().expect("flushed document");
    assert_eq!(document.log, vec![LogEntry::new("Alice", "rolled 9")]);
    assert!(coordinator.room_snapshot(&room).await.is_none());
}

#[tokio::test]
async fn reconnect_after_drain_reopens_room_from_storage() {
    let (coordinator, store) = coordinator_with_grace(Duration::from_secs(60));
    let room = RoomId::from("r1");

    let (conn, mut rx) = connect(&coordinator).await;
    join(&coordinator, conn, &mut rx, "p-a", "Alice", &room).await;
    coordinator
        .handle_event(conn, ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 9")))
        .await
        .unwrap();
    recv(&mut rx).await;

    coordinator.connection_closed(conn).await;
    wait_for("drain flush", || store.save_count(&room) == 1).await;

    // The rejoin reopens the room seeded from the flushed document.
    let (conn_2, mut rx_2) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_2, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx_2).await; // ack

    match recv(&mut rx_2).await {
        ServerEvent::GameStatusUpdated(snapshot) => {
            assert_eq!(snapshot.log, vec![LogEntry::new("Alice", "rolled 9")]);
            assert_eq!(snapshot.members.len(), 1);
        },
        other => panic!("expected GameStatusUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_close_after_rebind_is_ignored() {
    let (coordinator, _store) = coordinator_with_grace(Duration::from_secs(60));
    let room = RoomId::from("r1");

    let (conn_1, mut rx_1) = connect(&coordinator).await;
    join(&coordinator, conn_1, &mut rx_1, "p-a", "Alice", &room).await;

    // Rebind to a new connection before the old transport reports closure.
    let (conn_2, mut rx_2) = connect(&coordinator).await;
    coordinator
        .handle_event(conn_2, ClientEvent::PlayerConnect(identity("p-a", "Alice")))
        .await
        .unwrap();
    recv(&mut rx_2).await; // ack
    recv(&mut rx_2).await; // rejoin snapshot

    // The late close of the old connection must not kick the player out.
    coordinator.connection_closed(conn_1).await;

    let snapshot = coordinator.room_snapshot(&room).await.expect("room should stay open");
    assert_eq!(snapshot.members.len(), 1);
    assert_eq!(coordinator.session_count().await, 1);
}
