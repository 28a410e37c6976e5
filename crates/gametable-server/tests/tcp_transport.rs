//! Full-stack test over a real TCP socket: frame codec, event dispatch, and
//! fan-out between two live connections.

use std::time::Duration;

use gametable_proto::{
    ClientEvent, LogEntry, PlayerId, PlayerIdentity, RoomId, ServerEvent,
};
use gametable_server::{
    ACK_NEW_PLAYER, CoordinatorConfig, MemoryStore, Server, ServerRuntimeConfig, read_frame,
    write_frame,
};
use tokio::net::TcpStream;

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream }
    }

    async fn send(&mut self, event: &ClientEvent) {
        let mut buf = Vec::new();
        event.encode(&mut buf).expect("encode");
        write_frame(&mut self.stream, &buf).await.expect("write frame");
    }

    async fn recv(&mut self) -> ServerEvent {
        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for frame")
            .expect("read frame")
            .expect("stream closed");
        ServerEvent::decode(&frame).expect("decode")
    }
}

fn identity(id: &str, name: &str) -> PlayerIdentity {
    PlayerIdentity {
        player_id: PlayerId::from(id),
        display_name: name.to_string(),
        avatar_ref: None,
    }
}

#[tokio::test]
async fn two_clients_share_a_room_over_tcp() {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        coordinator: CoordinatorConfig::default(),
    };
    let server = Server::bind(config, MemoryStore::new()).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.run());

    let room = RoomId::from("tcp-room");

    let mut alice = Client::connect(addr).await;
    alice.send(&ClientEvent::PlayerConnect(identity("p-a", "Alice"))).await;
    assert_eq!(alice.recv().await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));

    alice
        .send(&ClientEvent::JoinGame { room_id: room.clone(), initial_document: None })
        .await;
    match alice.recv().await {
        ServerEvent::GameStatusUpdated(snapshot) => assert_eq!(snapshot.members.len(), 1),
        other => panic!("expected GameStatusUpdated, got {other:?}"),
    }

    let mut bob = Client::connect(addr).await;
    bob.send(&ClientEvent::PlayerConnect(identity("p-b", "Bob"))).await;
    assert_eq!(bob.recv().await, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()));
    bob.send(&ClientEvent::JoinGame { room_id: room.clone(), initial_document: None }).await;

    // Both see the two-member snapshot.
    for client in [&mut alice, &mut bob] {
        match client.recv().await {
            ServerEvent::GameStatusUpdated(snapshot) => assert_eq!(snapshot.members.len(), 2),
            other => panic!("expected GameStatusUpdated, got {other:?}"),
        }
    }

    // A roll from Alice reaches Bob.
    alice.send(&ClientEvent::DiceRoll(LogEntry::new("Alice", "rolled 20"))).await;
    for client in [&mut alice, &mut bob] {
        match client.recv().await {
            ServerEvent::UpdateLog(log) => {
                assert_eq!(log, vec![LogEntry::new("Alice", "rolled 20")]);
            },
            other => panic!("expected UpdateLog, got {other:?}"),
        }
    }

    // Alice's socket drops; Bob learns she left.
    drop(alice);
    match bob.recv().await {
        ServerEvent::PlayerLeft(members) => {
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].player_id, PlayerId::from("p-b"));
        },
        other => panic!("expected PlayerLeft, got {other:?}"),
    }
}
