//! End-to-end editing: two clients on one document.

mod common;

use collab_proto::{ClientMessage, DocumentId, ErrorCode, Payload, ServerMessage};
use common::{ClientDoc, TestClient, TestServer};
use std::time::Duration;

fn update(id: &str, update: Payload) -> ClientMessage {
    ClientMessage::Update {
        document_id: DocumentId::from(id),
        update,
    }
}

fn is_update(msg: &ServerMessage) -> bool {
    matches!(msg, ServerMessage::Update { .. })
}

#[tokio::test]
async fn edits_reach_peers_without_echo_and_persist() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let mut bob = TestClient::login(&server, "bob").await.unwrap();
    let alice_doc = ClientDoc::new();
    let bob_doc = ClientDoc::new();

    alice.join_and_sync("d1", &alice_doc).await.unwrap();
    bob.join_and_sync("d1", &bob_doc).await.unwrap();
    // Alice sees Bob arrive; settle her queue before editing.
    alice.collect_for(Duration::from_millis(200)).await.unwrap();

    alice.send(&update("d1", alice_doc.push("hello"))).await.unwrap();

    match bob.recv_until(is_update).await.unwrap() {
        ServerMessage::Update { document_id, update } => {
            assert_eq!(document_id.as_str(), "d1");
            bob_doc.apply(&update);
        }
        _ => unreachable!(),
    }
    assert_eq!(bob_doc.content(), "hello");

    let echoed = alice.collect_for(Duration::from_millis(300)).await.unwrap();
    assert!(
        !echoed.iter().any(is_update),
        "sender received its own update: {echoed:?}"
    );

    let snapshot = server
        .wait_for_snapshot("d1", Duration::from_secs(3), |bytes| {
            ClientDoc::from_snapshot(bytes).content() == "hello"
        })
        .await;
    assert!(snapshot.is_some(), "edit was not persisted");

    server.shutdown().await;
}

#[tokio::test]
async fn late_joiner_receives_existing_state() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let alice_doc = ClientDoc::new();
    alice.join_and_sync("d1", &alice_doc).await.unwrap();
    alice.send(&update("d1", alice_doc.push("draft one"))).await.unwrap();
    server
        .wait_for_snapshot("d1", Duration::from_secs(3), |bytes| {
            ClientDoc::from_snapshot(bytes).content() == "draft one"
        })
        .await
        .expect("first edit applied");

    let mut carol = TestClient::login(&server, "carol").await.unwrap();
    let carol_doc = ClientDoc::new();
    carol.join_and_sync("d1", &carol_doc).await.unwrap();

    assert_eq!(carol_doc.content(), "draft one");
    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_edits_converge() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let mut bob = TestClient::login(&server, "bob").await.unwrap();
    let alice_doc = ClientDoc::new();
    let bob_doc = ClientDoc::new();
    alice.join_and_sync("d1", &alice_doc).await.unwrap();
    bob.join_and_sync("d1", &bob_doc).await.unwrap();

    // Both type before seeing each other's edit.
    let from_alice = alice_doc.push("A");
    let from_bob = bob_doc.push("B");
    alice.send(&update("d1", from_alice)).await.unwrap();
    bob.send(&update("d1", from_bob)).await.unwrap();

    for (client, doc) in [(&mut alice, &alice_doc), (&mut bob, &bob_doc)] {
        if let ServerMessage::Update { update, .. } = client.recv_until(is_update).await.unwrap() {
            doc.apply(&update);
        }
    }

    assert_eq!(alice_doc.content(), bob_doc.content());
    assert_eq!(alice_doc.content().len(), 2);
    server.shutdown().await;
}

#[tokio::test]
async fn presence_lists_each_user_once() {
    let server = TestServer::spawn().await;
    let mut first = TestClient::login(&server, "dana").await.unwrap();
    let mut second = TestClient::login(&server, "dana").await.unwrap();
    first.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    second.join_and_sync("d1", &ClientDoc::new()).await.unwrap();

    let frames = first.collect_for(Duration::from_millis(300)).await.unwrap();
    let last_presence = frames
        .iter()
        .rev()
        .find_map(|m| match m {
            ServerMessage::Presence { users, .. } => Some(users.clone()),
            _ => None,
        })
        .expect("presence after second tab joined");
    assert_eq!(last_presence.len(), 1);
    assert_eq!(last_presence[0].user_id, "dana");
    server.shutdown().await;
}

#[tokio::test]
async fn awareness_is_relayed_and_cleared_on_disconnect() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let mut bob = TestClient::login(&server, "bob").await.unwrap();
    alice.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    bob.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    let alice_id = alice.connection_id;

    alice
        .send(&ClientMessage::Awareness {
            document_id: DocumentId::from("d1"),
            awareness: Payload::from(br#"{"cursor":4}"#.to_vec()),
        })
        .await
        .unwrap();

    let relayed = bob
        .recv_until(|m| matches!(m, ServerMessage::Awareness { awareness: Some(_), .. }))
        .await
        .unwrap();
    match relayed {
        ServerMessage::Awareness {
            client_id, user_id, ..
        } => {
            assert_eq!(client_id, alice_id);
            assert_eq!(user_id, "alice");
        }
        _ => unreachable!(),
    }

    alice.close().await;

    let removal = bob
        .recv_until(|m| matches!(m, ServerMessage::Awareness { awareness: None, .. }))
        .await
        .unwrap();
    assert!(matches!(removal, ServerMessage::Awareness { client_id, .. } if client_id == alice_id));

    match bob
        .recv_until(|m| matches!(m, ServerMessage::Presence { .. }))
        .await
        .unwrap()
    {
        ServerMessage::Presence { users, .. } => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].user_id, "bob");
        }
        _ => unreachable!(),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn leave_stops_delivery() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let mut bob = TestClient::login(&server, "bob").await.unwrap();
    let alice_doc = ClientDoc::new();
    alice.join_and_sync("d1", &alice_doc).await.unwrap();
    bob.join_and_sync("d1", &ClientDoc::new()).await.unwrap();

    bob.send(&ClientMessage::Leave {
        document_id: DocumentId::from("d1"),
    })
    .await
    .unwrap();
    bob.collect_for(Duration::from_millis(200)).await.unwrap();

    alice.send(&update("d1", alice_doc.push("x"))).await.unwrap();
    let after = bob.collect_for(Duration::from_millis(300)).await.unwrap();
    assert!(!after.iter().any(is_update));

    // Editing a document we left is refused but not fatal.
    bob.send(&update("d1", ClientDoc::new().push("y"))).await.unwrap();
    match bob.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotJoined),
        other => panic!("expected NOT_JOINED, got {other:?}"),
    }
    server.shutdown().await;
}
