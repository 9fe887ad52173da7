//! Document-scoped failures keep the connection usable; malformed input
//! closes it.

mod common;

use collab_proto::{ClientMessage, DocumentId, ErrorCode, Payload, ServerMessage, close};
use common::{ClientDoc, TestClient, TestServer};
use std::time::Duration;

fn join(id: &str) -> ClientMessage {
    ClientMessage::Join {
        document_id: DocumentId::from(id),
    }
}

async fn expect_error(client: &mut TestClient) -> (ErrorCode, Option<DocumentId>) {
    match client.recv().await.unwrap() {
        ServerMessage::Error {
            code, document_id, ..
        } => (code, document_id),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_document_is_not_fatal() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.send(&join("ghost")).await.unwrap();
    let (code, document_id) = expect_error(&mut client).await;
    assert_eq!(code, ErrorCode::DocumentNotFound);
    assert_eq!(document_id, Some(DocumentId::from("ghost")));
    assert!(!server.has_room("ghost"));

    client.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn unavailable_store_reports_storage_error() {
    let server = TestServer::spawn().await;
    server.store.set_unavailable(true);
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.send(&join("d1")).await.unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::StorageUnavailable);

    server.store.set_unavailable(false);
    client.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn messages_for_unjoined_documents_are_refused() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client
        .send(&ClientMessage::Update {
            document_id: DocumentId::from("d1"),
            update: ClientDoc::new().push("x"),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::NotJoined);

    client
        .send(&ClientMessage::SyncStep2 {
            document_id: DocumentId::from("d1"),
            state_vector: ClientDoc::new().state_vector(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::NotJoined);

    client.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn empty_document_id_is_invalid_payload() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.send_raw(r#"{"type":"join","documentId":"  "}"#).await.unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::InvalidPayload);

    client.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_closes_with_protocol_violation() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.send_raw("{not json").await.unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::ProtocolViolation);
    assert_eq!(client.expect_close().await.unwrap(), close::PROTOCOL_VIOLATION);
    server.shutdown().await;
}

#[tokio::test]
async fn undecodable_update_closes_with_protocol_violation() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::login(&server, "alice").await.unwrap();
    let mut bob = TestClient::login(&server, "bob").await.unwrap();
    alice.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    bob.join_and_sync("d1", &ClientDoc::new()).await.unwrap();

    alice
        .send(&ClientMessage::Update {
            document_id: DocumentId::from("d1"),
            update: Payload::from(vec![0xde, 0xad, 0xbe, 0xef, 0xff]),
        })
        .await
        .unwrap();
    assert_eq!(alice.expect_close().await.unwrap(), close::PROTOCOL_VIOLATION);

    // Nothing reached the peer, and the document is untouched.
    let seen = bob.collect_for(Duration::from_millis(300)).await.unwrap();
    assert!(!seen.iter().any(|m| matches!(m, ServerMessage::Update { .. })));
    server.shutdown().await;
}

#[tokio::test]
async fn document_cap_is_enforced() {
    let server = TestServer::spawn_with(|config| {
        config.limits.max_documents_per_connection = 1;
    })
    .await;
    server.store.insert("d2");
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.join_and_sync("d1", &ClientDoc::new()).await.unwrap();
    client.send(&join("d2")).await.unwrap();
    let (code, document_id) = expect_error(&mut client).await;
    assert_eq!(code, ErrorCode::TooManyDocuments);
    assert_eq!(document_id, Some(DocumentId::from("d2")));
    server.shutdown().await;
}

#[tokio::test]
async fn stalled_initial_sync_times_out() {
    let server = TestServer::spawn_with(|config| {
        config.limits.sync_timeout_ms = 200;
    })
    .await;
    let mut client = TestClient::login(&server, "alice").await.unwrap();

    client.send(&join("d1")).await.unwrap();
    let timed_out = client
        .recv_until(|m| matches!(m, ServerMessage::Error { .. }))
        .await
        .unwrap();
    match timed_out {
        ServerMessage::Error {
            code, document_id, ..
        } => {
            assert_eq!(code, ErrorCode::SyncTimeout);
            assert_eq!(document_id, Some(DocumentId::from("d1")));
        }
        _ => unreachable!(),
    }

    // Released: further edits are refused, the connection stays open.
    client
        .send(&ClientMessage::Update {
            document_id: DocumentId::from("d1"),
            update: ClientDoc::new().push("late"),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut client).await.0, ErrorCode::NotJoined);
    server.shutdown().await;
}
