//! Connection admission: every credential path, and every way to fail it.

mod common;

use collab_proto::{ClientMessage, ErrorCode, ServerMessage, close};
use common::token::{expired_token, forged_token, token_for};
use common::{TestClient, TestServer};
use tokio_tungstenite::tungstenite;

async fn expect_unauthenticated(client: &mut TestClient) -> u16 {
    match client.recv().await.unwrap() {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Unauthenticated),
        other => panic!("expected UNAUTHENTICATED, got {other:?}"),
    }
    client.expect_close().await.unwrap()
}

#[tokio::test]
async fn query_token_authenticates() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(&server.url_with_token(&token_for("alice")))
        .await
        .unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::Authenticated {
            user_id,
            display_name,
            connection_id,
        } => {
            assert_eq!(user_id, "alice");
            assert_eq!(display_name, "alice (test)");
            assert!(connection_id > 0);
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn bearer_header_authenticates() {
    let server = TestServer::spawn().await;
    let bearer = format!("Bearer {}", token_for("bob"));
    let mut client =
        TestClient::connect_with_headers(&server.url(), &[(http::header::AUTHORIZATION, bearer.as_str())])
            .await
            .unwrap();
    client.expect_authenticated().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn auth_frame_authenticates() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(&server.url()).await.unwrap();
    client
        .send(&ClientMessage::Auth {
            token: token_for("carol"),
        })
        .await
        .unwrap();
    client.expect_authenticated().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(&server.url_with_token(&expired_token("alice")))
        .await
        .unwrap();
    assert_eq!(expect_unauthenticated(&mut client).await, close::UNAUTHENTICATED);
    server.shutdown().await;
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(&server.url_with_token(&forged_token("mallory")))
        .await
        .unwrap();
    assert_eq!(expect_unauthenticated(&mut client).await, close::UNAUTHENTICATED);
    server.shutdown().await;
}

#[tokio::test]
async fn first_frame_must_be_auth() {
    let server = TestServer::spawn().await;
    server.store.insert("d2");
    let mut client = TestClient::connect(&server.url()).await.unwrap();
    client
        .send_raw(r#"{"type":"join","documentId":"d2"}"#)
        .await
        .unwrap();
    assert_eq!(expect_unauthenticated(&mut client).await, close::UNAUTHENTICATED);
    // No room is created for an unauthenticated connection.
    assert!(!server.has_room("d2"));
    server.shutdown().await;
}

#[tokio::test]
async fn silent_client_times_out() {
    let server = TestServer::spawn_with(|config| {
        config.auth.handshake_timeout_ms = 200;
    })
    .await;
    let mut client = TestClient::connect(&server.url()).await.unwrap();
    assert_eq!(expect_unauthenticated(&mut client).await, close::AUTH_TIMEOUT);
    server.shutdown().await;
}

#[tokio::test]
async fn disallowed_origin_is_refused_at_upgrade() {
    let server = TestServer::spawn_with(|config| {
        config.listen.allow_origins = vec!["https://app.example.com".to_string()];
    })
    .await;

    let refused = TestClient::connect_with_headers(
        &server.url_with_token(&token_for("alice")),
        &[(http::header::ORIGIN, "https://evil.example.com")],
    )
    .await;
    let err = refused.err().expect("upgrade refused");
    match err.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), http::StatusCode::FORBIDDEN);
        }
        other => panic!("expected HTTP 403, got {other:?}"),
    }

    let mut allowed = TestClient::connect_with_headers(
        &server.url_with_token(&token_for("alice")),
        &[(http::header::ORIGIN, "https://app.example.com")],
    )
    .await
    .unwrap();
    allowed.expect_authenticated().await.unwrap();
    server.shutdown().await;
}
