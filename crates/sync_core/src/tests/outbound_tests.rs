use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use shared::domain::{GroupId, MessageStatus, UserId};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

use super::*;
use crate::{
    transport::fake::ScriptedConnector, ChatClient, ConnectionState, Session, Settings, SyncEvent,
};

fn test_settings(server_url: &str) -> Settings {
    Settings {
        server_url: server_url.into(),
        reconnect_attempts: 1,
        reconnect_delay: Duration::from_millis(10),
    }
}

fn test_session() -> Session {
    Session::new("me", "token-1")
}

fn picture() -> AttachmentSource {
    AttachmentSource {
        filename: "cat.png".to_string(),
        mime_type: "image/png".to_string(),
        bytes: vec![1, 2, 3],
    }
}

#[derive(Clone)]
struct UploadServerState {
    ok: bool,
    delay: Duration,
}

async fn handle_upload(
    State(state): State<UploadServerState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, StatusCode> {
    tokio::time::sleep(state.delay).await;
    if !state.ok {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let mut file_name = String::new();
    let mut file_type = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        file_name = field.file_name().unwrap_or_default().to_string();
        file_type = field.content_type().unwrap_or_default().to_string();
        let _ = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
    }
    Ok(Json(serde_json::json!({
        "file_url": format!("https://files.test/{file_name}"),
        "file_name": file_name,
        "file_type": file_type,
    })))
}

async fn spawn_upload_server(ok: bool, delay: Duration) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/upload/file", post(handle_upload))
        .with_state(UploadServerState { ok, delay });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn set_active_direct(client: &ChatClient, peer: &str) {
    client.inner.lock().await.active = Some(ConversationKey::Direct {
        peer: UserId::from(peer),
    });
}

async fn connect_and_wait(client: &Arc<ChatClient>) {
    let mut rx = client.subscribe();
    client.connect().await;
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for connect")
            .expect("event bus closed");
        if let SyncEvent::Connection(ConnectionState::Connected) = event {
            return;
        }
    }
}

#[tokio::test]
async fn compose_fails_fast_when_disconnected_with_zero_mutations() {
    let client = ChatClient::with_connector(
        test_session(),
        test_settings("http://127.0.0.1:9"),
        ScriptedConnector::refusing(),
    );
    set_active_direct(&client, "peer").await;

    let err = client.compose("hi", None).await.expect_err("must fail");
    assert!(matches!(err, SyncError::ConnectionUnavailable));

    let guard = client.inner.lock().await;
    assert!(guard.store.is_empty());
    assert!(guard.pending.is_empty());
}

#[tokio::test]
async fn compose_rejects_empty_payload() {
    let (connector, _sockets) = ScriptedConnector::accepting(1);
    let client =
        ChatClient::with_connector(test_session(), test_settings("http://127.0.0.1:9"), connector);
    connect_and_wait(&client).await;
    set_active_direct(&client, "peer").await;

    let err = client.compose("   ", None).await.expect_err("must fail");
    assert!(matches!(err, SyncError::EmptyMessage));
    assert!(client.inner.lock().await.store.is_empty());
}

#[tokio::test]
async fn compose_requires_an_active_conversation() {
    let (connector, _sockets) = ScriptedConnector::accepting(1);
    let client =
        ChatClient::with_connector(test_session(), test_settings("http://127.0.0.1:9"), connector);
    connect_and_wait(&client).await;

    let err = client.compose("hi", None).await.expect_err("must fail");
    assert!(matches!(err, SyncError::NoActiveConversation));
}

#[tokio::test]
async fn compose_appends_optimistic_entry_and_emits_frame() {
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let client =
        ChatClient::with_connector(test_session(), test_settings("http://127.0.0.1:9"), connector);
    connect_and_wait(&client).await;
    set_active_direct(&client, "peer").await;

    let temp_id = client.compose("  hi  ", None).await.expect("compose");

    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, temp_id);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(messages[0].text.as_deref(), Some("hi"));
    assert!(client.inner.lock().await.pending.contains(&temp_id));

    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::UserConnected { .. }) => {}
        other => panic!("expected announce, got {other:?}"),
    }
    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::SendMessage(payload)) => {
            assert_eq!(payload.temp_id, temp_id);
            assert_eq!(payload.receiver_id, UserId::from("peer"));
            assert_eq!(payload.text, "hi");
            assert!(payload.file_url.is_none());
        }
        other => panic!("expected send_message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn group_compose_carries_own_read_receipt() {
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let client =
        ChatClient::with_connector(test_session(), test_settings("http://127.0.0.1:9"), connector);
    connect_and_wait(&client).await;
    client.inner.lock().await.active = Some(ConversationKey::Group {
        group: GroupId::from("g1"),
    });

    client.compose("hello group", None).await.expect("compose");

    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_read_by(&UserId::from("me")));

    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::UserConnected { .. }) => {}
        other => panic!("expected announce, got {other:?}"),
    }
    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::SendGroupMessage(payload)) => {
            assert_eq!(payload.group_id, GroupId::from("g1"));
            assert_eq!(payload.text, "hello group");
        }
        other => panic!("expected send_group_message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn attachment_upload_failure_aborts_the_whole_send() {
    let server_url = spawn_upload_server(false, Duration::ZERO).await;
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let client = ChatClient::with_connector(test_session(), test_settings(&server_url), connector);
    connect_and_wait(&client).await;
    set_active_direct(&client, "peer").await;

    let err = client
        .compose("look", Some(picture()))
        .await
        .expect_err("upload must fail");
    assert!(matches!(err, SyncError::AttachmentUploadFailed { .. }));
    assert!(client.inner.lock().await.store.is_empty());

    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::UserConnected { .. }) => {}
        other => panic!("expected announce, got {other:?}"),
    }
    assert!(
        sockets[0].outbound.lock().await.try_recv().is_err(),
        "no send frame may be emitted for an aborted send"
    );
}

#[tokio::test]
async fn attachment_upload_success_attaches_canonical_url() {
    let server_url = spawn_upload_server(true, Duration::ZERO).await;
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let client = ChatClient::with_connector(test_session(), test_settings(&server_url), connector);
    connect_and_wait(&client).await;
    set_active_direct(&client, "peer").await;

    client
        .compose("look", Some(picture()))
        .await
        .expect("compose");

    let messages = client.messages().await;
    let attachment = messages[0].attachment.as_ref().expect("attachment");
    assert_eq!(attachment.url, "https://files.test/cat.png");
    assert_eq!(attachment.mime_type, "image/png");

    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::UserConnected { .. }) => {}
        other => panic!("expected announce, got {other:?}"),
    }
    match sockets[0].next_client_event().await {
        Some(shared::protocol::ClientEvent::SendMessage(payload)) => {
            assert_eq!(payload.file_url.as_deref(), Some("https://files.test/cat.png"));
            assert_eq!(payload.file_name.as_deref(), Some("cat.png"));
        }
        other => panic!("expected send_message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_result_is_discarded_when_conversation_changed_mid_flight() {
    let server_url = spawn_upload_server(true, Duration::from_millis(150)).await;
    let (connector, _sockets) = ScriptedConnector::accepting(1);
    let client = ChatClient::with_connector(test_session(), test_settings(&server_url), connector);
    connect_and_wait(&client).await;
    set_active_direct(&client, "peer").await;

    let task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.compose("look", Some(picture())).await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    client.inner.lock().await.generation += 1;

    let result = task.await.expect("join");
    assert!(matches!(result, Err(SyncError::ConversationChanged)));
    assert!(client.inner.lock().await.store.is_empty());
}

#[tokio::test]
async fn failed_emit_rolls_back_the_optimistic_entry() {
    let client = ChatClient::with_connector(
        test_session(),
        test_settings("http://127.0.0.1:9"),
        ScriptedConnector::refusing(),
    );
    // Force a connected state whose writer is already gone: the emit
    // itself then fails after the optimistic append.
    {
        let mut conn = client.connection.inner.lock().await;
        conn.state = ConnectionState::Connected;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        conn.outbound = Some(tx);
    }
    set_active_direct(&client, "peer").await;

    let err = client.compose("hi", None).await.expect_err("emit must fail");
    assert!(matches!(err, SyncError::ConnectionUnavailable));

    let guard = client.inner.lock().await;
    assert!(guard.store.is_empty());
    assert!(guard.pending.is_empty());
}
