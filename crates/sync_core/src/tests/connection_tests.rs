use std::time::Duration;

use shared::{
    domain::UserId,
    protocol::{ClientEvent, PresenceUpdate, ServerEvent},
};
use tokio::{sync::broadcast, time::timeout};

use super::*;
use crate::transport::fake::ScriptedConnector;

fn test_settings() -> Settings {
    Settings {
        server_url: "http://127.0.0.1:9".into(),
        reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(20),
    }
}

fn test_session() -> Session {
    Session::new("me", "token-1")
}

async fn wait_for_state(rx: &mut broadcast::Receiver<ConnectionEvent>, want: ConnectionState) {
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for connection event")
            .expect("connection bus closed");
        if let ConnectionEvent::State(state) = event {
            if state == want {
                return;
            }
        }
    }
}

async fn wait_for_error(rx: &mut broadcast::Receiver<ConnectionEvent>) -> String {
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for connection event")
            .expect("connection bus closed");
        if let ConnectionEvent::Error(message) = event {
            return message;
        }
    }
}

#[tokio::test]
async fn announces_presence_once_connected() {
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let manager = ConnectionManager::new(test_session(), test_settings(), connector);
    let mut rx = manager.subscribe();

    manager.connect().await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;

    match sockets[0].next_client_event().await {
        Some(ClientEvent::UserConnected { user_id }) => assert_eq!(user_id, UserId::from("me")),
        other => panic!("expected user_connected announce, got {other:?}"),
    }
}

#[tokio::test]
async fn emit_is_rejected_while_disconnected() {
    let manager = ConnectionManager::new(
        test_session(),
        test_settings(),
        ScriptedConnector::refusing(),
    );

    let err = manager
        .emit(&ClientEvent::UserConnected {
            user_id: UserId::from("me"),
        })
        .await
        .expect_err("must reject");
    assert!(matches!(err, SyncError::ConnectionUnavailable));
}

#[tokio::test]
async fn forwards_parsed_inbound_frames() {
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let manager = ConnectionManager::new(test_session(), test_settings(), connector);
    let mut rx = manager.subscribe();

    manager.connect().await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;

    sockets[0]
        .push_server_event(&ServerEvent::UsersStatusUpdate(vec![PresenceUpdate {
            user_id: UserId::from("a"),
            online: true,
        }]))
        .await;

    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("bus closed");
        if let ConnectionEvent::Frame(ServerEvent::UsersStatusUpdate(users)) = event {
            assert_eq!(users.len(), 1);
            break;
        }
    }
}

#[tokio::test]
async fn invalid_frame_surfaces_error_without_dropping_connection() {
    let (connector, sockets) = ScriptedConnector::accepting(1);
    let manager = ConnectionManager::new(test_session(), test_settings(), connector);
    let mut rx = manager.subscribe();

    manager.connect().await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;

    sockets[0].push_raw("not json").await;
    let message = wait_for_error(&mut rx).await;
    assert!(message.contains("invalid server frame"));
    assert_eq!(manager.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn reconnects_and_reannounces_after_connection_loss() {
    let (connector, mut sockets) = ScriptedConnector::accepting(2);
    let manager = ConnectionManager::new(test_session(), test_settings(), connector.clone());
    let mut rx = manager.subscribe();

    manager.connect().await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;

    // Server side goes away: closing the inbound half ends the pump.
    drop(sockets.remove(0));
    wait_for_state(&mut rx, ConnectionState::Reconnecting).await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;

    assert_eq!(connector.open_count(), 2);
    match sockets[0].next_client_event().await {
        Some(ClientEvent::UserConnected { user_id }) => assert_eq!(user_id, UserId::from("me")),
        other => panic!("expected re-announce, got {other:?}"),
    }
}

#[tokio::test]
async fn gives_up_after_bounded_reconnect_attempts() {
    let connector = ScriptedConnector::refusing();
    let manager = ConnectionManager::new(test_session(), test_settings(), connector.clone());
    let mut rx = manager.subscribe();

    manager.connect().await;
    let message = wait_for_error(&mut rx).await;
    assert!(message.contains("reconnect attempts exhausted"));
    wait_for_state(&mut rx, ConnectionState::Disconnected).await;

    // Initial try plus the configured retries, then nothing further.
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test]
async fn graceful_disconnect_says_goodbye_and_stays_down() {
    let (connector, sockets) = ScriptedConnector::accepting(2);
    let manager = ConnectionManager::new(test_session(), test_settings(), connector.clone());
    let mut rx = manager.subscribe();

    manager.connect().await;
    wait_for_state(&mut rx, ConnectionState::Connected).await;
    match sockets[0].next_client_event().await {
        Some(ClientEvent::UserConnected { .. }) => {}
        other => panic!("expected announce, got {other:?}"),
    }

    manager.disconnect().await;
    match sockets[0].next_client_event().await {
        Some(ClientEvent::UserDisconnected { user_id }) => {
            assert_eq!(user_id, UserId::from("me"));
        }
        other => panic!("expected goodbye frame, got {other:?}"),
    }
    wait_for_state(&mut rx, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(connector.open_count(), 1);
}
