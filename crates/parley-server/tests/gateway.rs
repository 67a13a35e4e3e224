mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use common::{TestApp, collect_messages, next_message};
use parley_client::{ClientError, Session};
use parley_gateway::token;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Identity;

#[tokio::test]
async fn online_receiver_gets_message_and_sender_gets_echo() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let alice_session = app.connect(&alice).await;
    let bob_session = app.connect(&bob).await;
    assert_eq!(bob_session.identity().id, bob.id);
    let (_alice_sub, mut alice_rx) = collect_messages(&alice_session);
    let (_bob_sub, mut bob_rx) = collect_messages(&bob_session);

    alice_session.send_message(bob.id, "hi").unwrap();

    let received = next_message(&mut bob_rx).await;
    assert_eq!(received.sender_id, alice.id);
    assert_eq!(received.receiver_id, bob.id);
    assert_eq!(received.body, "hi");

    let echo = next_message(&mut alice_rx).await;
    assert_eq!(echo, received);
}

#[tokio::test]
async fn offline_receiver_reads_history_after_connecting() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let alice_session = app.connect(&alice).await;
    let (_sub, mut alice_rx) = collect_messages(&alice_session);
    alice_session.send_message(bob.id, "hi").unwrap();
    // The echo means the message is persisted
    next_message(&mut alice_rx).await;

    let _bob_session = app.connect(&bob).await;
    let history = app.api.history(&bob.token, alice.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "hi");
    assert_eq!(history[0].sender_id, alice.id);
}

#[tokio::test]
async fn every_device_of_the_receiver_gets_the_message() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let phone = app.connect(&bob).await;
    let laptop = app.connect(&bob).await;
    app.wait_for_connections(bob.id, 2).await;
    let (_s1, mut phone_rx) = collect_messages(&phone);
    let (_s2, mut laptop_rx) = collect_messages(&laptop);

    let alice_session = app.connect(&alice).await;
    alice_session.send_message(bob.id, "both of you").unwrap();

    assert_eq!(next_message(&mut phone_rx).await.body, "both of you");
    assert_eq!(next_message(&mut laptop_rx).await.body, "both of you");
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let bob_session = app.connect(&bob).await;
    let (_sub, mut bob_rx) = collect_messages(&bob_session);
    let alice_session = app.connect(&alice).await;

    for i in 0..10 {
        alice_session.send_message(bob.id, &format!("m{}", i)).unwrap();
    }
    for i in 0..10 {
        assert_eq!(next_message(&mut bob_rx).await.body, format!("m{}", i));
    }

    let history = app.api.history(&alice.token, bob.id).await.unwrap();
    let bodies: Vec<String> = history.into_iter().map(|m| m.body).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
    assert_eq!(bodies, expected);
}

#[tokio::test]
async fn invalid_tokens_never_join() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;

    let expired = token::issue(
        common::SECRET,
        &Identity {
            id: alice.id,
            username: "alice".into(),
        },
        chrono::Utc::now() - chrono::Duration::hours(2),
        chrono::Duration::hours(1),
    )
    .unwrap();
    let wrong_key = token::issue(
        "some-other-secret",
        &Identity {
            id: alice.id,
            username: "alice".into(),
        },
        chrono::Utc::now(),
        chrono::Duration::hours(1),
    )
    .unwrap();

    for (token, reason) in [
        ("garbage", "malformed"),
        (expired.as_str(), "expired"),
        (wrong_key.as_str(), "bad_signature"),
    ] {
        match Session::connect(&app.ws_url(), token).await {
            Err(ClientError::Rejected(r)) => assert_eq!(r, reason),
            Err(e) => panic!("expected rejection, got {}", e),
            Ok(_) => panic!("{} token was accepted", reason),
        }
    }

    assert!(app.state.router.presence().lookup(alice.id).await.is_empty());
    assert_eq!(app.state.router.presence().online_count().await, 0);
}

#[tokio::test]
async fn silent_connection_is_closed_after_handshake_window() {
    let app = TestApp::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url()).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Close(frame))) => break frame,
                Some(Ok(_)) => {}
                other => panic!("connection ended without a close frame: {:?}", other),
            }
        }
    })
    .await
    .expect("server kept an unidentified connection open")
    .expect("close frame without a code");

    assert_eq!(u16::from(frame.code), 4001);
    assert_eq!(frame.reason.as_str(), "handshake_timeout");
}

#[tokio::test]
async fn identify_with_undecodable_token_is_rejected() {
    let app = TestApp::spawn().await;

    for frame in [
        r#"{"type":"Identify","data":{"token":42}}"#,
        r#"{"type":"Identify","data":{}}"#,
    ] {
        let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url()).await.unwrap();
        ws.send(tungstenite::Message::Text(frame.into())).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let event: GatewayEvent = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(
            event,
            GatewayEvent::InvalidSession {
                reason: "malformed".into()
            }
        );

        match ws.next().await {
            Some(Ok(tungstenite::Message::Close(Some(close)))) => {
                assert_eq!(u16::from(close.code), 4001);
            }
            other => panic!("expected a 4001 close after {}, got {:?}", frame, other),
        }
    }
    assert_eq!(app.state.router.presence().online_count().await, 0);
}

#[tokio::test]
async fn unanswered_pings_drop_the_connection() {
    let app = TestApp::spawn_with_gateway(|gateway| {
        gateway.heartbeat_interval = Duration::from_millis(100);
    })
    .await;
    let alice = app.user("alice").await;

    // Identify, then never read again so no pong is ever written
    let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url()).await.unwrap();
    let identify = serde_json::to_string(&GatewayCommand::Identify {
        token: alice.token.clone(),
    })
    .unwrap();
    ws.send(tungstenite::Message::Text(identify.into())).await.unwrap();

    app.wait_for_connections(alice.id, 1).await;
    app.wait_for_connections(alice.id, 0).await;
    drop(ws);
}

#[tokio::test]
async fn disconnect_leaves_the_channel() {
    let app = TestApp::spawn().await;
    let bob = app.user("bob").await;

    let first = app.connect(&bob).await;
    let second = app.connect(&bob).await;
    app.wait_for_connections(bob.id, 2).await;

    first.close().await;
    app.wait_for_connections(bob.id, 1).await;

    drop(second);
    app.wait_for_connections(bob.id, 0).await;
    assert_eq!(app.state.router.presence().online_count().await, 0);
}

#[tokio::test]
async fn invalid_payload_is_dropped_and_connection_survives() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let alice_session = app.connect(&alice).await;
    let (_sub, mut alice_rx) = collect_messages(&alice_session);

    alice_session
        .send_command(&GatewayCommand::SendMessage {
            receiver_id: None,
            body: "to nobody".into(),
        })
        .unwrap();
    alice_session.send_message(bob.id, "   ").unwrap();
    alice_session.send_message(bob.id, "valid").unwrap();

    // Only the valid message is echoed and stored
    assert_eq!(next_message(&mut alice_rx).await.body, "valid");
    let history = app.api.history(&alice.token, bob.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_the_handler() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let bob_session = app.connect(&bob).await;
    let (old_sub, mut old_rx) = collect_messages(&bob_session);
    let (_new_sub, mut new_rx) = collect_messages(&bob_session);
    old_sub.unsubscribe().await;

    let alice_session = app.connect(&alice).await;
    alice_session.send_message(bob.id, "after unsubscribe").unwrap();

    assert_eq!(next_message(&mut new_rx).await.body, "after unsubscribe");
    // The old handler (and its sender) is gone, so its channel is closed and empty
    assert!(old_rx.recv().await.is_none());
}

#[tokio::test]
async fn closing_a_session_cancels_its_subscriptions() {
    let app = TestApp::spawn().await;
    let bob = app.user("bob").await;

    let session = app.connect(&bob).await;
    let (sub, _rx) = collect_messages(&session);
    let token = sub.cancellation_token();

    session.close().await;
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn identify_after_handshake_is_ignored() {
    let app = TestApp::spawn().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url()).await.unwrap();
    let identify = serde_json::to_string(&GatewayCommand::Identify {
        token: alice.token.clone(),
    })
    .unwrap();
    ws.send(tungstenite::Message::Text(identify.clone().into())).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let event: GatewayEvent = serde_json::from_str(first.to_text().unwrap()).unwrap();
    assert_eq!(
        event,
        GatewayEvent::Ready {
            user_id: alice.id,
            username: "alice".into()
        }
    );

    // A second Identify (even for another user) does not change the session
    let other = serde_json::to_string(&GatewayCommand::Identify { token: bob.token }).unwrap();
    ws.send(tungstenite::Message::Text(other.into())).await.unwrap();
    app.wait_for_connections(alice.id, 1).await;
    assert!(app.state.router.presence().lookup(bob.id).await.is_empty());
}
