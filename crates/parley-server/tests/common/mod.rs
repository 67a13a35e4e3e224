#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::auth::{AppState, AppStateInner};
use parley_client::{ApiClient, Session, Subscription};
use parley_db::Database;
use parley_gateway::connection::GatewayConfig;
use parley_server::app::{build_router, build_state};
use parley_server::config::ServerConfig;
use parley_types::events::GatewayEvent;
use parley_types::models::Message;

pub const SECRET: &str = "integration-test-secret";
pub const PASSWORD: &str = "correct-horse-battery";

pub fn test_config() -> ServerConfig {
    ServerConfig::from_vars(|key| match key {
        "PARLEY_JWT_SECRET" => Some(SECRET.to_string()),
        "PARLEY_HANDSHAKE_TIMEOUT_SECS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn test_state() -> AppState {
    let db = Arc::new(Database::open_in_memory().unwrap());
    build_state(db, &test_config())
}

/// A server listening on an ephemeral localhost port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub api: ApiClient,
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_gateway(|_| {}).await
    }

    pub async fn spawn_with_gateway(tweak: impl FnOnce(&mut GatewayConfig)) -> Self {
        let base = test_state();
        let mut gateway = (*base.gateway).clone();
        tweak(&mut gateway);
        let state = Arc::new(AppStateInner {
            db: base.db.clone(),
            router: base.router.clone(),
            gateway: Arc::new(gateway),
            token_ttl: base.token_ttl,
        });
        let app = build_router(state.clone(), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            api: ApiClient::new(format!("http://{}", addr)),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    pub async fn user(&self, username: &str) -> TestUser {
        let resp = self.api.register(username, PASSWORD).await.unwrap();
        TestUser {
            id: resp.user_id,
            token: resp.token,
        }
    }

    pub async fn connect(&self, user: &TestUser) -> Session {
        Session::connect(&self.ws_url(), &user.token).await.unwrap()
    }

    /// Poll until `user` has exactly `n` joined connections.
    pub async fn wait_for_connections(&self, user: Uuid, n: usize) {
        let presence = self.state.router.presence();
        tokio::time::timeout(Duration::from_secs(5), async {
            while presence.lookup(user).await.len() != n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("user {} never reached {} connection(s)", user, n));
    }
}

/// Collect every `MessageCreate` pushed to `session`.
pub fn collect_messages(session: &Session) -> (Subscription, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = session.subscribe(move |event| {
        if let GatewayEvent::MessageCreate(msg) = event {
            let _ = tx.send(msg);
        }
    });
    (sub, rx)
}

pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("subscription ended")
}

// -- In-process HTTP helpers --

pub async fn call(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn register(app: &axum::Router, username: &str) -> TestUser {
    let (status, body) = call(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "username": username, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register {}", username);

    TestUser {
        id: body["user_id"].as_str().unwrap().parse().unwrap(),
        token: body["token"].as_str().unwrap().to_string(),
    }
}
