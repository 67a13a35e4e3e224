use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use uuid::Uuid;

use parley_types::api::{LoginResponse, LogoutResponse, RegisterResponse, UserSummary};
use parley_types::models::Message;

use crate::error::ClientError;

/// Thin wrapper over the REST endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<RegisterResponse, ClientError> {
        let req = self
            .http
            .post(format!("{}/api/auth/register", self.base_url))
            .json(&json!({ "username": username, "password": password }));
        send(req, StatusCode::CREATED).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let req = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({ "username": username, "password": password }));
        send(req, StatusCode::OK).await
    }

    pub async fn logout(&self, token: &str) -> Result<LogoutResponse, ClientError> {
        let req = self
            .http
            .post(format!("{}/api/auth/logout", self.base_url))
            .bearer_auth(token);
        send(req, StatusCode::OK).await
    }

    /// Conversation with `peer_id`, oldest first.
    pub async fn history(&self, token: &str, peer_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let req = self
            .http
            .get(format!("{}/api/messages/{}", self.base_url, peer_id))
            .bearer_auth(token);
        send(req, StatusCode::OK).await
    }

    pub async fn search_users(&self, token: &str, prefix: &str) -> Result<Vec<UserSummary>, ClientError> {
        let req = self
            .http
            .get(format!("{}/api/users/search", self.base_url))
            .query(&[("q", prefix)])
            .bearer_auth(token);
        send(req, StatusCode::OK).await
    }
}

async fn send<T: serde::de::DeserializeOwned>(req: RequestBuilder, expected: StatusCode) -> Result<T, ClientError> {
    let resp = req.send().await?;
    if resp.status() != expected {
        return Err(ClientError::Status(resp.status()));
    }
    Ok(resp.json().await?)
}
