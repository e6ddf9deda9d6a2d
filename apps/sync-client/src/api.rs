//! HTTP half of the sync protocol: pull and push of the full snapshot.

use launchsync_common::LaunchAggregate;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ClientError;

const SYNC_PATH: &str = "/api/v1/sync";
const GATEWAY_PATH: &str = "/gateway";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Push response from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct PushReceipt {
    pub message: String,
    /// Connected devices the snapshot was queued for.
    pub delivered: usize,
}

#[derive(Debug, Clone)]
pub struct SyncApi {
    http: Client,
    base_url: String,
    token: String,
}

impl SyncApi {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// `GET /api/v1/sync`: the authoritative snapshot.
    pub async fn pull(&self) -> Result<LaunchAggregate, ClientError> {
        let resp = self
            .http
            .get(format!("{}{SYNC_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    /// `POST /api/v1/sync`: replace the server copy and fan it out.
    pub async fn push(&self, snapshot: &LaunchAggregate) -> Result<PushReceipt, ClientError> {
        let resp = self
            .http
            .post(format!("{}{SYNC_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .json(snapshot)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    /// WebSocket URL of the push channel, carrying the credential as a query
    /// parameter.
    pub fn gateway_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}{GATEWAY_PATH}?token={}", self.token)
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Read the body and parse it, keeping transport and format failures apart.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let body = resp.bytes().await?;
    parse_body(&body)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    Ok(serde_json::from_slice(body)?)
}
