use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("push connection failed: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("undecodable snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}
