use std::time::Duration;

/// Default first reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default ceiling on the reconnect delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Device-side configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP origin of the sync server (e.g. `http://localhost:8080`).
    pub server_url: String,
    /// Bearer credential obtained from the login flow.
    pub token: String,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let mut config = Self::new(required_var("SYNC_SERVER_URL"), required_var("SYNC_TOKEN"));
        if let Some(ms) = millis_var("SYNC_BACKOFF_BASE_MS") {
            config.backoff_base = ms;
        }
        if let Some(ms) = millis_var("SYNC_BACKOFF_CAP_MS") {
            config.backoff_cap = ms;
        }
        config
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn millis_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|ms: &u64| *ms > 0)
        .map(Duration::from_millis)
}
