use std::time::Duration;

/// Default capacity of each session's outbound snapshot queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default interval between keepalive probes on a gateway connection.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Sync API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret used to verify bearer credentials.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Maximum number of undelivered snapshots buffered per session before
    /// the session is treated as a slow consumer and disconnected.
    pub outbound_queue_capacity: usize,
    /// How often the gateway probes an idle connection.
    pub keepalive_interval: Duration,
    /// Display names preloaded into the in-memory user directory.
    pub seed_users: Vec<(i64, String)>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A missing `JWT_SECRET` is replaced by a random one so the server can
    /// still start; credentials signed with it will not survive a restart.
    pub fn from_env() -> Self {
        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret.trim().to_string(),
            _ => {
                tracing::warn!("JWT_SECRET not set, generating an ephemeral secret");
                generate_secret()
            }
        };

        Self {
            jwt_secret,
            port: parsed_var("PORT").unwrap_or(8080),
            outbound_queue_capacity: parsed_var("OUTBOUND_QUEUE_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY),
            keepalive_interval: parsed_var("KEEPALIVE_INTERVAL_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL),
            seed_users: std::env::var("SEED_USERS")
                .map(|v| parse_seed_users(&v))
                .unwrap_or_default(),
        }
    }

    /// Configuration with defaults and a fixed secret, for tests and tools.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            port: 0,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            seed_users: Vec::new(),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 32 random bytes, base64 encoded.
fn generate_secret() -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use rand::Rng;
    let mut buf = [0u8; 32];
    rand::thread_rng().fill(&mut buf[..]);
    STANDARD.encode(buf)
}

/// Parse `id:name,id:name`. Malformed entries are skipped.
fn parse_seed_users(raw: &str) -> Vec<(i64, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (id, name) = pair.split_once(':')?;
            let id = id.trim().parse().ok()?;
            let name = name.trim();
            (!name.is_empty()).then(|| (id, name.to_string()))
        })
        .collect()
}
