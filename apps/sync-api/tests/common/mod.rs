#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::Router;

use sync_api::auth::verifier::{JwtVerifier, TOKEN_TTL_SECS};
use sync_api::config::Config;
use sync_api::db::store::MemoryStore;
use sync_api::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

/// Unique user IDs so parallel tests never share sessions.
pub fn next_user_id() -> i64 {
    static NEXT: AtomicI64 = AtomicI64::new(1000);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub fn test_config() -> Config {
    Config::with_secret(TEST_SECRET)
}

/// Build a test AppState with an in-memory store.
pub fn test_state() -> (AppState, MemoryStore) {
    AppState::in_memory(test_config())
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, MemoryStore) {
    let (state, store) = test_state();
    let app = sync_api::routes::router().with_state(state.clone());
    (app, state, store)
}

/// Sign a credential the test state accepts.
pub fn mint_token(user_id: i64) -> String {
    JwtVerifier::new(TEST_SECRET)
        .issue(user_id, TOKEN_TTL_SECS)
        .expect("mint test token")
}

/// Register a user in the directory and return a credential for them.
pub fn add_user(store: &MemoryStore, name: &str) -> (i64, String) {
    let user_id = next_user_id();
    store.add_user(user_id, name);
    (user_id, mint_token(user_id))
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = sync_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
