use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use launchsync_common::LaunchAggregate;
use sync_api::auth::verifier::{JwtVerifier, TOKEN_TTL_SECS};
use sync_api::config::Config;
use sync_api::db::store::{AggregateStore, MemoryStore};
use sync_api::AppState;
use sync_client::{ClientConfig, ClientHandle, ConnectionState};

const TEST_SECRET: &str = "client-test-secret";
const WAIT: Duration = Duration::from_secs(5);

fn next_user_id() -> i64 {
    static NEXT: AtomicI64 = AtomicI64::new(5000);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

async fn start_server() -> (SocketAddr, AppState, MemoryStore) {
    start_server_with(Config::with_secret(TEST_SECRET)).await
}

async fn start_server_with(config: Config) -> (SocketAddr, AppState, MemoryStore) {
    let (state, store) = AppState::in_memory(config);
    let app = sync_api::routes::router().with_state(state.clone());

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

    (addr, state, store)
}

fn token_for(user_id: i64) -> String {
    JwtVerifier::new(TEST_SECRET)
        .issue(user_id, TOKEN_TTL_SECS)
        .unwrap()
}

fn client(addr: SocketAddr, token: &str) -> ClientHandle {
    client_with_backoff(addr, token, Duration::from_millis(20), Duration::from_millis(80))
}

fn client_with_backoff(
    addr: SocketAddr,
    token: &str,
    base: Duration,
    cap: Duration,
) -> ClientHandle {
    let mut config = ClientConfig::new(format!("http://{addr}"), token);
    config.backoff_base = base;
    config.backoff_cap = cap;
    sync_client::spawn(config)
}

async fn wait_for_state(
    handle: &ClientHandle,
    what: &str,
    cond: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = handle.watch_state();
    let state = tokio::time::timeout(WAIT, rx.wait_for(cond))
        .await
        .unwrap_or_else(|_| panic!("client never reached {what}"))
        .map(|s| *s)
        .unwrap();
    state
}

/// Overflow the user's single-slot queues until the dispatcher drops a
/// session.
fn saturate(state: &AppState, user_id: i64) {
    for n in 0..10_000u64 {
        let mut snap = LaunchAggregate::empty(user_id);
        snap.total = 1_000 + n;
        if state.dispatcher.dispatch(user_id, snap).dropped > 0 {
            return;
        }
    }
    panic!("session queue never filled");
}

async fn wait_for_total(handle: &ClientHandle, total: u64) -> LaunchAggregate {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|agg| agg.total == total))
        .await
        .unwrap_or_else(|_| panic!("client never reached total {total}"))
        .unwrap()
        .clone();
    snapshot
}

/// Wait until the client's first pull has landed.
async fn wait_for_pull(handle: &ClientHandle, user_id: i64) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|agg| agg.user_id == user_id))
        .await
        .expect("client never pulled")
        .unwrap();
}

async fn wait_for_sessions(state: &AppState, user_id: i64, count: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while state.registry.sessions_for(user_id).len() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {count} sessions for user {user_id}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn launch_on_one_device_reaches_the_others() {
    let (addr, state, store) = start_server().await;
    let user_id = next_user_id();
    store.add_user(user_id, "alice");

    let mut seeded = LaunchAggregate::empty(user_id);
    seeded.total = 5;
    seeded.year_data.insert("2024".into(), 5);
    seeded.month_data.insert("2024-1".into(), 5);
    seeded.day_data.insert("2024-1-1".into(), 5);
    seeded.last_launch = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
    state.aggregates.save(&seeded).await.unwrap();

    let token = token_for(user_id);
    let device_a = client(addr, &token);
    let device_b = client(addr, &token);

    // Both devices pull the seeded snapshot on connect.
    assert_eq!(wait_for_total(&device_a, 5).await, seeded);
    assert_eq!(wait_for_total(&device_b, 5).await, seeded);
    wait_for_sessions(&state, user_id, 2).await;

    let receipt = device_a.record_launch().await.unwrap();
    assert_eq!(receipt.message, "synced");
    assert_eq!(receipt.delivered, 2);

    let on_a = device_a.snapshot();
    assert_eq!(on_a.total, 6);
    assert_eq!(on_a.day_data["2024-1-1"], 5);
    assert!(on_a.is_consistent());

    // B's copy is replaced by the pushed one.
    let on_b = wait_for_total(&device_b, 6).await;
    assert_eq!(on_b, on_a);
    assert_eq!(store.get(user_id).unwrap(), on_a);

    // A device connecting afterwards catches up through its pull.
    let device_c = client(addr, &token);
    assert_eq!(wait_for_total(&device_c, 6).await, on_a);

    for device in [device_a, device_b, device_c] {
        device.shutdown().await;
    }
    wait_for_sessions(&state, user_id, 0).await;
}

#[tokio::test]
async fn devices_of_other_users_are_untouched() {
    let (addr, state, store) = start_server().await;
    let alice = next_user_id();
    let bob = next_user_id();
    store.add_user(alice, "alice");
    store.add_user(bob, "bob");

    let alice_device = client(addr, &token_for(alice));
    let bob_device = client(addr, &token_for(bob));
    wait_for_pull(&alice_device, alice).await;
    wait_for_pull(&bob_device, bob).await;
    wait_for_sessions(&state, alice, 1).await;
    wait_for_sessions(&state, bob, 1).await;

    let receipt = alice_device.record_launch().await.unwrap();
    assert_eq!(receipt.delivered, 1);
    wait_for_total(&alice_device, 1).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bob_device.snapshot(), LaunchAggregate::empty(bob));

    alice_device.shutdown().await;
    bob_device.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_backs_off_with_growing_attempts() {
    // Grab a free port, then release it so nothing is listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let device = client(addr, "irrelevant");
    let mut state = device.watch_state();
    let reached = tokio::time::timeout(
        WAIT,
        state.wait_for(|s| matches!(s, ConnectionState::Backoff { attempt, .. } if *attempt >= 3)),
    )
    .await
    .expect("client should keep retrying")
    .map(|s| *s)
    .unwrap();

    match reached {
        ConnectionState::Backoff { delay, .. } => {
            assert!(delay <= Duration::from_millis(80), "delay is capped");
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(device.snapshot(), LaunchAggregate::empty(0));

    let mut state = device.watch_state();
    device.shutdown().await;
    assert_eq!(*state.borrow_and_update(), ConnectionState::Idle);
}

#[tokio::test]
async fn rejected_credentials_are_retried_not_fatal() {
    let (addr, state, _store) = start_server().await;

    let device = client(addr, "not-a-token");
    let mut watch = device.watch_state();
    tokio::time::timeout(
        WAIT,
        watch.wait_for(|s| matches!(s, ConnectionState::Backoff { attempt, .. } if *attempt >= 2)),
    )
    .await
    .expect("handshake rejection should lead to backoff")
    .unwrap();

    assert_eq!(state.registry.session_count(), 0);
    device.shutdown().await;
}

#[tokio::test]
async fn dropped_device_reconnects_and_pulls_what_it_missed() {
    let mut config = Config::with_secret(TEST_SECRET);
    config.outbound_queue_capacity = 1;
    let (addr, state, store) = start_server_with(config).await;
    let user_id = next_user_id();
    store.add_user(user_id, "alice");

    let device = client_with_backoff(
        addr,
        &token_for(user_id),
        Duration::from_millis(200),
        Duration::from_secs(1),
    );
    wait_for_pull(&device, user_id).await;
    wait_for_sessions(&state, user_id, 1).await;

    // The server disconnects the device as a slow consumer, and the update
    // that follows is never pushed to it.
    saturate(&state, user_id);
    assert_eq!(state.registry.sessions_for(user_id).len(), 0);

    let mut missed = LaunchAggregate::empty(user_id);
    missed.total = 7;
    missed.year_data.insert("2024".into(), 7);
    missed.month_data.insert("2024-1".into(), 7);
    missed.day_data.insert("2024-1-1".into(), 7);
    missed.last_launch = Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    state.aggregates.save(&missed).await.unwrap();

    let backoff = wait_for_state(&device, "backoff", |s| {
        matches!(s, ConnectionState::Backoff { .. })
    })
    .await;
    assert_eq!(
        backoff,
        ConnectionState::Backoff {
            attempt: 1,
            delay: Duration::from_millis(200)
        }
    );

    wait_for_state(&device, "connected", |s| *s == ConnectionState::Connected).await;
    assert_eq!(wait_for_total(&device, 7).await, missed);
    wait_for_sessions(&state, user_id, 1).await;

    // A second drop starts from the base delay again: the successful
    // reconnect reset the attempt counter.
    saturate(&state, user_id);
    let backoff = wait_for_state(&device, "second backoff", |s| {
        matches!(s, ConnectionState::Backoff { .. })
    })
    .await;
    assert_eq!(
        backoff,
        ConnectionState::Backoff {
            attempt: 1,
            delay: Duration::from_millis(200)
        }
    );

    device.shutdown().await;
}
