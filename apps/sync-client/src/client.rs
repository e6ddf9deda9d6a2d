//! Reconciliation loop: keep one push connection open, pull on every
//! (re)connect, apply pushed snapshots, and back off between attempts.

use std::sync::Arc;

use chrono::Local;
use futures_util::StreamExt;
use launchsync_common::LaunchAggregate;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::api::{PushReceipt, SyncApi};
use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::local::LocalAggregate;
use crate::state::{ConnectionState, Reconnector};

/// Start the reconciliation loop in the background.
pub fn spawn(config: ClientConfig) -> ClientHandle {
    let api = Arc::new(SyncApi::new(&config.server_url, config.token.clone()));
    let local = Arc::new(LocalAggregate::default());
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker {
        api: Arc::clone(&api),
        local: Arc::clone(&local),
        machine: Reconnector::new(Backoff::new(config.backoff_base, config.backoff_cap)),
        state_tx,
        shutdown: shutdown_rx,
    };
    let task = tokio::spawn(worker.run());

    ClientHandle {
        api,
        local,
        state_rx,
        shutdown_tx,
        task,
    }
}

/// Owner-side handle of a running client.
#[derive(Debug)]
pub struct ClientHandle {
    api: Arc<SyncApi>,
    local: Arc<LocalAggregate>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    pub fn snapshot(&self) -> LaunchAggregate {
        self.local.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<LaunchAggregate> {
        self.local.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Count a launch on this device and push the result to the server.
    pub async fn record_launch(&self) -> Result<PushReceipt, ClientError> {
        let snapshot = self.local.record_launch(Local::now());
        self.api.push(&snapshot).await
    }

    /// Push the current local snapshot as-is.
    pub async fn push(&self) -> Result<PushReceipt, ClientError> {
        self.api.push(&self.local.current()).await
    }

    /// Stop reconnecting, close the push connection and wait for the loop to
    /// exit.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "reconcile task panicked");
        }
    }
}

struct Worker {
    api: Arc<SyncApi>,
    local: Arc<LocalAggregate>,
    machine: Reconnector,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.machine.begin_connect();
            self.publish();

            let outcome = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                outcome = self.session() => outcome,
            };
            match outcome {
                Ok(()) => tracing::info!("push connection closed by server"),
                Err(e) => tracing::warn!(error = %e, "push connection failed"),
            }

            let Some(delay) = self.machine.failed() else {
                continue;
            };
            self.publish();
            tracing::info!(
                attempt = self.machine_attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.machine.stop();
        self.publish();
        tracing::info!("reconcile loop stopped");
    }

    /// One connection lifetime. Returns `Ok` on a graceful close.
    async fn session(&mut self) -> Result<(), ClientError> {
        let (mut ws, _) = connect_async(self.api.gateway_url()).await?;

        self.machine.connected();
        self.publish();
        tracing::info!("push connection established");

        // Anything pushed while we were away is only visible through a pull.
        let snapshot = self.api.pull().await?;
        tracing::debug!(total = snapshot.total, "pulled snapshot");
        self.local.apply(snapshot);

        while let Some(frame) = ws.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<LaunchAggregate>(&text) {
                    Ok(snapshot) => {
                        tracing::debug!(total = snapshot.total, "applied pushed snapshot");
                        self.local.apply(snapshot);
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed push frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn machine_attempt(&self) -> u32 {
        match self.machine.state() {
            ConnectionState::Backoff { attempt, .. } => attempt,
            _ => 0,
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state());
    }
}

/// Resolves once shutdown is requested or the handle is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
