pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use auth::verifier::{IdentityVerifier, JwtVerifier};
use config::Config;
use db::store::{AggregateStore, MemoryStore, UserDirectory};
use gateway::fanout::Dispatcher;
use gateway::registry::ConnectionRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub users: Arc<dyn UserDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the gateway around the given external collaborators.
    pub fn new(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        aggregates: Arc<dyn AggregateStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            verifier,
            aggregates,
            users,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            config: Arc::new(config),
        }
    }

    /// State backed by a JWT verifier on `config.jwt_secret` and an in-memory
    /// store seeded with `config.seed_users`. The store handle is returned so
    /// callers can add users.
    pub fn in_memory(config: Config) -> (Self, MemoryStore) {
        let store = MemoryStore::new();
        for (user_id, name) in &config.seed_users {
            store.add_user(*user_id, name.clone());
        }
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
        let state = Self::new(
            config,
            verifier,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        );
        (state, store)
    }
}
