pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod local;
pub mod state;

pub use client::{spawn, ClientHandle};
pub use config::ClientConfig;
pub use error::ClientError;
pub use state::ConnectionState;
