pub mod fanout;
pub mod handler;
pub mod registry;
pub mod server;
pub mod session;
