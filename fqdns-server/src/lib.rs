//! The forwarding DNS server and its companion discovery tool.

pub mod discover;
pub mod server;

pub use discover::discover;
pub use server::{Error, Server, ServerConfig};
