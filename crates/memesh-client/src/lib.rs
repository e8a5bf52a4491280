mod client;
mod config;
mod error;
pub mod frame;
mod realtime;
pub mod urls;

pub use crate::client::HttpBackend;
pub use crate::config::HttpClientConfig;
pub use crate::error::{MemeshClientError, Result};
pub use crate::realtime::SocketIoConnector;

#[cfg(test)]
mod tests;
