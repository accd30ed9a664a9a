//! HTTP/1.x server plumbing
//!
//! A request codec, a path router, the connection-serving server and a
//! small client used to exercise it.

pub mod client;
pub mod codec;
pub mod config;
pub mod header;
pub mod router;
pub mod server;

#[cfg(test)]
mod tests;

pub use client::{ClientConfig, ClientConfigBuilder, HttpEchoClient};
pub use codec::{HttpCodec, RequestTarget};
pub use config::HttpConfig;
pub use router::{Handler, Router};
pub use server::HttpEchoServer;
