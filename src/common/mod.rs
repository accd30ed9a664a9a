//! Common traits and helpers used across the reflectsrv library
//!
//! This module contains the core traits that define the interface
//! for the echo server and its client.

pub mod test_utils;
pub mod traits;

pub use test_utils::spawn_test_server;
pub use traits::{EchoClient, EchoServerTrait};
