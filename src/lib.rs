//! Stream relay for browser HLS players.
//!
//! The relay fetches manifests and segments from origins that enforce referer
//! or CORS restrictions, impersonating a browser page on the given referer.
//! Manifests are rewritten so every media reference routes back through the
//! relay; everything else is streamed through untouched.

pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod server;
pub mod source;
pub mod telemetry;

pub use config::RelayConfig;
pub use engine::relay::{Relay, RelayRequest};
pub use error::RelayError;
pub use server::handler::RelayServer;
