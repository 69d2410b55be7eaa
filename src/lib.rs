//! TLS data-integrity and throughput harness.
//!
//! For every accepted TLS connection the server streams a fixed pseudorandom
//! chunk to the peer while reading the same volume back, pacing the sender
//! against the receiver with a bounded in-flight window.
//!
//! - [`payload`]: reference chunk generation
//! - [`gate`]: the backpressure gate enforcing the window
//! - [`session`]: per-connection sender/receiver pair and teardown
//! - [`network`]: TLS setup, the acceptor loop, and the echo peer
//! - [`relay`]: WebSocket broadcast relay used alongside the harness

pub mod config;
pub mod gate;
pub mod metrics;
pub mod network;
pub mod payload;
pub mod relay;
pub mod session;
pub mod telemetry;
