#![forbid(unsafe_code)]

//! Duplex NDJSON protocol engine for subprocess-backed agent sessions.
//!
//! A [`Session`] spawns (or attaches to) a worker process speaking
//! newline-delimited JSON on its stdio, performs the initialize handshake,
//! sends user turns, and yields the agent's output as a pull-based stream.
//! Tool approvals requested by the worker are answered by the built-in
//! permission policy or a host callback.

pub mod config;
pub mod errors;
pub mod external;
pub mod mode;
pub mod models;
pub mod permission;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use session::{Session, SessionOptions};
