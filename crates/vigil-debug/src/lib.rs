//! `vigil-debug` - remote debug protocol daemon for the vigil runtime.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Command-id registry.
pub mod commands;
/// Daemon configuration.
pub mod config;
/// Command dispatch.
pub mod dispatcher;
/// Markup sub-format payload builders.
pub mod payload;
/// Bounded, escaped value rendering.
pub mod render;
/// TCP server and connection loop.
pub mod server;
/// Session state and strategy selection.
pub mod session;
/// Wire codec.
pub mod wire;

pub use dispatcher::Dispatcher;
pub use server::DebugServer;
pub use session::{Session, SessionState, Strategy};
pub use wire::{MalformedMessageError, WireMessage};
