//! Out-of-process comparison model.
//!
//! The trained model runs in a separate child process and is reached over
//! JSON Lines on its stdin/stdout:
//! - Startup: the child prints diagnostics, then one handshake object
//! - Afterwards: strictly one request line, one response line

pub mod ipc_types;
pub mod line_channel;
pub mod model_service_main;
pub mod process_supervisor;

#[cfg(test)]
pub(crate) mod testing;
