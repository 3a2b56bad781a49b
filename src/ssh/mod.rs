//! SSH surface of the gateway.
//!
//! Accepts connections from git clients, authenticates them by public key
//! against the credential store, and serves exactly one mediated exec
//! command per session through the restricted shell. Interactive shells and
//! PTYs are refused.

pub mod server;
pub mod session;

pub use server::start_ssh_server;
