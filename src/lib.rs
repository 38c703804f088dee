//! warden: installs, supervises and updates the local AgentGuard daemon.
//!
//! The [`manager::Manager`] owns the daemon's lifecycle record and drives a
//! health probe, a binary installer and one supervision strategy. Everything
//! else in the crate is plumbing around it: configuration, the CLI, output
//! formatting and the local API pass-through.

pub mod api;
pub mod cli;
pub mod color;
pub mod config;
pub mod errors;
pub mod health;
pub mod http;
pub mod installer;
pub mod layout;
pub mod logging;
pub mod manager;
pub mod output;
pub mod release;
pub mod router;
pub mod supervisor;
pub mod types;
pub mod update_check;
pub mod watch;
