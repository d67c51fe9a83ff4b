//! Process-level concerns of the chat server: command line and environment
//! configuration, and logger set-up.

pub mod config;
pub mod logging;
