// ABOUTME: Library crate for the pgcat CLI
// ABOUTME: Configuration, scenario replay, and command implementations

pub mod commands;
pub mod config;
pub mod scenario;
pub mod utils;
