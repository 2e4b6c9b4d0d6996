// ABOUTME: Command implementations for the pgcat CLI
// ABOUTME: Exports scenario replay, configuration, and plugin inspection commands

pub mod config;
pub mod plugin;
pub mod run;

pub use run::run;
