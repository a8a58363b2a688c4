//! Adapters for configuration, ignore rules, interpreters, and logging.

pub mod classify;
pub mod config;
pub mod ignore;
pub mod interpreter;
pub mod logging;
