//! Python source dependency resolver and context bundler.

pub mod app;
pub mod cli;
pub mod domain;
pub mod infra;

/// Install the tracing subscriber for the given `-v` count.
pub fn init(verbosity: u8) {
    infra::logging::init_subscriber(infra::logging::level_for_verbosity(verbosity));
}
