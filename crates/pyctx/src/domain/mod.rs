//! Domain types shared by the engine and its adapters.

pub mod errors;
pub mod model;
