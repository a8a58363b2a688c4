//! Application layer: the bundling engine built on domain types and infrastructure.

pub mod batch;
pub mod bundle;
pub mod imports;
pub mod locate;
pub mod modules;
pub(crate) mod syntax;
pub mod tokens;
pub mod tree;
