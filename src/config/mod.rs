//! Configuration types and loading

pub mod loader;
pub mod types;
