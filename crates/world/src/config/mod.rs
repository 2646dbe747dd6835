//! Configuration module for the NoETL World engine.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod database;
mod world;

pub use database::DatabaseConfig;
pub use world::WorldConfig;
