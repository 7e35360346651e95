//! Configuration loader and schema types.
//!
//! This module exposes the configuration schema used to drive engine
//! behavior and helpers to load configuration from disk.

mod load;
mod schema;

pub use schema::*;
