//! Shared model, error, hashing and configuration for the deploy evidence pipeline.

pub mod config;
pub mod cosign;
pub mod error;
pub mod fsio;
pub mod hashing;
pub mod model;
pub mod time;
pub mod validate;

pub use config::*;
pub use error::*;
pub use hashing::*;
pub use model::*;
