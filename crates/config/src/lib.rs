//! gh-relay config: configuration loading for the relay proxy
//!
//! Parses the optional TOML file, applies environment overrides once at
//! startup and normalizes the route prefix and list values.

pub mod config;

pub use config::*;
