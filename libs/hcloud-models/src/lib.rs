//! Hetzner Cloud API models
//!
//! Serde mappings of the subset of the Hetzner Cloud API used to provision clusters.

pub mod models;

pub use models::*;
