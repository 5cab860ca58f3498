//! harvest-core: Shared types, configuration, and error handling for the
//! Harvest engagement store.
//!
//! This crate provides the foundational types used across all Harvest components:
//! - Entity records (Host, Credential, Group, Share) and their integer ids
//! - Relation records (admin, logged-in, group membership)
//! - Observation structures carrying per-field presence for merges
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use error::HarvestError;
pub use types::*;
