//! Harvest Store — SQLite engagement store for recon findings.
//!
//! This crate is the single mutation point for an engagement database.
//! Repeated scans feed hosts, credentials, groups, shares and the edges
//! between them through the reconciler, which merges each observation into
//! prior state instead of duplicating it.

pub mod client;
mod queries;
mod reconcile;
mod relations;
mod rows;
pub mod schema;
mod snapshot;
mod validate;

pub use client::{StoreClient, StoreError};
pub use queries::TableCounts;
pub use relations::{CredentialRef, EdgeFilter, RevokeScope};
pub use snapshot::{MergeReport, Snapshot, SNAPSHOT_FORMAT_VERSION};
pub use validate::EntityKind;
