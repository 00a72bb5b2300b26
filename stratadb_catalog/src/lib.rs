//! The StrataDB catalog.
//!
//! Authoritative metadata for a multi-model database: namespaces and their
//! logical entities, the allocation of those entities onto adapters, the
//! physical structures each adapter materialized, and the administrative
//! registry of adapters, users, and query interfaces.
//!
//! All mutation flows through [`Catalog`], which serializes writers,
//! persists each committed batch to object storage, and publishes the
//! resulting state to readers as an immutable [`snapshot::Snapshot`].

pub mod allocation;
pub mod catalog;
pub mod channel;
pub mod log;
pub mod logical;
pub mod materialized;
pub mod physical;
pub mod resource;
pub(crate) mod serialize;
pub mod snapshot;
pub mod store;
pub mod time;
mod update;

pub use catalog::{Catalog, CatalogError, CatalogSequenceNumber, Result};
pub use snapshot::Snapshot;
