//! Persistence for the discovery pipeline: the relational store (single
//! writer for all entities) and the object store for PDF artifacts.

pub mod migrations;
pub mod object;
pub mod store;

pub use object::{FsObjectStore, ObjectStore, ObjectStoreError};
pub use store::{NewResult, SavedResult, Store, StoreError};
