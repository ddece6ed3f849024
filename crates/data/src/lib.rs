//! Persistence boundary for the options automation engine.
//!
//! This crate provides:
//! - The [`DocumentStore`] trait the scheduler and orchestrator read and write through
//! - A `PostgreSQL` implementation keeping each document as JSONB
//! - An in-memory implementation for paper runs and tests

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::{MemoryStore, Seed};
pub use postgres::PgDocumentStore;
pub use store::{DocumentKind, DocumentStore};
