//! Recoup Storage - Persistence for dunning configurations, campaigns and attempts
//!
//! This crate provides the repository traits the dunning engine consumes,
//! a PostgreSQL implementation of each, and an in-memory store used by
//! tests and local runs.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
