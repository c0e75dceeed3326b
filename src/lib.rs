//! Per-employee evaluation sheet export.
//!
//! Reconciles self, peer and average evaluation records into one ordered set
//! of employees and writes one sheet per employee into a copy of a template
//! document through a [`store::DocumentStore`].

pub mod config;
pub mod export;
pub mod identity;
pub mod layout;
pub mod memory_store;
pub mod models;
pub mod projection;
pub mod records;
pub mod report;
pub mod store;
