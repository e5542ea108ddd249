//! Roost Storage - database layer for the agent coordination server
//!
//! This crate provides Turso (libSQL) database integration for Roost,
//! holding the five logical tables of the coordination core: agents, tasks
//! (plus their dependency edges), file claims, shared context, and the
//! append-only action log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         roost-coord                         │
//! │  (auth, task graph, claims, context)        │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         Roost Storage (this crate)          │
//! │  • Database struct (reads of record)        │
//! │  • Txn struct (atomic mutations + audit)    │
//! │  • Schema management                        │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         Turso Database                      │
//! │  • .roost/roost.db, WAL mode                │
//! │  • Tables: agents, tasks, task_deps,        │
//! │    file_claims, context, agent_actions      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every mutation the coordination engine performs goes through a [`Txn`]:
//! the state change and its audit-log entry commit together or not at all.

pub mod db;

// Re-export commonly used types
pub use db::{ActionFilter, Database, DbError, Result, TaskFilter, Txn};
