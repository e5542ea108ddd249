//! Roost Coord - the coordination engine
//!
//! This crate implements the coordination core consumed by the HTTP layer
//! and the in-process tool dispatch: agent identity and authorization, the
//! task dependency graph and its status state machine, exclusive file
//! claims, the shared context store, and the append-only audit log.
//!
//! Every mutating operation requires a bearer token, runs as one storage
//! transaction, and writes exactly one audit entry on success (no-ops and
//! failures write none).

pub mod agents;
pub mod audit;
pub mod claims;
pub mod context;
pub mod coordinator;
pub mod tasks;

// Re-export the call surface types
pub use agents::{StatusReport, TerminationReport};
pub use context::SetContext;
pub use coordinator::Coordinator;
pub use tasks::{CreateTask, TaskPatch};

// Storage filters are part of the query surface
pub use roost_storage::{ActionFilter, TaskFilter};

// Core types flow through every operation signature
pub use roost_core::{
    ActionLogEntry, ActionType, Agent, AgentStatus, ContextEntry, CoordConfig, CoordError,
    FileClaim, Identity, Result, Role, Task, TaskNote, TaskPriority, TaskStatus,
};
