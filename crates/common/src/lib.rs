//! Shared data model for the orchestration workspace.
//!
//! Keep backend-neutral request/response types here so adapters, the factory,
//! and calling services agree on one wire shape.

#![warn(missing_docs)]

/// Orchestration DTOs shared by both backends and their callers.
pub mod api;
