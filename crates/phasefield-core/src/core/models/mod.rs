//! # Core Models Module
//!
//! Per-cell and per-field data structures of the phase-field engine.
//!
//! ## Key Components
//!
//! - [`ids`] - Generation-checked field handles and their raw integer form
//! - [`record`] - Per-field metadata and lifecycle stage
//! - [`registry`] - Append-only owner of every field record
//! - [`cell`] - Sparse partition-of-unity list of fields in one cell
//! - [`pairs`] - Pairwise increments accumulated during one step
//! - [`force`] - Pairwise driving-force samples of one cell
//!
//! All per-cell containers keep their entries sorted by id, so lookups are
//! binary searches and iteration order is deterministic across runs.

pub mod cell;
pub mod force;
pub mod ids;
pub mod pairs;
pub mod record;
pub mod registry;
