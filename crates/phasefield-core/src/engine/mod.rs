//! # Engine Module
//!
//! The stateful part of the library: everything that evolves from one time
//! step to the next.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Validated builders for the grid, the phase field,
//!   the driving force, interface properties and complete runs
//! - **Domain** ([`domain`]) - Halo refresh and collective reductions of the spatial decomposition
//! - **Phase field** ([`phase_field`]) - Field storage on one or two resolution levels,
//!   finalize, normalization, merge and checkpoints
//! - **Driving force** ([`driving_force`]) - Pairwise forces, their averaging and limiting
//! - **Interface model** ([`interface`], [`obstacle`]) - Per-phase-pair properties and the
//!   double-obstacle curvature term
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! ## Step order
//!
//! A step clears the driving force, lets producers add increments and raw
//! forces, averages and merges the forces into increments, normalizes them
//! and finally merges them into the fields. Every pass that reads
//! neighbouring cells runs after a halo refresh.

pub mod config;
pub mod domain;
pub mod driving_force;
pub mod error;
pub mod interface;
pub mod obstacle;
pub mod phase_field;
pub mod progress;
