//! # Phasefield Core Library
//!
//! A multi-phase-field engine for microstructure evolution. Every grid cell
//! holds a sparse list of the fields present there, pairwise driving forces
//! between coexisting fields are averaged across the interface, and a
//! bound-preserving normalization keeps every field inside `[0, 1]` with the
//! values of each cell summing to one.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Grid geometry, halo storage, stencils,
//!   the sparse per-cell data models, the field registry and file I/O.
//!
//! - **[`engine`]: The Logic Core.** The stateful phase field with its
//!   coarse and optional fine level, the driving-force field, increment
//!   normalization, the double-obstacle model and the domain abstraction
//!   used for reductions and halo exchange.
//!
//! - **[`workflows`]: The Public API.** Initial microstructures and the
//!   complete grain-growth time loop, with checkpointing and progress
//!   reporting.

pub mod core;
pub mod engine;
pub mod workflows;
