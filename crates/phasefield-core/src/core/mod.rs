//! # Core Module
//!
//! Stateless data models and numerics underneath the phase-field engine.
//!
//! ## Architecture
//!
//! - **Grid geometry** ([`grid`]) - Grid descriptor, halo storage, finite-difference
//!   stencils and boundary conditions
//! - **Data models** ([`models`]) - Sparse per-cell field lists, pairwise increments,
//!   driving-force samples and the field registry
//! - **Parameters** ([`params`]) - Per-phase-pair interface parameters loaded from TOML
//! - **File I/O** ([`io`]) - Binary restart dumps and the CSV field-record companion
//!
//! Nothing in this module owns simulation state across steps; that is the job
//! of [`crate::engine`].

pub mod grid;
pub mod io;
pub mod models;
pub mod params;
