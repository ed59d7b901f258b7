//! # Workflows Module
//!
//! High-level entry points that tie the engine together into complete
//! simulations.
//!
//! - **Initial structures** ([`initialize`]) - Single sphere, Voronoi tessellation and a
//!   planted nucleus, each finalized into a consistent phase field
//! - **Grain growth** ([`grain_growth`]) - The curvature-driven time loop with optional
//!   external forces, checkpoints, restarts and periodic diagnostics

pub mod grain_growth;
pub mod initialize;
