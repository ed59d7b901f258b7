//! # Checkpoint I/O
//!
//! Restart files consist of a little-endian binary dump of the sparse cell
//! values ([`restart`]) and a CSV companion holding the field records
//! ([`records`]). Both implement [`traits::CheckpointFile`].

pub mod error;
pub mod records;
pub mod restart;
pub mod traits;
