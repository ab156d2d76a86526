//! Compiling staged modules.
//!
//! The coordinator never compiles anything itself. It stages a working
//! directory, asks a [`Generator`] for any extra sources, and hands the
//! directory to the [`Builder`] registered for the requested
//! [`BuildSystem`].
//!
//! # Submodules
//!
//! - [`inputs`] - Build parameters and the checksums derived from them
//! - [`command`] - Shell command builder
//! - [`generate`] - Source generators

pub mod command;
pub mod generate;
pub mod inputs;
mod types;

pub use types::*;
