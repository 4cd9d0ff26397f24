//! Image management module
//!
//! Resolves container images against the local image store, pulling them
//! from their registry when needed.

pub mod resolver;

pub use resolver::{normalize_reference, ImageOutcome, ImageResolver};
