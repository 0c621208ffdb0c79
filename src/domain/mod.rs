//! Domain layer types and invariants for a single chart conversion.

pub mod artifact;
pub mod document;
pub mod error;
pub mod geometry;
pub mod manifest;
pub mod request;
