//! Application layer: the engine contract and the conversion pipeline.

pub mod convert;
pub mod engine;
pub mod error;
