//! Analysis module - pure functions from noisy comparables to a rating and narrative

pub mod market;
pub mod normalize;
pub mod regression;
pub mod scoring;
pub mod summary;
pub mod types;

pub use types::*;
