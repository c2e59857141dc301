//! Core domain logic for Articulator.
//!
//! This crate ties together label normalization, partner fan-out, artifact
//! retrieval, and manifest writing into the per-institution pipeline.

pub mod label;
pub mod manifest;
pub mod pdf;
pub mod pipeline;
pub mod resolver;
pub mod retrieval;
