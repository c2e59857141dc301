//! Shared types, error model, and configuration for Articulator.
//!
//! This crate is the foundation depended on by all other Articulator crates.
//! It provides:
//! - [`ArticulatorError`]: the unified error type
//! - Domain types ([`Institution`], [`AgreementEndpoint`], [`SubjectReport`],
//!   [`ResolvedKey`], [`MergedArtifact`], [`SchoolManifest`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CatalogConfig, PipelineConfig, RunConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{ArticulatorError, Result};
pub use types::{
    AgreementEndpoint, CURRENT_SCHEMA_VERSION, Institution, InstitutionDirectory,
    MergedArtifact, ResolvedKey, RunId, SchoolManifest, SkippedSubject, SubjectEntry,
    SubjectReport,
};
