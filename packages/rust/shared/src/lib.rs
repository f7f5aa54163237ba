//! Shared types, error model, and configuration for CodeMatch.
//!
//! This crate is the foundation depended on by all other CodeMatch crates.
//! It provides:
//! - [`CodeMatchError`] and the stage errors [`RetrievalError`] / [`CompletionError`]
//! - Domain types ([`Candidate`], [`CandidateSet`], [`CodeSystem`])
//! - Configuration ([`AppConfig`], config loading) and search credentials

pub mod config;
pub mod credentials;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CompletionConfig, DefaultsConfig, IndexesConfig, SearchConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
pub use credentials::{SearchCredentials, load_credentials, parse_credentials};
pub use error::{CodeMatchError, CompletionError, Result, RetrievalError};
pub use types::{Candidate, CandidateSet, CodeSystem, ExtractedCodes};
