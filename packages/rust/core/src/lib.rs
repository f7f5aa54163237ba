//! Core pipeline orchestration and domain logic for CodeMatch.
//!
//! This crate ties together candidate retrieval, grounding prompt
//! construction, model completion, and answer parsing into the end-to-end
//! extraction workflow ([`pipeline::Extractor`]).

pub mod parser;
pub mod pipeline;
pub mod prompt;

pub use parser::parse_codes;
pub use pipeline::{
    ExtractionConfig, ExtractionOutcome, ExtractionProgress, Extractor, SilentProgress,
};
pub use prompt::{build_prompt, system_instruction};
