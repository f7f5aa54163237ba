//! Language model completion for code disambiguation.
//!
//! The only capability required of a model provider is "accept a
//! system + user message pair, return one text completion"; that is the
//! [`CompletionBackend`] trait. [`ChatCompletionClient`] implements it for
//! OpenAI-compatible `/chat/completions` endpoints (OpenRouter by default).
//!
//! Backends never retry. Failures surface as [`CompletionError`] so the
//! caller decides what to do with them.

mod chat;

use std::future::Future;

use codematch_shared::CompletionError;

pub use chat::ChatCompletionClient;

/// One completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionRequest<'a> {
    /// Model identifier understood by the backend.
    pub model: &'a str,
    /// System instruction describing the assistant's role.
    pub system: &'a str,
    /// User prompt.
    pub prompt: &'a str,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Sampling temperature; 0 for deterministic extraction.
    pub temperature: f32,
}

/// A model provider.
pub trait CompletionBackend: Send + Sync {
    /// Return the generated text for the request.
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send;
}

/// Reject prompts longer than `limit` characters.
pub fn check_prompt_size(prompt: &str, limit: usize) -> Result<(), CompletionError> {
    let chars = prompt.chars().count();
    if chars > limit {
        return Err(CompletionError::PromptTooLarge { chars, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_within_limit() {
        assert!(check_prompt_size("abc", 3).is_ok());
    }

    #[test]
    fn prompt_over_limit() {
        let err = check_prompt_size("abcd", 3).unwrap_err();
        assert_eq!(err, CompletionError::PromptTooLarge { chars: 4, limit: 3 });
    }

    #[test]
    fn limit_counts_chars_not_bytes() {
        assert!(check_prompt_size("µg/dL", 5).is_ok());
    }
}
