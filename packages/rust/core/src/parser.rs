//! Parsing of model answers into code tokens.
//!
//! Commas and newlines are equivalent separators. Tokens are trimmed and
//! empties dropped; nothing is validated against a vocabulary, so a
//! hallucinated code passes through unchanged.

use codematch_shared::ExtractedCodes;

/// Split a completion into trimmed, non-empty code tokens in emitted order.
pub fn parse_codes(text: &str) -> ExtractedCodes {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}
