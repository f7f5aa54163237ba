//! Search backend credentials loaded from a JSON file.
//!
//! Accepted shapes:
//! - `{"username": "...", "password": "..."}` for basic auth
//! - `{"token": "..."}` for bearer auth
//!
//! Anything else is a config error, reported before any network call.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{CodeMatchError, Result};

/// Credentials for the search backend.
#[derive(Clone, PartialEq, Eq)]
pub enum SearchCredentials {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl std::fmt::Debug for SearchCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Deserialize)]
struct RawCredentials {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse credentials from JSON text.
pub fn parse_credentials(json: &str) -> Result<SearchCredentials> {
    let raw: RawCredentials = serde_json::from_str(json)
        .map_err(|e| CodeMatchError::config(format!("invalid credentials JSON: {e}")))?;

    if let Some(token) = non_empty(raw.token) {
        return Ok(SearchCredentials::Bearer { token });
    }

    match (non_empty(raw.username), non_empty(raw.password)) {
        (Some(username), Some(password)) => Ok(SearchCredentials::Basic { username, password }),
        _ => Err(CodeMatchError::config(
            "search username or password not found in credentials file",
        )),
    }
}

/// Load credentials from a JSON file on disk.
pub fn load_credentials(path: &Path) -> Result<SearchCredentials> {
    info!(?path, "loading search credentials");
    let content = std::fs::read_to_string(path).map_err(|e| {
        CodeMatchError::config(format!(
            "cannot read credentials file {}: {e}",
            path.display()
        ))
    })?;
    parse_credentials(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials() {
        let creds = parse_credentials(r#"{"username": "admin", "password": "s3cret"}"#).unwrap();
        assert_eq!(
            creds,
            SearchCredentials::Basic {
                username: "admin".into(),
                password: "s3cret".into(),
            }
        );
    }

    #[test]
    fn token_takes_precedence() {
        let creds = parse_credentials(r#"{"username": "admin", "token": "abc"}"#).unwrap();
        assert_eq!(
            creds,
            SearchCredentials::Bearer {
                token: "abc".into()
            }
        );
    }

    #[test]
    fn missing_password_is_config_error() {
        let err = parse_credentials(r#"{"username": "admin"}"#).unwrap_err();
        assert!(matches!(err, CodeMatchError::Config { .. }));
        assert!(err.to_string().contains("username or password"));
    }

    #[test]
    fn blank_fields_are_missing() {
        let err = parse_credentials(r#"{"username": "admin", "password": "  "}"#).unwrap_err();
        assert!(matches!(err, CodeMatchError::Config { .. }));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = parse_credentials("not json").unwrap_err();
        assert!(err.to_string().contains("invalid credentials JSON"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_credentials(Path::new("/nonexistent/codematch/creds.json")).unwrap_err();
        assert!(matches!(err, CodeMatchError::Config { .. }));
        assert!(err.to_string().contains("/nonexistent/codematch/creds.json"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = SearchCredentials::Basic {
            username: "admin".into(),
            password: "s3cret".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("s3cret"));
    }
}
