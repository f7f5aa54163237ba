//! OpenSearch / Elasticsearch REST client.

use std::time::Duration;

use codematch_shared::{
    CandidateSet, CodeMatchError, RetrievalError, SearchConfig, SearchCredentials,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use url::Url;

use crate::response::parse_search_response;
use crate::{SearchBackend, SearchRequest};

/// Maximum response body size (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("CodeMatch/", env!("CARGO_PKG_VERSION"));

/// Cluster identity returned by `GET /`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub version: Option<ClusterVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterVersion {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub distribution: Option<String>,
}

/// Search client bound to one cluster and one set of credentials.
///
/// Holds a pooled `reqwest::Client`; clone freely, clones share the pool.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    client: Client,
    base_url: Url,
    credentials: SearchCredentials,
}

impl OpenSearchClient {
    /// Build a client from config. Does not contact the cluster.
    pub fn new(
        config: &SearchConfig,
        credentials: SearchCredentials,
    ) -> Result<Self, CodeMatchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| CodeMatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Self::with_client(client, &config.host, credentials)
    }

    /// Build from an existing HTTP client (shared pool, custom TLS, tests).
    pub fn with_client(
        client: Client,
        host: &str,
        credentials: SearchCredentials,
    ) -> Result<Self, CodeMatchError> {
        let base_url = Url::parse(host)
            .map_err(|e| CodeMatchError::config(format!("invalid search host '{host}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CodeMatchError::config(format!(
                "search host '{host}' is not an http(s) base URL"
            )));
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RetrievalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RetrievalError::Connect(format!("{} is not a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            SearchCredentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            SearchCredentials::Bearer { token } => builder.bearer_auth(token),
        }
    }

    /// Check connectivity and credentials with `GET /`.
    #[instrument(skip_all, fields(host = %self.base_url))]
    pub async fn ping(&self) -> Result<ClusterInfo, RetrievalError> {
        let url = self.endpoint(&[])?;
        let response = send(self.authorize(self.client.get(url))).await?;
        let body = read_success(response).await?;

        let info: ClusterInfo = serde_json::from_slice(&body)
            .map_err(|e| RetrievalError::Malformed(format!("invalid cluster info: {e}")))?;
        info!(cluster = ?info.cluster_name, "connected to search cluster");
        Ok(info)
    }

    /// Raise `indices.query.bool.max_clause_count` cluster-wide.
    ///
    /// Only some engines cap boolean clauses; call once at setup, not per query.
    #[instrument(skip_all, fields(count = count))]
    pub async fn apply_max_clause_count(&self, count: u32) -> Result<(), RetrievalError> {
        let url = self.endpoint(&["_cluster", "settings"])?;
        let body = json!({
            "persistent": {
                "indices.query.bool.max_clause_count": count
            }
        });

        let response = send(self.authorize(self.client.put(url)).json(&body)).await?;
        read_success(response).await?;
        info!(count, "applied max_clause_count");
        Ok(())
    }
}

impl SearchBackend for OpenSearchClient {
    #[instrument(
        skip_all,
        fields(index = request.index, field = request.field, size = request.size)
    )]
    async fn query(&self, request: &SearchRequest<'_>) -> Result<CandidateSet, RetrievalError> {
        let url = self.endpoint(&[request.index, "_search"])?;
        let body = search_body(request);

        info!(text = request.text, "querying search index");
        debug!(body = %body, "search body");

        let response = send(self.authorize(self.client.post(url)).json(&body)).await?;
        let bytes = read_success(response).await?;
        let (set, total) = parse_search_response(&bytes, request.field, request.code_field)?;

        info!(total = ?total, retrieved = set.len(), "search finished");
        Ok(set)
    }
}

/// Scored match query sorted by descending relevance.
fn search_body(request: &SearchRequest<'_>) -> serde_json::Value {
    json!({
        "size": request.size,
        "query": {
            "match": {
                request.field: request.text
            }
        },
        "sort": [
            {"_score": {"order": "desc"}}
        ]
    })
}

async fn send(builder: RequestBuilder) -> Result<Response, RetrievalError> {
    builder
        .send()
        .await
        .map_err(|e| RetrievalError::Connect(e.to_string()))
}

/// Return the body of a 2xx response, mapping any other status to an error.
async fn read_success(response: Response) -> Result<Vec<u8>, RetrievalError> {
    let status = response.status();
    if let Some(len) = response.content_length() {
        check_size(len)?;
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| RetrievalError::Connect(format!("failed to read body: {e}")))?;
    check_size(body.len() as u64)?;

    if status.is_success() {
        return Ok(body.to_vec());
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RetrievalError::Unauthorized {
            status: status.as_u16(),
        }),
        _ => Err(RetrievalError::Status {
            status: status.as_u16(),
            reason: error_reason(&body),
        }),
    }
}

fn check_size(len: u64) -> Result<(), RetrievalError> {
    if len > MAX_RESPONSE_SIZE {
        return Err(RetrievalError::Malformed(format!(
            "response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
        )));
    }
    Ok(())
}

/// Pull `error.reason` out of an error body, falling back to the raw text.
fn error_reason(body: &[u8]) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    if let Some(reason) = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/reason"))
        .and_then(|r| r.as_str())
    {
        return reason.to_string();
    }

    let text = String::from_utf8_lossy(body);
    text.chars().take(200).collect()
}
