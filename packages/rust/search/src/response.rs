//! Decoding of `_search` response bodies into candidates.

use codematch_shared::{CandidateSet, RetrievalError};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Placeholder for a field missing from a hit's `_source`.
const MISSING_FIELD: &str = "N/A";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Option<HitsEnvelope>,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<TotalHits>,
    hits: Option<Vec<Hit>>,
}

/// `hits.total` is `{"value": n, "relation": ".."}` on modern clusters and a
/// bare integer on older Elasticsearch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Object { value: u64 },
    Count(u64),
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Option<Map<String, Value>>,
}

fn field_text(source: &Map<String, Value>, field: &str) -> String {
    match source.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => MISSING_FIELD.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Decode a `_search` body into ranked candidates plus the reported total hit count.
///
/// Hits without a `_source` object are skipped. A body without a
/// `hits.hits` array is malformed.
pub fn parse_search_response(
    body: &[u8],
    field: &str,
    code_field: &str,
) -> Result<(CandidateSet, Option<u64>), RetrievalError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| RetrievalError::Malformed(format!("invalid JSON: {e}")))?;

    let envelope = response
        .hits
        .ok_or_else(|| RetrievalError::Malformed("missing `hits` object".into()))?;
    let hits = envelope
        .hits
        .ok_or_else(|| RetrievalError::Malformed("missing `hits.hits` array".into()))?;

    let total = envelope.total.map(|t| match t {
        TotalHits::Object { value } => value,
        TotalHits::Count(n) => n,
    });

    let mut set = CandidateSet::new();
    for hit in hits {
        let Some(source) = hit.source else { continue };
        set.push(
            field_text(&source, code_field),
            field_text(&source, field),
            hit.score.unwrap_or(0.0),
        );
    }

    Ok((set, total))
}
