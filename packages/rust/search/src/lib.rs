//! Candidate retrieval from a full-text search index.
//!
//! A [`SearchBackend`] runs one scored "match" query and returns hits as a
//! ranked [`CandidateSet`]. [`OpenSearchClient`] implements it for
//! OpenSearch / Elasticsearch clusters; tests substitute in-memory backends.

mod opensearch;
mod response;

use std::future::Future;

use codematch_shared::{CandidateSet, RetrievalError};
use tracing::warn;

pub use opensearch::{ClusterInfo, ClusterVersion, OpenSearchClient};
pub use response::parse_search_response;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Parameters of one relevance query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRequest<'a> {
    /// Free-text description to match.
    pub text: &'a str,
    /// Maximum number of hits to return.
    pub size: usize,
    /// Index to query.
    pub index: &'a str,
    /// Field matched against `text`; also read back as the candidate label.
    pub field: &'a str,
    /// Field holding the code value.
    pub code_field: &'a str,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A search engine able to run scored match queries with a result cap.
///
/// Implementations must not cache results between calls.
pub trait SearchBackend: Send + Sync {
    /// Run the query and return hits ordered by descending score.
    fn query(
        &self,
        request: &SearchRequest<'_>,
    ) -> impl Future<Output = Result<CandidateSet, RetrievalError>> + Send;
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run a query, skipping the backend entirely when `size == 0`.
pub async fn retrieve<B: SearchBackend>(
    backend: &B,
    request: &SearchRequest<'_>,
) -> Result<CandidateSet, RetrievalError> {
    if request.size == 0 {
        return Ok(CandidateSet::new());
    }
    backend.query(request).await
}

/// Soft-failing search: any backend error is logged and yields an empty set.
pub async fn search<B: SearchBackend>(backend: &B, request: &SearchRequest<'_>) -> CandidateSet {
    match retrieve(backend, request).await {
        Ok(set) => set,
        Err(e) => {
            warn!(index = request.index, error = %e, "search failed, returning no candidates");
            CandidateSet::new()
        }
    }
}
