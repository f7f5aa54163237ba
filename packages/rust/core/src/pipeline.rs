//! End-to-end extraction: description → search → prompt → completion → codes.
//!
//! The pipeline is linear and fails soft: a retrieval or completion failure
//! ends the run with no codes and a logged diagnostic. [`ExtractionOutcome`]
//! keeps the cause inspectable for callers that want it.

use std::future::Future;

use codematch_completion::{CompletionBackend, CompletionRequest, check_prompt_size};
use codematch_search::{SearchBackend, SearchRequest, retrieve};
use codematch_shared::{
    AppConfig, CodeMatchError, CodeSystem, CompletionError, ExtractedCodes, Result,
    RetrievalError,
};
use tracing::{info, instrument, warn};

use crate::parser::parse_codes;
use crate::prompt::{build_prompt, system_instruction};

/// Per-pipeline settings that do not change between descriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Vocabulary in the target index; selects prompt wording.
    pub code_system: CodeSystem,
    /// Document field matched against the description and used as label.
    pub field: String,
    /// Document field holding the code.
    pub code_field: String,
    /// Model identifier.
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Prompts longer than this many chars are rejected before sending.
    pub max_prompt_chars: usize,
}

impl ExtractionConfig {
    /// Derive pipeline settings from the app config.
    pub fn from_app(config: &AppConfig, code_system: CodeSystem) -> Self {
        Self {
            code_system,
            field: config.defaults.label_field.clone(),
            code_field: config.defaults.code_field.clone(),
            model: config.completion.model.clone(),
            max_output_tokens: config.completion.max_output_tokens,
            temperature: config.completion.temperature,
            max_prompt_chars: config.completion.max_prompt_chars,
        }
    }
}

/// Terminal state of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The model answered; codes may still be empty if it answered nothing.
    Matched(ExtractedCodes),
    /// The index returned no candidates, so no prompt was built.
    NoCandidates,
    /// The search backend failed.
    RetrievalFailed(RetrievalError),
    /// The completion backend failed or the prompt was rejected.
    CompletionFailed(CompletionError),
}

impl ExtractionOutcome {
    /// Extracted codes; empty for every state but `Matched`.
    pub fn codes(&self) -> &[String] {
        match self {
            Self::Matched(codes) => codes.as_slice(),
            _ => &[],
        }
    }

    pub fn into_codes(self) -> ExtractedCodes {
        match self {
            Self::Matched(codes) => codes,
            _ => Vec::new(),
        }
    }

    /// Whether a backend failed (as opposed to finding nothing).
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RetrievalFailed(_) | Self::CompletionFailed(_))
    }
}

/// Progress callback for extraction phases.
pub trait ExtractionProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ExtractionProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
}

/// Retrieval-then-disambiguation pipeline over injected backends.
///
/// Holds no per-call state; share one instance across concurrent calls.
#[derive(Debug, Clone)]
pub struct Extractor<S, C> {
    search: S,
    completion: C,
    config: ExtractionConfig,
}

impl<S, C> Extractor<S, C>
where
    S: SearchBackend,
    C: CompletionBackend,
{
    pub fn new(search: S, completion: C, config: ExtractionConfig) -> Self {
        Self {
            search,
            completion,
            config,
        }
    }

    /// Run the pipeline and return the tagged outcome.
    pub async fn run(&self, description: &str, top_n: usize, index: &str) -> ExtractionOutcome {
        self.run_with_progress(description, top_n, index, &SilentProgress)
            .await
    }

    /// Run the pipeline, reporting each phase.
    #[instrument(skip_all, fields(index = index, top_n = top_n, system = %self.config.code_system))]
    pub async fn run_with_progress(
        &self,
        description: &str,
        top_n: usize,
        index: &str,
        progress: &dyn ExtractionProgress,
    ) -> ExtractionOutcome {
        // --- Retrieving ---
        progress.phase("Retrieving candidates");
        let request = SearchRequest {
            text: description,
            size: top_n,
            index,
            field: &self.config.field,
            code_field: &self.config.code_field,
        };

        let candidates = match retrieve(&self.search, &request).await {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "retrieval failed, no codes extracted");
                return ExtractionOutcome::RetrievalFailed(e);
            }
        };

        if candidates.is_empty() {
            info!("no candidate codes retrieved from index");
            return ExtractionOutcome::NoCandidates;
        }

        // --- Prompting ---
        progress.phase("Building prompt");
        let prompt = build_prompt(self.config.code_system, description, &candidates);

        // --- Completing ---
        progress.phase("Asking model");
        let text = match self.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "completion failed, no codes extracted");
                return ExtractionOutcome::CompletionFailed(e);
            }
        };

        // --- Parsing ---
        progress.phase("Parsing answer");
        let codes = parse_codes(&text);
        info!(
            candidates = candidates.code_count(),
            extracted = codes.len(),
            "extraction complete"
        );

        ExtractionOutcome::Matched(codes)
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
        check_prompt_size(prompt, self.config.max_prompt_chars)?;

        let request = CompletionRequest {
            model: &self.config.model,
            system: system_instruction(self.config.code_system),
            prompt,
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };
        self.completion.complete(&request).await
    }

    /// Extract codes for one description; empty on any upstream failure.
    pub async fn extract(&self, description: &str, top_n: usize, index: &str) -> ExtractedCodes {
        self.run(description, top_n, index).await.into_codes()
    }

    /// Like [`extract`](Self::extract), but abandons in-flight requests and
    /// returns [`CodeMatchError::Cancelled`] once `cancel` resolves.
    pub async fn extract_cancellable<F>(
        &self,
        description: &str,
        top_n: usize,
        index: &str,
        cancel: F,
    ) -> Result<ExtractedCodes>
    where
        F: Future<Output = ()>,
    {
        self.run_cancellable(description, top_n, index, &SilentProgress, cancel)
            .await
            .map(ExtractionOutcome::into_codes)
    }

    /// Race the pipeline against `cancel`; a partial result is never returned.
    pub async fn run_cancellable<F>(
        &self,
        description: &str,
        top_n: usize,
        index: &str,
        progress: &dyn ExtractionProgress,
        cancel: F,
    ) -> Result<ExtractionOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => {
                warn!("extraction cancelled");
                Err(CodeMatchError::Cancelled)
            }
            outcome = self.run_with_progress(description, top_n, index, progress) => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use codematch_shared::CandidateSet;

    use super::*;

    struct StubSearch {
        calls: AtomicUsize,
        result: std::result::Result<CandidateSet, RetrievalError>,
    }

    impl StubSearch {
        fn returning(pairs: &[(&str, &str)]) -> Self {
            let set = pairs
                .iter()
                .enumerate()
                .map(|(i, (code, label))| (*code, *label, 10.0 - i as f64))
                .collect();
            Self {
                calls: AtomicUsize::new(0),
                result: Ok(set),
            }
        }

        fn failing(err: RetrievalError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Err(err),
            }
        }
    }

    impl SearchBackend for StubSearch {
        async fn query(
            &self,
            _request: &SearchRequest<'_>,
        ) -> std::result::Result<CandidateSet, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct StubCompletion {
        prompts: Mutex<Vec<String>>,
        result: std::result::Result<String, CompletionError>,
        delay: Option<Duration>,
    }

    impl StubCompletion {
        fn answering(text: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                result: Ok(text.to_string()),
                delay: None,
            }
        }

        fn failing(err: CompletionError) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                result: Err(err),
                delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl CompletionBackend for StubCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest<'_>,
        ) -> std::result::Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig::from_app(&AppConfig::default(), CodeSystem::Loinc)
    }

    fn hemoglobin_search() -> StubSearch {
        StubSearch::returning(&[
            ("718-7", "Hemoglobin [Mass/volume] in Blood"),
            ("20509-6", "Hemoglobin [Mass/volume] in Blood by calculation"),
        ])
    }

    #[tokio::test]
    async fn end_to_end_hemoglobin() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering("718-7, 20509-6"),
            config(),
        );

        let codes = extractor
            .extract("Hemoglobin blood g/dL", 3, "loincdb_without_component")
            .await;
        assert_eq!(codes, vec!["718-7", "20509-6"]);

        let prompts = extractor.completion.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("718-7 | Hemoglobin [Mass/volume] in Blood\n20509-6 |"));
        assert!(prompts[0].contains("Hemoglobin blood g/dL"));
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let extractor = Extractor::new(
            StubSearch::returning(&[]),
            StubCompletion::answering("718-7"),
            config(),
        );

        let outcome = extractor.run("unknown analyte", 10, "loinc").await;
        assert_eq!(outcome, ExtractionOutcome::NoCandidates);
        assert!(outcome.codes().is_empty());
        assert!(!outcome.is_failure());
        assert_eq!(extractor.search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.completion.calls(), 0);
    }

    #[tokio::test]
    async fn zero_top_n_never_reaches_backends() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering("718-7"),
            config(),
        );

        let codes = extractor.extract("Hemoglobin", 0, "loinc").await;
        assert!(codes.is_empty());
        assert_eq!(extractor.search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(extractor.completion.calls(), 0);
    }

    #[tokio::test]
    async fn retrieval_failure_is_tagged_and_soft() {
        let extractor = Extractor::new(
            StubSearch::failing(RetrievalError::Connect("connection refused".into())),
            StubCompletion::answering("718-7"),
            config(),
        );

        let outcome = extractor.run("Hemoglobin", 5, "loinc").await;
        assert!(matches!(
            outcome,
            ExtractionOutcome::RetrievalFailed(RetrievalError::Connect(_))
        ));
        assert!(outcome.is_failure());
        assert!(outcome.into_codes().is_empty());
        assert_eq!(extractor.completion.calls(), 0);
    }

    #[tokio::test]
    async fn completion_failure_yields_empty_codes() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::failing(CompletionError::RateLimited {
                retry_after_secs: None,
            }),
            config(),
        );

        let codes = extractor.extract("Hemoglobin blood g/dL", 3, "loinc").await;
        assert!(codes.is_empty());

        let outcome = extractor.run("Hemoglobin blood g/dL", 3, "loinc").await;
        assert_eq!(
            outcome,
            ExtractionOutcome::CompletionFailed(CompletionError::RateLimited {
                retry_after_secs: None
            })
        );
    }

    #[tokio::test]
    async fn oversized_prompt_rejected_before_sending() {
        let mut cfg = config();
        cfg.max_prompt_chars = 50;
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering("718-7"),
            cfg,
        );

        let outcome = extractor.run("Hemoglobin blood g/dL", 3, "loinc").await;
        assert!(matches!(
            outcome,
            ExtractionOutcome::CompletionFailed(CompletionError::PromptTooLarge { limit: 50, .. })
        ));
        assert_eq!(extractor.completion.calls(), 0);
    }

    #[tokio::test]
    async fn unparseable_answer_is_matched_but_empty() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering(" , \n"),
            config(),
        );

        let outcome = extractor.run("Hemoglobin", 3, "loinc").await;
        assert_eq!(outcome, ExtractionOutcome::Matched(vec![]));
    }

    #[tokio::test]
    async fn cancellation_returns_error() {
        let mut completion = StubCompletion::answering("718-7");
        completion.delay = Some(Duration::from_secs(30));
        let extractor = Extractor::new(hemoglobin_search(), completion, config());

        let result = extractor
            .extract_cancellable(
                "Hemoglobin",
                3,
                "loinc",
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;
        assert!(matches!(result, Err(CodeMatchError::Cancelled)));
    }

    #[tokio::test]
    async fn uncancelled_run_completes() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering("718-7\n20509-6"),
            config(),
        );

        let codes = extractor
            .extract_cancellable("Hemoglobin", 3, "loinc", std::future::pending())
            .await
            .unwrap();
        assert_eq!(codes, vec!["718-7", "20509-6"]);
    }

    #[tokio::test]
    async fn concurrent_extractions_are_independent() {
        let extractor = Extractor::new(
            hemoglobin_search(),
            StubCompletion::answering("718-7"),
            config(),
        );

        let (a, b) = tokio::join!(
            extractor.extract("Hemoglobin", 3, "loinc"),
            extractor.extract("Hematocrit", 3, "loinc"),
        );
        assert_eq!(a, vec!["718-7"]);
        assert_eq!(b, vec!["718-7"]);
        assert_eq!(extractor.completion.calls(), 2);
    }

    #[tokio::test]
    async fn end_to_end_over_http() {
        use codematch_completion::ChatCompletionClient;
        use codematch_search::OpenSearchClient;
        use codematch_shared::{CompletionConfig, SearchConfig, SearchCredentials};
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let search_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/loincdb_without_component/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {
                    "total": {"value": 2, "relation": "eq"},
                    "hits": [
                        {"_score": 9.0, "_source": {"concept_code": "718-7", "concept_name": "Hemoglobin [Mass/volume] in Blood"}},
                        {"_score": 8.0, "_source": {"concept_code": "20509-6", "concept_name": "Hemoglobin [Mass/volume] in Blood by calculation"}}
                    ]
                }
            })))
            .expect(1)
            .mount(&search_server)
            .await;

        let llm_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "718-7, 20509-6"}}]
            })))
            .expect(1)
            .mount(&llm_server)
            .await;

        let search = OpenSearchClient::new(
            &SearchConfig {
                host: search_server.uri(),
                ..SearchConfig::default()
            },
            SearchCredentials::Bearer { token: "t".into() },
        )
        .unwrap();
        let completion = ChatCompletionClient::new(
            &CompletionConfig {
                base_url: llm_server.uri(),
                ..CompletionConfig::default()
            },
            "sk-test".into(),
        )
        .unwrap();

        let extractor = Extractor::new(search, completion, config());
        let codes = extractor
            .extract("Hemoglobin blood g/dL", 3, "loincdb_without_component")
            .await;
        assert_eq!(codes, vec!["718-7", "20509-6"]);
    }

    #[test]
    fn config_from_app_uses_defaults() {
        let cfg = config();
        assert_eq!(cfg.field, "concept_name");
        assert_eq!(cfg.code_field, "concept_code");
        assert_eq!(cfg.temperature, 0.0);
        assert_eq!(cfg.max_output_tokens, 100);
    }
}
