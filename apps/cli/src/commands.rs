//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codematch_completion::ChatCompletionClient;
use codematch_core::{ExtractionConfig, ExtractionOutcome, ExtractionProgress, Extractor};
use codematch_search::{OpenSearchClient, SearchRequest, retrieve};
use codematch_shared::{
    AppConfig, CodeMatchError, CodeSystem, init_config, load_config, load_config_from,
    load_credentials, resolve_api_key, validate_api_key,
};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CodeMatch — ground clinical descriptions in standard codes.
#[derive(Parser)]
#[command(
    name = "codematch",
    version,
    about = "Map free-text clinical descriptions to LOINC / ICD-10-CM codes via search + LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.codematch/codematch.toml).
    #[arg(long, global = true, env = "CODEMATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Retrieval options shared by `extract` and `search`.
#[derive(clap::Args, Debug)]
pub(crate) struct QueryArgs {
    /// Code system of the target index: loinc or icd10cm.
    #[arg(short, long, default_value = "loinc")]
    pub system: CodeSystem,

    /// Number of candidates to retrieve (defaults to config).
    #[arg(short = 'n', long)]
    pub top_n: Option<usize>,

    /// Index name (defaults to the configured index for the code system).
    #[arg(short, long)]
    pub index: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Retrieve candidates and let the model pick the matching codes.
    Extract {
        /// One or more descriptions; each runs as an independent extraction.
        #[arg(required = true)]
        descriptions: Vec<String>,

        #[command(flatten)]
        query: QueryArgs,

        /// Model identifier (defaults to config).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the candidates the index returns, without calling the model.
    Search {
        /// Description to match.
        description: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Check connectivity and credentials for the search cluster.
    Ping,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; results to stdout.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "codematch=info",
        1 => "codematch=debug",
        _ => "codematch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Extract {
            descriptions,
            query,
            model,
        } => cmd_extract(config_path, &descriptions, &query, model.as_deref()).await,
        Command::Search { description, query } => {
            cmd_search(config_path, &description, &query).await
        }
        Command::Ping => cmd_ping(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Build the search client. Credentials are validated before any network call.
async fn search_client(config: &AppConfig) -> Result<OpenSearchClient> {
    let credentials = load_credentials(&config.search.credentials_file()?)?;
    let client = OpenSearchClient::new(&config.search, credentials)?;

    if let Some(count) = config.search.max_clause_count {
        if let Err(e) = client.apply_max_clause_count(count).await {
            warn!(error = %e, count, "could not apply max_clause_count, continuing");
        }
    }

    Ok(client)
}

fn resolve_index(config: &AppConfig, query: &QueryArgs) -> String {
    query
        .index
        .clone()
        .unwrap_or_else(|| config.index_for(query.system).to_string())
}

/// Receiver that flips to `true` on Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                // Keep the sender alive so receivers never see a closed channel.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

/// One line of `extract --format json` output.
#[derive(serde::Serialize)]
struct ExtractionReport<'a> {
    description: &'a str,
    status: &'static str,
    codes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> ExtractionReport<'a> {
    fn new(description: &'a str, outcome: &'a ExtractionOutcome) -> Self {
        let (status, error) = match outcome {
            ExtractionOutcome::Matched(_) => ("matched", None),
            ExtractionOutcome::NoCandidates => ("no_candidates", None),
            ExtractionOutcome::RetrievalFailed(e) => ("retrieval_failed", Some(e.to_string())),
            ExtractionOutcome::CompletionFailed(e) => ("completion_failed", Some(e.to_string())),
        };
        Self {
            description,
            status,
            codes: outcome.codes(),
            error,
        }
    }
}

async fn cmd_extract(
    config_path: Option<&Path>,
    descriptions: &[String],
    query: &QueryArgs,
    model: Option<&str>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let api_key = resolve_api_key(&config)?;
    let search = search_client(&config).await?;
    let completion = ChatCompletionClient::new(&config.completion, api_key)?;

    let mut extraction = ExtractionConfig::from_app(&config, query.system);
    if let Some(model) = model {
        extraction.model = model.to_string();
    }

    let top_n = query.top_n.unwrap_or(config.defaults.top_n);
    let index = resolve_index(&config, query);

    info!(
        count = descriptions.len(),
        system = %query.system,
        %index,
        top_n,
        model = %extraction.model,
        "extracting codes"
    );

    let extractor = Arc::new(Extractor::new(search, completion, extraction));
    let cancel = cancel_on_ctrl_c();
    let show_spinner = descriptions.len() == 1 && query.format == OutputFormat::Text;

    let outcomes = if show_spinner {
        let reporter = CliProgress::new();
        let outcome = extractor
            .run_cancellable(&descriptions[0], top_n, &index, &reporter, cancelled(cancel))
            .await;
        reporter.finish();
        vec![outcome?]
    } else {
        let mut set = JoinSet::new();
        for (i, description) in descriptions.iter().enumerate() {
            let extractor = Arc::clone(&extractor);
            let description = description.clone();
            let index = index.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let outcome = extractor
                    .run_cancellable(
                        &description,
                        top_n,
                        &index,
                        &codematch_core::SilentProgress,
                        cancelled(cancel),
                    )
                    .await;
                (i, outcome)
            });
        }

        let mut slots: Vec<Option<ExtractionOutcome>> = vec![None; descriptions.len()];
        while let Some(joined) = set.join_next().await {
            let (i, outcome) = joined.map_err(|e| eyre!("extraction task failed: {e}"))?;
            slots[i] = Some(outcome?);
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| eyre!("extraction task produced no result")))
            .collect::<Result<Vec<_>>>()?
    };

    print_outcomes(descriptions, &outcomes, query.format)
}

fn print_outcomes(
    descriptions: &[String],
    outcomes: &[ExtractionOutcome],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            for (description, outcome) in descriptions.iter().zip(outcomes) {
                let report = ExtractionReport::new(description, outcome);
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        OutputFormat::Text if outcomes.len() == 1 => {
            let outcome = &outcomes[0];
            for code in outcome.codes() {
                println!("{code}");
            }
            if outcome.codes().is_empty() {
                eprintln!("No confident answer ({}).", describe(outcome));
            }
        }
        OutputFormat::Text => {
            for (description, outcome) in descriptions.iter().zip(outcomes) {
                if outcome.codes().is_empty() {
                    println!("{description}\t<none: {}>", describe(outcome));
                } else {
                    println!("{description}\t{}", outcome.codes().join(", "));
                }
            }
        }
    }
    Ok(())
}

fn describe(outcome: &ExtractionOutcome) -> String {
    match outcome {
        ExtractionOutcome::Matched(_) => "model returned no codes".into(),
        ExtractionOutcome::NoCandidates => "no candidates in index".into(),
        ExtractionOutcome::RetrievalFailed(e) => format!("search failed: {e}"),
        ExtractionOutcome::CompletionFailed(e) => format!("model call failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ExtractionProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// search / ping / config
// ---------------------------------------------------------------------------

async fn cmd_search(
    config_path: Option<&Path>,
    description: &str,
    query: &QueryArgs,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let client = search_client(&config).await?;
    let index = resolve_index(&config, query);

    let request = SearchRequest {
        text: description,
        size: query.top_n.unwrap_or(config.defaults.top_n),
        index: &index,
        field: &config.defaults.label_field,
        code_field: &config.defaults.code_field,
    };

    // Retrieval errors are surfaced here; this command exists to debug the index.
    let candidates = retrieve(&client, &request)
        .await
        .map_err(CodeMatchError::from)?;

    match query.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(candidates.candidates())?);
        }
        OutputFormat::Text => {
            if candidates.is_empty() {
                eprintln!("No candidates in index '{index}'.");
            }
            for c in candidates.candidates() {
                println!("{:>3}  {:>8.3}  {} | {}", c.rank + 1, c.score, c.code, c.label);
            }
        }
    }

    Ok(())
}

async fn cmd_ping(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let credentials = load_credentials(&config.search.credentials_file()?)?;
    let client = OpenSearchClient::new(&config.search, credentials)?;

    let cluster = client.ping().await.map_err(CodeMatchError::from)?;
    let version = cluster
        .version
        .as_ref()
        .and_then(|v| v.number.as_deref())
        .unwrap_or("unknown");

    println!("Connected to {}", config.search.host);
    println!(
        "  Cluster: {}",
        cluster.cluster_name.as_deref().unwrap_or("unknown")
    );
    println!("  Version: {version}");
    println!("  Completion key: {}", api_key_status(&config));
    Ok(())
}

/// Report whether the completion API key is available, without printing it.
fn api_key_status(config: &AppConfig) -> String {
    let var_name = &config.completion.api_key_env;
    match validate_api_key(config) {
        Ok(()) => format!("{var_name} is set"),
        Err(_) => format!("{var_name} is not set"),
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use codematch_shared::{CompletionError, RetrievalError};

    use super::*;

    #[test]
    fn api_key_status_reports_missing_key() {
        let mut config = AppConfig::default();
        config.completion.api_key_env = "CODEMATCH_TEST_UNSET_KEY_93817".into();
        assert_eq!(
            api_key_status(&config),
            "CODEMATCH_TEST_UNSET_KEY_93817 is not set"
        );
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_extract_with_options() {
        let cli = Cli::try_parse_from([
            "codematch",
            "extract",
            "Hemoglobin blood g/dL",
            "diabetes type 2",
            "--system",
            "icd10cm",
            "-n",
            "20",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Command::Extract {
                descriptions,
                query,
                model,
            } => {
                assert_eq!(descriptions.len(), 2);
                assert_eq!(query.system, CodeSystem::Icd10Cm);
                assert_eq!(query.top_n, Some(20));
                assert_eq!(query.format, OutputFormat::Json);
                assert!(model.is_none());
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn rejects_unknown_code_system() {
        let result = Cli::try_parse_from(["codematch", "search", "x", "--system", "snomed"]);
        assert!(result.is_err());
    }

    #[test]
    fn index_defaults_follow_code_system() {
        let config = AppConfig::default();
        let query = QueryArgs {
            system: CodeSystem::Icd10Cm,
            top_n: None,
            index: None,
            format: OutputFormat::Text,
        };
        assert_eq!(resolve_index(&config, &query), "icd_index");

        let query = QueryArgs {
            index: Some("icd10cmtest".into()),
            ..query
        };
        assert_eq!(resolve_index(&config, &query), "icd10cmtest");
    }

    #[test]
    fn json_report_statuses() {
        let matched = ExtractionOutcome::Matched(vec!["718-7".into()]);
        let json = serde_json::to_value(ExtractionReport::new("hgb", &matched)).unwrap();
        assert_eq!(json["status"], "matched");
        assert_eq!(json["codes"][0], "718-7");
        assert!(json.get("error").is_none());

        let failed =
            ExtractionOutcome::CompletionFailed(CompletionError::Unauthorized { status: 401 });
        let json = serde_json::to_value(ExtractionReport::new("hgb", &failed)).unwrap();
        assert_eq!(json["status"], "completion_failed");
        assert_eq!(json["codes"].as_array().unwrap().len(), 0);
        assert!(json["error"].as_str().unwrap().contains("401"));

        let failed = ExtractionOutcome::RetrievalFailed(RetrievalError::Malformed("x".into()));
        assert!(describe(&failed).starts_with("search failed"));
    }

    #[tokio::test]
    async fn cancel_receiver_resolves_when_flipped() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        cancelled(rx).await;
    }
}
