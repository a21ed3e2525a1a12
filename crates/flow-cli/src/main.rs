//! flow-run - execute a flow graph document from the command line
//!
//! Imports a versioned graph document, runs it from the given start node
//! against the tool simulator and either an Ollama-compatible model server
//! or an offline scripted model, evaluates an optional assertion file and
//! prints a JSON report to stdout.
//!
//! The process exits with status 1 when an assertion fails and 2 when the
//! graph cannot be loaded or run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use node_engine::{
    evaluate, import_json, Assertion, AssertionReport, EngineConfig, FlowIO, IndexedDocument, ModelClient,
    NodeEngineError, RunReport, WorkflowRunner,
};
use serde_json::{json, Value};
use thiserror::Error;
use workflow_nodes::{
    builtin_registry, simulated_services, InMemoryIndex, OllamaModelClient, ScriptedModel, DEFAULT_HASHED_DIMENSIONS,
};

/// Run a flow graph and check its outputs
#[derive(Parser, Debug)]
#[command(name = "flow-run", version, about, long_about = None)]
struct Cli {
    /// Path to the exported graph document (JSON)
    graph: PathBuf,

    /// Node to start the run from
    #[arg(long)]
    start: String,

    /// Initial input; parsed as JSON when possible, otherwise used as text
    #[arg(long, default_value = "")]
    input: String,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Assertion file: a JSON array of assertions
    #[arg(long)]
    assertions: Option<PathBuf>,

    /// Documents for the retrieval index: a JSON array of `{id, text}`
    #[arg(long)]
    documents: Option<PathBuf>,

    /// Base URL of an Ollama-compatible server; without it an offline
    /// model answers every prompt with `--offline-reply`
    #[arg(long, env = "FLOW_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Default model name for the HTTP client
    #[arg(long, env = "FLOW_MODEL")]
    model: Option<String>,

    /// Reply of the offline model
    #[arg(long, default_value = "ok")]
    offline_reply: String,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {what} in {path}: {source}")]
    Parse {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Engine(#[from] NodeEngineError),

    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

type CliResult<T> = std::result::Result<T, CliError>;

async fn read_file(path: &Path) -> CliResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &'static str) -> CliResult<T> {
    let contents = read_file(path).await?;
    serde_json::from_str(&contents).map_err(|source| CliError::Parse {
        what,
        path: path.to_path_buf(),
        source,
    })
}

/// JSON objects and arrays become json values, anything else is text
fn parse_input(raw: &str) -> FlowIO {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => FlowIO::json(value),
        _ => FlowIO::text(raw),
    }
}

fn model_client(cli: &Cli) -> Arc<dyn ModelClient> {
    match &cli.ollama_url {
        Some(url) => {
            let mut client = OllamaModelClient::with_base_url(url.as_str());
            if let Some(model) = &cli.model {
                client = client.with_default_model(model.as_str());
            }
            log::info!("Using model server at {}", client.base_url());
            Arc::new(client)
        }
        None => {
            log::info!("No model server configured; using the offline model");
            Arc::new(ScriptedModel::new(cli.offline_reply.as_str()))
        }
    }
}

fn render_report(report: &RunReport, assertions: Option<&AssertionReport>) -> Value {
    let mut rendered = json!({
        "executionId": report.execution_id,
        "state": report.state,
        "executed": report.executed(),
        "skipped": report.skipped,
        "blockedEdges": report.blocked_edges,
        "warnings": report.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "outputs": report.node_outputs(),
        "context": report.context,
    });
    if let (Some(assertions), Value::Object(map)) = (assertions, &mut rendered) {
        map.insert("assertions".into(), json!(assertions));
    }
    rendered
}

async fn run(cli: &Cli) -> CliResult<bool> {
    let graph = import_json(&read_file(&cli.graph).await?)?;
    log::info!(
        "Loaded graph '{}' ({} nodes, {} edges)",
        cli.graph.display(),
        graph.nodes.len(),
        graph.edges.len()
    );

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).await?,
        None => EngineConfig::default(),
    };

    let index = InMemoryIndex::with_hashed_embeddings(DEFAULT_HASHED_DIMENSIONS);
    if let Some(path) = &cli.documents {
        let documents: Vec<IndexedDocument> = read_json(path, "documents").await?;
        log::info!("Indexing {} documents", documents.len());
        for document in documents {
            index.add(document);
        }
    }

    let assertions: Vec<Assertion> = match &cli.assertions {
        Some(path) => read_json(path, "assertions").await?,
        None => Vec::new(),
    };

    let services = simulated_services(model_client(cli), Arc::new(index), &config);
    let mut runner = WorkflowRunner::new(graph, Arc::new(builtin_registry()), services).with_config(config);
    let report = runner.execute(&cli.start, parse_input(&cli.input)).await?;

    let checked = (!assertions.is_empty())
        .then(|| evaluate(&assertions, &report.node_outputs(), report.edge_links()));
    let passed = checked.as_ref().map_or(true, |r| r.passed);
    if let Some(checked) = &checked {
        for failure in checked.results.iter().filter(|r| !r.passed) {
            log::warn!("Assertion failed: {}", failure.message);
        }
    }

    let rendered = render_report(&report, checked.as_ref());
    let output = if cli.pretty {
        serde_json::to_string_pretty(&rendered)?
    } else {
        serde_json::to_string(&rendered)?
    };
    println!("{}", output);
    Ok(passed)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_engine::{export_json, NodeKind, WorkflowBuilder};
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn cli(graph: &Path, assertions: Option<&Path>) -> Cli {
        Cli::parse_from(
            ["flow-run", graph.to_str().unwrap(), "--start", "search", "--input", "borrow checker"]
                .into_iter()
                .map(str::to_string)
                .chain(assertions.into_iter().flat_map(|p| {
                    vec!["--assertions".to_string(), p.to_str().unwrap().to_string()]
                })),
        )
    }

    fn graph_file() -> tempfile::NamedTempFile {
        let graph = WorkflowBuilder::new()
            .add_node("search", NodeKind::Retrieval)
            .add_node("reply", NodeKind::Formatter)
            .add_edge("search", "out", "reply", "in")
            .build();
        write_temp(&export_json(&graph).unwrap())
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(r#"{"query": "x"}"#), FlowIO::json(json!({"query": "x"})));
        assert_eq!(parse_input("42"), FlowIO::text("42"));
        assert_eq!(parse_input("hello"), FlowIO::text("hello"));
    }

    #[tokio::test]
    async fn test_run_passes_assertions() {
        let graph = graph_file();
        let assertions = write_temp(
            r#"[{"op": "noErrors"}, {"path": "reply.output", "op": "equals", "value": "ok"}]"#,
        );
        assert!(run(&cli(graph.path(), Some(assertions.path()))).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_reports_failed_assertion() {
        let graph = graph_file();
        let assertions = write_temp(r#"[{"path": "missing", "op": "exists"}]"#);
        assert!(!run(&cli(graph.path(), Some(assertions.path()))).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_assertion_file_is_an_error() {
        let graph = graph_file();
        let assertions = write_temp("not json");
        let err = run(&cli(graph.path(), Some(assertions.path()))).await.unwrap_err();
        assert!(matches!(err, CliError::Parse { what: "assertions", .. }));
    }

    #[tokio::test]
    async fn test_unknown_start_node() {
        let graph = graph_file();
        let mut cli = cli(graph.path(), None);
        cli.start = "nowhere".into();
        assert!(matches!(
            run(&cli).await,
            Err(CliError::Engine(NodeEngineError::UnknownNode(_)))
        ));
    }
}
