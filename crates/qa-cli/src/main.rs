//! QA Engine CLI
//!
//! The `qa` command runs the validation pipeline from the shell.
//!
//! ## Commands
//!
//! - `validate`: validate one payload and print the aggregated result
//! - `serve`: validate newline-delimited JSON requests from stdin
//! - `rules`: summarize the active rule snapshot
//! - `events`: list the registered lifecycle events

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, Level};

use qa_core::{
    Action, AggregatedResult, EngineConfig, QaEngine, RouteOutcome, RouterHandle,
    ValidationContext, METRICS,
};

#[derive(Parser)]
#[command(name = "qa")]
#[command(author = "Stevedores Org")]
#[command(version = qa_core::VERSION)]
#[command(about = "Real-time validation pipeline for lifecycle events", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "QA_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Rule snapshot (JSON); overrides the configured path
    #[arg(long, global = true, env = "QA_RULES_PATH")]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one payload; exits with status 2 when the action is `block`
    Validate {
        /// Event id the payload belongs to
        #[arg(short, long)]
        event: String,

        /// Payload file; JSON is used as-is, anything else as text
        #[arg(short, long, conflicts_with = "text")]
        payload: Option<PathBuf>,

        /// Inline text payload (stdin is read when neither is given)
        #[arg(short, long)]
        text: Option<String>,

        /// Compliance frameworks that apply (comma-separated)
        #[arg(long, value_delimiter = ',')]
        frameworks: Vec<String>,

        /// Dimension (domain) of the event
        #[arg(long)]
        dimension: Option<String>,

        /// JSON array holding a precomputed payload embedding
        #[arg(long)]
        embedding: Option<PathBuf>,

        /// Write an audit record to this directory
        #[arg(long)]
        audit_dir: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate newline-delimited JSON requests from stdin
    Serve {
        /// Maximum concurrent invocations
        #[arg(long, default_value = "64")]
        capacity: usize,
    },

    /// Summarize the active rule snapshot
    Rules {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List registered events
    Events {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    qa_core::init_tracing(cli.json, level);

    let mut config = EngineConfig::from_sources(cli.config.clone(), cli.rules.clone())
        .context("Failed to load engine configuration")?;

    match cli.command {
        Commands::Validate {
            event,
            payload,
            text,
            frameworks,
            dimension,
            embedding,
            audit_dir,
            format,
        } => {
            if audit_dir.is_some() {
                config.audit.dir = audit_dir;
            }
            let engine = build_engine(config)?;
            let payload = read_payload(payload.as_deref(), text.as_deref())?;
            let mut ctx = ValidationContext::new(&event, payload);
            if !frameworks.is_empty() {
                ctx = ctx.with_frameworks(frameworks.as_slice());
            }
            if let Some(dimension) = &dimension {
                ctx = ctx.with_dimension(dimension);
            }
            if let Some(path) = &embedding {
                ctx = ctx.with_embedding(read_json_file(path)?);
            }
            cmd_validate(&engine, ctx, format).await
        }
        Commands::Serve { capacity } => {
            let engine = build_engine(config)?;
            cmd_serve(&engine, capacity).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rules { format } => {
            cmd_rules(&build_engine(config)?, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Events { format } => {
            cmd_events(&build_engine(config)?, format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_engine(config: EngineConfig) -> Result<QaEngine> {
    QaEngine::builder()
        .config(config)
        .build()
        .context("Failed to start QA engine")
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

/// JSON documents become structured payloads; anything else is plain text.
fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_payload(path: Option<&Path>, text: Option<&str>) -> Result<Value> {
    if let Some(text) = text {
        return Ok(Value::String(text.to_string()));
    }
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload: {:?}", path))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read payload from stdin")?;
            raw
        }
    };
    Ok(parse_payload(&raw))
}

async fn cmd_validate(
    engine: &QaEngine,
    ctx: ValidationContext,
    format: OutputFormat,
) -> Result<ExitCode> {
    let outcome = engine.validate(ctx).await?;
    let result = match outcome {
        RouteOutcome::Validated(result) => result,
        RouteOutcome::NotRequired {
            event_id,
            dimension,
        } => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&ServeResponse::NotRequired {
                        event_id,
                        dimension
                    })?
                ),
                OutputFormat::Text => {
                    println!("{event_id}: QA not required for dimension {dimension}")
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => println!("{}", render_result_text(&result)),
    }

    if result.action == Action::Block {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn render_result_text(result: &AggregatedResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}: {} (severity {}, {}ms)\n",
        result.event_id,
        result.action.to_string().to_uppercase(),
        result.severity,
        result.duration_ms
    ));
    out.push_str(&format!("invocation: {}\n", result.invocation_id));

    for r in &result.results {
        let verdict = if r.passed { "pass" } else { "FAIL" };
        out.push_str(&format!(
            "  {:<11} {:<4} {:<8} {}ms\n",
            r.validator.to_string(),
            verdict,
            r.severity.to_string(),
            r.duration_ms
        ));
        for v in &r.violations {
            out.push_str(&format!("      - {v}\n"));
        }
        if r.recommended_action != Action::None {
            out.push_str(&format!("      rules recommend: {}\n", r.recommended_action));
        }
        if let Some(note) = &r.note {
            out.push_str(&format!("      note: {note}\n"));
        }
    }

    if let Some(reason) = &result.reason {
        out.push_str(&format!("\nreason: {reason}\n"));
    }
    if !result.suggestions.is_empty() {
        out.push_str("\nsuggestions:\n");
        for s in &result.suggestions {
            out.push_str(&format!("  * {s}\n"));
        }
    }
    out.trim_end().to_string()
}

/// One line of `qa serve` output.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ServeResponse {
    Validated { result: AggregatedResult },
    NotRequired { event_id: String, dimension: String },
    Error { error: String },
}

async fn serve_one(handle: &RouterHandle, line: &str) -> ServeResponse {
    let ctx: ValidationContext = match serde_json::from_str(line) {
        Ok(ctx) => ctx,
        Err(e) => {
            return ServeResponse::Error {
                error: format!("invalid request: {e}"),
            }
        }
    };
    match handle.submit(ctx).await {
        Ok(RouteOutcome::Validated(result)) => ServeResponse::Validated { result },
        Ok(RouteOutcome::NotRequired {
            event_id,
            dimension,
        }) => ServeResponse::NotRequired {
            event_id,
            dimension,
        },
        Err(e) => ServeResponse::Error {
            error: e.to_string(),
        },
    }
}

/// Serve requests until stdin closes. Responses are written as they complete,
/// so their order may differ from the request order.
async fn cmd_serve(engine: &QaEngine, capacity: usize) -> Result<()> {
    let handle = engine.spawn_router(capacity);
    let (out_tx, mut out_rx) = mpsc::channel::<String>(capacity.max(1));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!(capacity, "qa serve: reading requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let handle = handle.clone();
        let out_tx = out_tx.clone();
        tasks.spawn(async move {
            let response = serve_one(&handle, &line).await;
            let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
                format!("{{\"status\":\"error\",\"error\":\"encoding failed: {e}\"}}")
            });
            let _ = out_tx.send(encoded).await;
        });
    }

    while tasks.join_next().await.is_some() {}
    drop(out_tx);
    writer.await.context("stdout writer task failed")??;
    METRICS.flush();
    Ok(())
}

#[derive(Debug, Serialize)]
struct RulesSummary {
    digest: String,
    model: String,
    dimensions: usize,
    rules: usize,
    categories: Vec<(String, usize)>,
    skipped: Vec<qa_core::rules::SkippedRule>,
    loaded_at: String,
}

fn cmd_rules(engine: &QaEngine, format: OutputFormat) -> Result<()> {
    let index = engine.rules().snapshot();
    let summary = RulesSummary {
        digest: index.digest().to_string(),
        model: index.model().name.clone(),
        dimensions: index.dimensions(),
        rules: index.len(),
        categories: index
            .category_counts()
            .into_iter()
            .map(|(c, n)| (c.name().to_string(), n))
            .collect(),
        skipped: index.skipped().to_vec(),
        loaded_at: index.loaded_at().to_rfc3339(),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Rule Snapshot");
    println!("=============");
    println!("digest: {}", summary.digest);
    println!("model: {} ({} dims)", summary.model, summary.dimensions);
    println!("rules: {}", summary.rules);
    for (category, count) in &summary.categories {
        println!("  {:<13} {}", category, count);
    }
    if !summary.skipped.is_empty() {
        println!("\nSkipped:");
        for s in &summary.skipped {
            println!(
                "  - {}: {}",
                s.id.as_deref().unwrap_or("<unknown>"),
                s.reason
            );
        }
    }
    Ok(())
}

fn cmd_events(engine: &QaEngine, format: OutputFormat) -> Result<()> {
    let registry = engine.registry();
    if registry.is_empty() {
        bail!("No events registered");
    }

    if format == OutputFormat::Json {
        let events: Vec<_> = registry.iter().collect();
        let listing = serde_json::json!({
            "events": events,
            "dimensions": engine.router().dimensions(),
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{:<20} {:<8} {:<8} {:<6} VALIDATORS", "EVENT", "LATENCY", "PRIORITY", "BLOCK");
    for event in registry.iter() {
        println!(
            "{:<20} {:<8} {:<8} {:<6} {}",
            event.event_id,
            format!("{}ms", event.max_latency_ms),
            event.priority.to_string(),
            if event.block_on_fail { "yes" } else { "no" },
            event.validators.join(",")
        );
    }

    let dimensions = engine.router().dimensions();
    if !dimensions.is_empty() {
        println!("\n{:<20} {:<8} {:<6} VALIDATORS", "DIMENSION", "QA", "BLOCK");
        for (name, dimension) in dimensions {
            println!(
                "{:<20} {:<8} {:<6} {}",
                name,
                if dimension.qa_required { "required" } else { "skipped" },
                if dimension.block_on_fail { "yes" } else { "no" },
                if dimension.validators.is_empty() {
                    "(event default)".to_string()
                } else {
                    dimension.validators.join(",")
                }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_validate_args_parse() {
        let cli = Cli::try_parse_from([
            "qa",
            "validate",
            "--event",
            "pre_commit",
            "--text",
            "console.log(1)",
            "--frameworks",
            "GDPR,SOC2",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Validate {
                event,
                frameworks,
                format,
                ..
            } => {
                assert_eq!(event, "pre_commit");
                assert_eq!(frameworks, vec!["GDPR".to_string(), "SOC2".to_string()]);
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn test_payload_and_text_conflict() {
        assert!(Cli::try_parse_from([
            "qa", "validate", "-e", "x", "--payload", "p.json", "--text", "t"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_payload_detects_json() {
        assert_eq!(parse_payload("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(
            parse_payload("password = \"x\""),
            Value::String("password = \"x\"".to_string())
        );
    }

    #[test]
    fn test_read_payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        std::fs::write(&path, br#"{"service": "api"}"#).unwrap();
        assert_eq!(
            read_payload(Some(&path), None).unwrap(),
            json!({"service": "api"})
        );
        assert!(read_payload(Some(&dir.path().join("missing")), None).is_err());
    }

    #[tokio::test]
    async fn test_render_blocked_result() {
        let engine = QaEngine::with_defaults().unwrap();
        let result = engine
            .validate(ValidationContext::text(
                "before_action",
                "password = \"hunter22\"",
            ))
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let text = render_result_text(&result);
        assert!(text.starts_with("before_action: BLOCK (severity critical"));
        assert!(text.contains("security    FAIL"));
        assert!(text.contains("- hardcoded-password"));
        assert!(text.contains("rules recommend: block"));
        assert!(text.contains("reason: before_action blocked by security"));
    }

    #[tokio::test]
    async fn test_serve_one_responses() {
        let engine = QaEngine::with_defaults().unwrap();
        let handle = engine.spawn_router(2);

        let ok = serve_one(&handle, r#"{"event_id": "during_action", "payload": "ok"}"#).await;
        let encoded = serde_json::to_value(&ok).unwrap();
        assert_eq!(encoded["status"], "validated");
        assert_eq!(encoded["result"]["action"], "none");

        let bad = serde_json::to_value(serve_one(&handle, "not json").await).unwrap();
        assert_eq!(bad["status"], "error");

        let unknown =
            serde_json::to_value(serve_one(&handle, r#"{"event_id": "x", "payload": 1}"#).await)
                .unwrap();
        assert_eq!(unknown["status"], "error");
        assert!(unknown["error"].as_str().unwrap().contains("x"));
    }
}
