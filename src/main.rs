//! clausewise command-line front end.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use clausewise::analysis::{parse_analysis, AnalysisReport, DocumentAnalysis, SqliteCache};
use clausewise::glossary::GlossaryStore;
use clausewise::{highlight, AnalysisService, Config, Glossary, OpenRouterClient, Segment};

#[derive(Parser)]
#[command(name = "clausewise", version, about = "Explain legal documents in plain language")]
struct Cli {
    /// Glossary JSON file; falls back to the hosted glossary table when unset
    #[arg(long, global = true, env = "CLAUSEWISE_GLOSSARY")]
    glossary: Option<PathBuf>,

    /// Model identifier, overriding CLAUSEWISE_MODEL
    #[arg(long, global = true)]
    model: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mark glossary terms in a document
    Highlight {
        /// Document path, or `-` for stdin
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Summarize a document and list its red flags
    Analyze {
        /// Document path, or `-` for stdin
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Ask questions about a document, one per line on stdin
    Chat {
        /// Document path
        input: PathBuf,
    },
    /// Split a saved model reply into summary and red flags
    Parse {
        /// Reply path, or `-` for stdin
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    clausewise::init_tracing(cli.log_json);

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(model) = cli.model.clone() {
        config.llm.model = model;
    }

    match cli.command {
        Command::Highlight { ref input, format } => {
            let text = read_input(input)?;
            let glossary = load_glossary(cli.glossary.as_deref(), &config).await?;
            let segments = highlight(&text, glossary.index());
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&segments)?),
                Format::Text => println!("{}", render_segments(&segments)),
            }
        }
        Command::Analyze { ref input, format } => {
            let text = read_input(input)?;
            let service = Arc::new(build_service(cli.glossary.as_deref(), &config).await?);
            cancel_on_ctrl_c(Arc::clone(&service));
            let report = service.analyze(&text).await.context("analysis failed")?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Format::Text => print_report(&report),
            }
        }
        Command::Chat { ref input } => {
            let text = read_input(input)?;
            let service = build_service(cli.glossary.as_deref(), &config).await?;
            run_chat(&service, &text).await?;
        }
        Command::Parse { ref input, format } => {
            let analysis = parse_analysis(&read_input(input)?);
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
                Format::Text => print_analysis(&analysis),
            }
        }
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn load_glossary(path: Option<&Path>, config: &Config) -> Result<Glossary> {
    if let Some(path) = path {
        return Glossary::load_from_file(path)
            .with_context(|| format!("failed to load glossary from {}", path.display()));
    }
    match GlossaryStore::from_config(config) {
        Some(store) => Ok(store?.fetch_or_empty().await),
        None => {
            warn!("no glossary file or store configured, highlighting disabled");
            Ok(Glossary::empty())
        }
    }
}

async fn build_service(
    glossary: Option<&Path>,
    config: &Config,
) -> Result<AnalysisService<OpenRouterClient>> {
    let client = OpenRouterClient::new(&config.llm)?;
    let glossary = Arc::new(load_glossary(glossary, config).await?);
    let mut service = AnalysisService::new(Arc::new(client), glossary, config);

    if let Some(path) = &config.cache_db {
        match SqliteCache::open(path) {
            Ok(l2) => {
                let l2 = Arc::new(l2);
                SqliteCache::spawn_cleanup(Arc::clone(&l2), Duration::from_secs(3600));
                service = service.with_persistent_cache(l2);
            }
            Err(e) => warn!(error = %e, path = %path.display(), "analysis cache unavailable"),
        }
    }
    Ok(service)
}

/// Ctrl-C aborts the analysis in flight; `analyze` then returns a cancellation error.
fn cancel_on_ctrl_c(service: Arc<AnalysisService<OpenRouterClient>>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling analysis");
            service.cancel();
        }
    });
}

async fn run_chat(service: &AnalysisService<OpenRouterClient>, document: &str) -> Result<()> {
    let mut session = service.chat(document)?;
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    info!("chat ready, one question per line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let printer = |chunk: &str| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        };
        session.ask_streaming(&line, &printer).await?;
        println!();
    }
    Ok(())
}

/// Terms rendered as `[[phrase]]`.
fn render_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| {
            if s.is_highlighted {
                format!("[[{}]]", s.text)
            } else {
                s.text.clone()
            }
        })
        .collect()
}

fn print_analysis(analysis: &DocumentAnalysis) {
    println!("SUMMARY");
    for line in &analysis.summary {
        println!("  {line}");
    }
    println!("\nRED FLAGS");
    for flag in &analysis.red_flags {
        println!("  - {flag}");
    }
}

fn print_report(report: &AnalysisReport) {
    print_analysis(&report.analysis);
    if !report.glossary_terms.is_empty() {
        println!("\nTERMS\n  {}", report.glossary_terms.join(", "));
    }
    let source = if report.cached { "cache" } else { "model" };
    println!("\n({source}, {:.0} ms)", report.elapsed_ms);
}
