#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use digest_harness::gateway::vertex::VertexAdapter;
use digest_harness::gateway::{
    InvocationConfig, InvocationPolicy, ProviderGateway, RawSampling, TracingUsageSink,
};
use digest_harness::pipeline::{run_digest, DigestMode, DigestOutcome, DigestRequest};
use digest_harness::registry;
use digest_harness::report::{render_html, EMPTY_NARRATIVE_MESSAGE};

#[derive(Parser)]
#[command(name = "digest", version, about = "Narrate query results with an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about a JSON result set (LLM calls)
    Run {
        /// JSON array of row objects; `-` reads stdin
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        question: String,
        /// `all` for one narrative, `row` for one per row
        #[arg(long, default_value = "all")]
        mode: String,
        #[arg(long, default_value = "text-bison")]
        model: String,
        #[arg(long)]
        temperature: Option<String>,
        #[arg(long)]
        max_output_tokens: Option<String>,
        #[arg(long)]
        top_k: Option<String>,
        #[arg(long)]
        top_p: Option<String>,
        /// Write an HTML report here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the outcome as JSON here
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long, default_value_t = 50)]
        calls_per_minute: usize,
        #[arg(long, default_value_t = 300)]
        max_retry_seconds: u64,
    },
    /// List registered models
    Models,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_data(path: &Path) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Models => {
            for d in registry::descriptors() {
                println!(
                    "{}\t{}\t{}\tmax_output_tokens={}\ttop_k_top_p={}",
                    d.name,
                    d.version,
                    d.label,
                    d.max_output_tokens,
                    d.supports_top_k_top_p()
                );
            }
        }
        Commands::Run {
            data,
            question,
            mode,
            model,
            temperature,
            max_output_tokens,
            top_k,
            top_p,
            out,
            json,
            calls_per_minute,
            max_retry_seconds,
        } => {
            if calls_per_minute == 0 {
                return Err("--calls-per-minute must be >= 1".into());
            }
            let mode: DigestMode = mode.parse()?;

            let request = DigestRequest {
                data: read_data(&data)?,
                question,
                mode,
                model_type: model,
                sampling: RawSampling {
                    temperature,
                    max_output_tokens,
                    top_k,
                    top_p,
                },
            };

            let config = InvocationConfig {
                calls_per_window: calls_per_minute,
                window: Duration::from_secs(60),
                max_elapsed: Duration::from_secs(max_retry_seconds),
                ..InvocationConfig::default()
            };
            let gateway = ProviderGateway::with_policy(
                Arc::new(VertexAdapter::from_env()?),
                Arc::new(TracingUsageSink),
                InvocationPolicy::from_config(&config),
            );

            let outcome = run_digest(&gateway, &request).await?;

            if let Some(path) = json {
                let mut file = File::create(&path)?;
                serde_json::to_writer_pretty(&mut file, &outcome)?;
                writeln!(file)?;
                eprintln!("[digest] outcome written to {}", path.display());
            }

            match out {
                Some(path) => {
                    fs::write(&path, render_html(&outcome))?;
                    eprintln!("[digest] report written to {}", path.display());
                }
                None => print_outcome(&outcome)?,
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &DigestOutcome) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match outcome {
        DigestOutcome::Aggregate { narrative, .. } => {
            if narrative.trim().is_empty() {
                writeln!(out, "{EMPTY_NARRATIVE_MESSAGE}")?;
            } else {
                writeln!(out, "{narrative}")?;
            }
        }
        DigestOutcome::PerRow { dataset } => {
            for row in dataset.rows() {
                writeln!(out, "{}", serde_json::Value::Object(row.clone()))?;
            }
        }
    }
    Ok(())
}
