//! Flowline CLI - run and validate workflow files

use std::error::Error as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use flowline::ast::{LlmSettings, WorkflowConfig};
use flowline::error::{FixSuggestion, FlowlineError};
use flowline::event::EventLog;
use flowline::runtime::{coerce_inputs, parse_input_pair, Pipeline, PipelineOptions, RunOutput};
use flowline::{FlowlineConfig, ProviderRegistry};

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "Flowline - declarative, type-checked LLM workflows")]
#[command(version)]
struct Cli {
    /// More logging (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to the workflow (.yaml / .json)
        file: PathBuf,

        /// Initial state value, repeatable
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Override the provider (openai, mock)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override the model
        #[arg(short, long)]
        model: Option<String>,

        /// Print the run output as JSON
        #[arg(long)]
        json: bool,

        /// Write the event log as JSON to this path
        #[arg(long, value_name = "PATH")]
        trace: Option<PathBuf>,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to the workflow (.yaml / .json)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            file,
            inputs,
            provider,
            model,
            json,
            trace,
        } => {
            let overrides = LlmSettings {
                provider,
                model,
                ..LlmSettings::default()
            };
            run_workflow(&file, &inputs, overrides, json, trace.as_deref()).await
        }
        Commands::Validate { file } => validate_workflow(&file),
    };

    if let Err(e) = result {
        report(&e, cli.verbose > 0);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_workflow(
    file: &Path,
    raw_inputs: &[String],
    overrides: LlmSettings,
    json: bool,
    trace: Option<&Path>,
) -> Result<(), FlowlineError> {
    let user_config = FlowlineConfig::load()?.with_env();
    let providers = ProviderRegistry::from_config(&user_config)?;

    let trace_log = EventLog::new();
    let mut options = PipelineOptions::new(providers)
        .with_llm_defaults(user_config.llm_defaults())
        .with_llm_overrides(overrides);
    if trace.is_some() {
        options = options.with_sink(Arc::new(trace_log.clone()));
    }

    let mut pipeline = Pipeline::from_file(file, options)?;

    let pairs = raw_inputs
        .iter()
        .map(|raw| parse_input_pair(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let schema = Arc::clone(pipeline.validate()?.state_schema());
    let inputs = coerce_inputs(&schema, &pairs)?;

    if !json {
        println!(
            "{} Running {} ({} step(s))",
            "→".cyan(),
            pipeline.workflow_name().cyan().bold(),
            pipeline.validated().map_or(0, |v| v.steps().len())
        );
    }

    let result = pipeline.run(inputs).await;

    if let Some(path) = trace {
        fs::write(path, serde_json::to_string_pretty(&trace_log.to_json())?)?;
        if !json {
            println!("{} Trace written to {}", "→".cyan(), path.display());
        }
    }

    let output = result?;
    if json {
        println!("{}", output.to_json_pretty()?);
    } else {
        print_summary(&output);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<(), FlowlineError> {
    let config = WorkflowConfig::from_file(file)?;
    let validated = flowline::validate(config)?;

    let order: Vec<&str> = validated.steps().iter().map(|s| s.id()).collect();
    println!(
        "{} Workflow '{}' is valid ({} step(s): {})",
        "✓".green(),
        validated.name(),
        order.len(),
        order.join(" → ")
    );
    println!(
        "  state: {}",
        validated
            .state_fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

fn print_summary(output: &RunOutput) {
    let metrics = &output.metrics;
    println!(
        "{} Workflow '{}' completed in {}ms ({} step(s), {} tokens, ~${:.4})",
        "✓".green().bold(),
        output.workflow,
        metrics.duration_ms,
        metrics.step_count,
        metrics.usage.total_tokens,
        metrics.cost_usd
    );
    for step in &metrics.steps {
        println!(
            "  {} {} [{}/{}] {}ms",
            "•".dimmed(),
            step.step_id.cyan(),
            step.provider,
            step.model,
            step.duration_ms
        );
    }
    println!("{}", "State:".bold());
    for (name, value) in &output.state {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {}: {}", name.yellow(), rendered);
    }
    println!("  {} {}", "run:".dimmed(), output.run_id.dimmed());
}

fn report(err: &FlowlineError, verbose: bool) {
    let root = err.root_cause();
    let message = root.to_string();
    let message = message
        .strip_prefix(&format!("[{}] ", root.code()))
        .unwrap_or(&message)
        .to_string();

    eprintln!(
        "{} [{}] {}: {}",
        "Error:".red().bold(),
        root.code(),
        root.kind(),
        message
    );
    if let Some(step) = err.step_id() {
        eprintln!("  {} {}", "step:".dimmed(), step);
    }
    if let FlowlineError::ConfigValidation { issues } = root {
        for issue in issues {
            eprintln!("  - {}", issue);
        }
    }
    if let Some(fix) = err.fix_suggestion() {
        eprintln!("  {} {}", "Fix:".yellow(), fix);
    }

    if verbose {
        eprintln!("  {} {}", "trace:".dimmed(), err);
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
            source = cause.source();
        }
    }
}
