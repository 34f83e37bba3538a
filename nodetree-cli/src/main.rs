use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nodetree::prelude::*;
use serde_json::json;
use tracing::{error, info, warn};

const OUTPUT_NODE: &str = "Output";

#[derive(Parser)]
#[command(name = "nodetree")]
#[command(about = "Evaluates node-graph pipelines against a shared result cache")]
struct Cli {
    /// Engine configuration file (YAML or JSON). Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluates every terminal of a graph description.
    Run(RunArgs),
    /// Lists registered node types.
    Nodes {
        /// Only list types of this stage. May be repeated.
        #[arg(long = "stage")]
        stages: Vec<Stage>,
    },
    /// Removes every stored result from the configured cache.
    ClearCache,
}

#[derive(Args)]
struct RunArgs {
    /// Graph description, YAML or JSON.
    script: PathBuf,

    /// File bound to the first node of the input stage.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Appends a writer storing the final result at this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Validate the graph and print the issues without evaluating.
    #[arg(long)]
    validate_only: bool,

    /// Evaluate without reading or writing the result cache.
    #[arg(long)]
    no_cache: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{0} nodes failed validation")]
struct ValidationFailed(usize);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::load_or_default(cli.config.as_deref())
        .and_then(EngineConfig::apply_env)
    {
        Ok(config) => config,
        Err(err) => {
            eprintln!("nodetree: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = common::log_setup::setup_logging(&config.log_level, config.log_dir.as_deref())
    {
        eprintln!("nodetree: {}", err);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Run(args) => run(args, &config),
        Command::Nodes { stages } => list_nodes(&stages, &config),
        Command::ClearCache => clear_cache(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            let validation = err.is::<ValidationFailed>()
                || err
                    .downcast_ref::<EvalError>()
                    .is_some_and(EvalError::is_validation);
            if validation {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(args: RunArgs, config: &EngineConfig) -> anyhow::Result<()> {
    let registry = Arc::new(config.build_registry()?);
    let mut script = Script::from_file(&args.script, registry)
        .with_context(|| format!("failed to load {}", args.script.display()))?;

    if let Some(input) = &args.input {
        script.bind_input_file(input)?;
    }
    if let Some(output) = &args.output {
        let id = script.append_output(OUTPUT_NODE, output, None)?;
        script.set_param(id, "create_dir", true)?;
    }

    if args.validate_only {
        let report = script.validate_all();
        println!("{}", serde_json::to_string_pretty(&report)?);
        for issue in report.values().flatten() {
            warn!("{}", issue);
        }
        return match report.len() {
            0 => Ok(()),
            failed => Err(ValidationFailed(failed).into()),
        };
    }

    let cache: Arc<dyn Cache> = if args.no_cache {
        Arc::new(NullCache)
    } else {
        config.build_cache()?
    };

    let mut terminals = script.get_terminals();
    terminals.sort_by_key(|id| script.node(*id).map(|node| node.stage()));

    let mut results = serde_json::Map::new();
    for id in terminals {
        let value = script.eval(id, cache.as_ref())?;
        if let Some(node) = script.node(id) {
            results.insert(node.name().to_string(), summarize(&value));
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "results": results,
            "stats": script.stats(),
            "cache": cache.stats(),
        }))?
    );

    Ok(())
}

fn list_nodes(stages: &[Stage], config: &EngineConfig) -> anyhow::Result<()> {
    let registry = config.build_registry()?;
    info!(
        "{} node types in modules {:?}",
        registry.len(),
        registry.modules()
    );

    for class in registry.get_nodes(stages) {
        println!(
            "{:<24} {:<14} inputs {:<12} -> {:<8} {}",
            class.type_name(),
            class.stage,
            class.arity.to_string(),
            class.output_type,
            class.description.as_deref().unwrap_or_default()
        );
    }

    Ok(())
}

fn clear_cache(config: &EngineConfig) -> anyhow::Result<()> {
    let cache = config.build_cache()?;
    let before = cache.stats();
    cache.clear()?;
    info!(
        "Cleared {} cached results ({} bytes)",
        before.entries, before.total_bytes
    );

    Ok(())
}

/// JSON view of an artifact with binary payloads reduced to their size.
fn summarize(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => json!(value),
        Value::Int(value) => json!(value),
        Value::Float(value) => json!(value),
        Value::String(value) => json!(value),
        Value::Bytes(bytes) => json!({ "bytes": bytes.len() }),
        Value::List(items) => items.iter().map(summarize).collect(),
        Value::Map(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), summarize(value)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into(),
    }
}
