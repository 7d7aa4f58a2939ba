//! modelbench CLI
//!
//! ## Commands
//!
//! - `check-config`: load and validate a benchmark config
//! - `validate-tools`: check that every tool image is present locally
//! - `run-tool`: execute one tool call in its sandbox and print the output

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use modelbench_core::telemetry::init_tracing;
use modelbench_core::{BenchConfig, DockerTool, DockerToolExecutor, TaskTool};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "modelbench")]
#[command(version = modelbench_core::VERSION)]
#[command(about = "Benchmark AI models on tasks with sandboxed tool calls", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file, then summarise it
    CheckConfig {
        #[arg(short, long, env = "MODELBENCH_CONFIG")]
        config: PathBuf,
    },

    /// Check that every configured tool image is available locally
    ValidateTools {
        #[arg(short, long, env = "MODELBENCH_CONFIG")]
        config: PathBuf,
    },

    /// Run a single tool call in a fresh container
    RunTool {
        #[arg(short, long, env = "MODELBENCH_CONFIG")]
        config: PathBuf,

        /// Tool name from the config
        #[arg(short, long)]
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Auxiliary file mounted into the tool's auxiliary directory
        #[arg(long = "aux", value_name = "NAME=PATH", value_parser = parse_aux)]
        aux: Vec<(String, PathBuf)>,

        /// Wall-clock limit for the call (milliseconds)
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        max_memory_mb: Option<u64>,

        /// CPU cap as a percentage of host capacity (1-100)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        cpu_percent: Option<u32>,

        /// Host directory for staged inputs (must be bind-mountable by the daemon)
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },
}

fn parse_aux(raw: &str) -> std::result::Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::CheckConfig { config } => cmd_check_config(&config),
        Commands::ValidateTools { config } => cmd_validate_tools(&config).await,
        Commands::RunTool {
            config,
            tool,
            args,
            aux,
            timeout_ms,
            max_memory_mb,
            cpu_percent,
            scratch_dir,
        } => {
            let policy = TaskTool {
                timeout_ms,
                max_memory_mb,
                cpu_percent,
                ..TaskTool::new(tool)
            };
            cmd_run_tool(&cancel, &config, &policy, &args, &aux, scratch_dir.as_deref()).await
        }
    }
}

fn load_config(path: &Path) -> Result<BenchConfig> {
    BenchConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    println!("Config OK: {}", path.display());
    println!("  model: {}", config.run.model);
    match &config.run.retry_policy {
        Some(policy) => println!(
            "  retries: up to {} (initial delay {}s, max {}s)",
            policy.max_retry_attempts, policy.initial_delay_seconds, policy.max_delay_seconds
        ),
        None => println!("  retries: none"),
    }
    if config.run.max_requests_per_minute > 0 {
        println!("  rate limit: {}/min", config.run.max_requests_per_minute);
    }
    println!("  tools: {}", config.tools.len());
    for tool in &config.tools {
        println!("    {} ({})", tool.name, tool.image);
    }
    println!("  tasks: {}", config.tasks.len());
    for task in &config.tasks {
        let tools: Vec<_> = task.enabled_tools().map(|t| t.name.as_str()).collect();
        if tools.is_empty() {
            println!("    {}", task.name);
        } else {
            println!("    {} [tools: {}]", task.name, tools.join(", "));
        }
    }
    Ok(())
}

async fn cmd_validate_tools(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    if config.tools.is_empty() {
        println!("No tools configured");
        return Ok(());
    }

    let executor = DockerToolExecutor::connect().context("Failed to connect to Docker")?;
    let mut missing = 0;
    for tool in &config.tools {
        match executor.validate_tool(tool).await {
            Ok(()) => println!("✓ {} ({})", tool.name, tool.image),
            Err(err) => {
                missing += 1;
                println!("✗ {}: {err}", tool.name);
            }
        }
    }
    executor.close().await?;

    if missing > 0 {
        bail!("{missing} of {} tools unavailable", config.tools.len());
    }
    Ok(())
}

async fn cmd_run_tool(
    cancel: &CancellationToken,
    path: &Path,
    policy: &TaskTool,
    args: &str,
    aux: &[(String, PathBuf)],
    scratch_dir: Option<&Path>,
) -> Result<()> {
    let config = load_config(path)?;
    let tool = config
        .tool(&policy.name)
        .with_context(|| format!("Tool '{}' is not configured", policy.name))?
        .clone();

    let mut auxiliary = BTreeMap::new();
    for (name, file) in aux {
        let data = std::fs::read(file)
            .with_context(|| format!("Failed to read auxiliary file {}", file.display()))?;
        auxiliary.insert(name.clone(), data);
    }

    let mut executor = DockerToolExecutor::connect().context("Failed to connect to Docker")?;
    if let Some(dir) = scratch_dir {
        executor = executor.with_scratch_root(dir);
    }
    executor.validate_tool(&tool).await?;
    executor.register_tool(DockerTool::for_task(tool, policy));

    let outcome = executor
        .execute_tool(cancel, &policy.name, args, &auxiliary)
        .await;
    let usage = executor.usage_stats();
    executor.close().await?;

    let output = outcome?;
    println!("{output}");
    if let Some(stats) = usage.get(&policy.name) {
        info!(
            tool = %policy.name,
            calls = stats.call_count,
            elapsed = %humantime::format_duration(stats.total_time()),
            "tool finished"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aux() {
        assert_eq!(
            parse_aux("sales.csv=/tmp/sales.csv").unwrap(),
            ("sales.csv".to_string(), PathBuf::from("/tmp/sales.csv"))
        );
        assert!(parse_aux("sales.csv").is_err());
        assert!(parse_aux("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run_tool() {
        let cli = Cli::try_parse_from([
            "modelbench",
            "--verbose",
            "run-tool",
            "--config",
            "bench.toml",
            "--tool",
            "python",
            "--args",
            r#"{"code":"print(1)"}"#,
            "--aux",
            "a.txt=/tmp/a.txt",
            "--cpu-percent",
            "50",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::RunTool {
                tool,
                aux,
                cpu_percent,
                timeout_ms,
                ..
            } => {
                assert_eq!(tool, "python");
                assert_eq!(aux.len(), 1);
                assert_eq!(cpu_percent, Some(50));
                assert_eq!(timeout_ms, None);
            }
            _ => panic!("expected run-tool"),
        }
    }

    #[test]
    fn test_cpu_percent_out_of_range_is_rejected() {
        let parsed = Cli::try_parse_from([
            "modelbench",
            "run-tool",
            "--config",
            "bench.toml",
            "--tool",
            "python",
            "--cpu-percent",
            "150",
        ]);
        assert!(parsed.is_err());
    }
}
