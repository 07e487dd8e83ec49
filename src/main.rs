//! Hive Kernel - Entry Point
//!
//! Modes:
//! - Default: run one task given as arguments, print the JSON response
//! - --serve / -s: HTTP bridge
//! - --patterns / -p [n]: print recent patterns

use anyhow::Context;
use hive_kernel::{Config, Orchestrator, PatternStore, TaskRequest};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let serve_mode = args.iter().any(|a| a == "--serve" || a == "-s");
    let patterns_mode = args.iter().any(|a| a == "--patterns" || a == "-p");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode || args.is_empty() {
        print_help();
        return Ok(());
    }

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(if serve_mode { Level::INFO } else { Level::WARN });

    if serve_mode {
        // Interactive mode - log to stdout with colors
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // One-shot mode - stdout carries only the response, log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;

    if patterns_mode {
        let limit = args
            .iter()
            .skip_while(|a| *a != "--patterns" && *a != "-p")
            .nth(1)
            .and_then(|n| n.parse().ok())
            .unwrap_or(10);

        let store = PatternStore::open(&config.db_path)
            .with_context(|| format!("Failed to open pattern store {}", config.db_path.display()))?;
        println!("{}", serde_json::to_string_pretty(&store.list_recent(limit))?);
    } else if serve_mode {
        info!("Hive Kernel v{}", env!("CARGO_PKG_VERSION"));

        let orchestrator = Orchestrator::from_config(&config)?;
        hive_kernel::server::serve(orchestrator, config.bind_addr).await?;
    } else {
        let task = task_from_args(&args);

        let orchestrator = Orchestrator::from_config(&config)?;
        let response = orchestrator.handle(&TaskRequest::new(task)).await;
        println!("{}", serde_json::to_string_pretty(&response)?);

        if !response.success {
            std::process::exit(1);
        }
    }

    Ok(())
}

const FLAGS: &[&str] = &["--serve", "-s", "--patterns", "-p", "--help", "-h"];

/// Task text from the arguments, with only recognized flags removed
fn task_from_args(args: &[String]) -> String {
    args.iter()
        .filter(|a| !FLAGS.contains(&a.as_str()))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_help() {
    println!("Hive Kernel v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: hive-kernel [OPTIONS] [TASK...]");
    println!();
    println!("Options:");
    println!("  --serve, -s          Run the HTTP bridge");
    println!("  --patterns, -p [n]   Print the n most recent patterns (default: 10)");
    println!("  --help, -h           Show this help");
    println!();
    println!("Default: run TASK once and print the JSON response");
    println!();
    println!("Environment variables:");
    println!("  HIVE_DB_PATH                 Pattern store path");
    println!("  HIVE_CAPABILITIES            TOML capability table");
    println!("  OLLAMA_URL                   Inference endpoint (default: http://localhost:11434)");
    println!("  HIVE_MODEL                   Inference model (default: llama3.2:3b)");
    println!("  HIVE_DEFAULT_CAPABILITY      Fallback capability (default: cortex)");
    println!("  HIVE_REASONING_CAPABILITY    Capability for chain thoughts (default: cortex)");
    println!("  HIVE_DISPATCH_TIMEOUT_SECS   Per-call timeout (default: 60)");
    println!("  HIVE_CHAIN_MAX_ITERATIONS    Chain iteration cap (default: 5)");
    println!("  HIVE_CHAIN_CONFIDENCE        Chain completion confidence (default: 0.8)");
    println!("  HIVE_CHAIN_ENABLED           Enable the reasoning chain (default: true)");
    println!("  HIVE_GOVERNOR_ENABLED        Enable the policy governor (default: true)");
    println!("  HIVE_BIND_ADDR / HIVE_PORT   HTTP bridge address (default: 127.0.0.1:3001)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_keeps_dash_tokens() {
        assert_eq!(task_from_args(&args(&["what", "is", "-1", "+", "2"])), "what is -1 + 2");
        assert_eq!(task_from_args(&args(&["ls", "--all", "files"])), "ls --all files");
    }

    #[test]
    fn test_task_strips_known_flags() {
        assert_eq!(task_from_args(&args(&["-h", "hello"])), "hello");
        assert_eq!(task_from_args(&args(&["--serve"])), "");
    }
}
