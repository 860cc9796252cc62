mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{load_plan, TaskmeshConfig};
use std::path::PathBuf;
use std::sync::Arc;
use taskmesh_core::AgentDescriptor;
use taskmesh_orchestrator::{Orchestrator, PlanStatus};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmesh", about = "Taskmesh: capability-matched task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and run a plan
    Run {
        /// JSON plan file (array of task definitions)
        plan: PathBuf,
        /// Write the plan result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a plan without running it
    Validate {
        /// JSON plan file (array of task definitions)
        plan: PathBuf,
    },
    /// List registered agents
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = TaskmeshConfig::load(&cli.config).await?;
    let registry = Arc::new(config.build_registry()?);
    let orchestrator = Orchestrator::new(registry.clone(), config.scheduler.clone());

    match cli.command {
        Commands::Run { plan, output } => {
            let defs = load_plan(&plan)
                .await
                .with_context(|| format!("Failed to load plan '{}'", plan.display()))?;

            let token = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling plan");
                    token.cancel();
                }
            });

            let result = orchestrator.run(defs).await?;
            let json = serde_json::to_string_pretty(&result)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write '{}'", path.display()))?;
                    info!(path = %path.display(), "Plan result written");
                }
                None => println!("{json}"),
            }

            if result.status != PlanStatus::Succeeded {
                anyhow::bail!("{}", result.summary());
            }
        }
        Commands::Validate { plan } => {
            let defs = load_plan(&plan)
                .await
                .with_context(|| format!("Failed to load plan '{}'", plan.display()))?;
            let (graph, warnings) = orchestrator.validate(defs)?;

            println!("Plan is valid: {} task(s)", graph.len());
            let ready: Vec<&str> = graph.ready_tasks().iter().map(|t| t.id.as_str()).collect();
            println!("Initially ready: {}", ready.join(", "));
            if warnings.is_empty() {
                println!("Every task type has a capable agent.");
            } else {
                println!("Warnings:");
                for warning in &warnings {
                    println!("  - {warning}");
                }
            }
        }
        Commands::Agents => {
            let descriptors = registry.descriptors();
            if descriptors.is_empty() {
                println!("No agents registered.");
                println!("Configure agents in taskmesh.toml under [[agents]]");
            } else {
                println!("Registered agents:");
                for desc in &descriptors {
                    println!("{}", agent_line(desc));
                    let caps: Vec<&str> = desc.capabilities.iter().map(String::as_str).collect();
                    println!("    Capabilities: {}", caps.join(", "));
                    if !desc.tags.is_empty() {
                        println!("    Tags: {}", desc.tags.join(", "));
                    }
                }
                println!("\nTotal: {} agent(s)", descriptors.len());
            }
        }
    }

    Ok(())
}

fn agent_line(desc: &AgentDescriptor) -> String {
    format!(
        "  {} (priority {}, concurrency {}) - {}",
        desc.id, desc.priority, desc.concurrency, desc.description
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        let command = Cli::command();
        command.clone().debug_assert();
        let about = command.get_about().unwrap().to_string();
        assert_eq!(about, "Taskmesh: capability-matched task orchestration");
        assert!(about.is_ascii());
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from(["taskmesh", "-c", "custom.toml", "run", "plan.json", "-o", "out.json"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Commands::Run { plan, output } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_agent_line_is_plain_ascii() {
        let desc = AgentDescriptor::new("summarizer", ["summarize_text"])
            .with_description("Extractive summaries")
            .with_priority(55)
            .with_concurrency(2);
        let line = agent_line(&desc);
        assert_eq!(
            line,
            "  summarizer (priority 55, concurrency 2) - Extractive summaries"
        );
        assert!(line.is_ascii());
    }
}
