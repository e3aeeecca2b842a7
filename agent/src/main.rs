//! Local personal agent runtime
//!
//! This is the main entry point - a slim dispatcher that builds the runtime
//! and routes subcommands.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth_agent::agent::{AgentBuilder, AgentRuntime};
use hearth_agent::cli::{self, Cli, Commands, MemoryCommands};
use hearth_agent::config::HearthConfig;
use hearth_agent::persistence::StorePaths;

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
///
/// Set `LOG_FORMAT=json` for structured JSON output.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut config = HearthConfig::load()?;
    if let Some(model) = args.model {
        config.llm.model = Some(model);
    }

    let mut builder = AgentBuilder::new(config);
    if let Some(ref dir) = args.data_dir {
        builder = builder.with_paths(StorePaths::new(dir.clone()));
    }
    let runtime = builder.build().await?;

    let result = dispatch(args.command.unwrap_or(Commands::Repl), &runtime).await;
    runtime.shutdown().await;
    result
}

async fn dispatch(cmd: Commands, runtime: &AgentRuntime) -> Result<()> {
    match cmd {
        Commands::Chat { message } => {
            let answer = runtime.agent.run_turn(&message).await?;
            println!("{}", answer);
            Ok(())
        }

        Commands::Repl => cli::run_repl(runtime).await,

        Commands::Tools => {
            for tool in runtime.registry.list().await {
                println!(
                    "{:<24} [{}] {}",
                    tool.name(),
                    tool.risk_level().as_str(),
                    tool.description()
                );
            }
            Ok(())
        }

        Commands::Mcp => {
            for name in runtime.bridge.servers().await {
                let state = if runtime.bridge.is_connected(&name).await {
                    "connected"
                } else {
                    "disconnected"
                };
                println!("{:<24} {}", name, state);
            }
            Ok(())
        }

        Commands::Memory { command } => run_memory_command(command, runtime).await,
    }
}

async fn run_memory_command(cmd: MemoryCommands, runtime: &AgentRuntime) -> Result<()> {
    match cmd {
        MemoryCommands::Show => {
            println!("{}", runtime.memory.compile().await);
        }
        MemoryCommands::Log { limit } => {
            for version in runtime.memory.log(limit).await {
                println!(
                    "{}  {}  {}",
                    &version.id[..16.min(version.id.len())],
                    version.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    version.message
                );
            }
        }
        MemoryCommands::Diff { from, to } => {
            for entry in runtime.memory.diff(&from, &to).await? {
                match entry.change {
                    hearth_agent::memory::versions::ChangeKind::Added => {
                        println!("+ {}: {}", entry.label, entry.new.unwrap_or_default())
                    }
                    hearth_agent::memory::versions::ChangeKind::Removed => {
                        println!("- {}: {}", entry.label, entry.old.unwrap_or_default())
                    }
                    hearth_agent::memory::versions::ChangeKind::Modified => {
                        println!(
                            "~ {}: {} -> {}",
                            entry.label,
                            entry.old.unwrap_or_default(),
                            entry.new.unwrap_or_default()
                        )
                    }
                }
            }
        }
        MemoryCommands::Rollback { id } => {
            runtime.memory.restore(&id).await?;
            println!("Restored blocks from {}", id);
        }
    }
    Ok(())
}
