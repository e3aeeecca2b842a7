//! Command-line interface: argument shapes and the interactive REPL

use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::agent::AgentRuntime;

#[derive(Parser)]
#[command(name = "hearth", about = "Local personal agent runtime", version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the model name
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and print the answer
    Chat {
        /// The message to send
        message: String,
    },

    /// Interactive conversation (default)
    Repl,

    /// List registered tools
    Tools,

    /// Show configured MCP servers and their connection state
    Mcp,

    /// Inspect core memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Print all blocks as they appear in the prompt
    Show,
    /// List recent versions, newest first
    Log {
        #[arg(default_value_t = 20)]
        limit: usize,
    },
    /// Show label-level changes between two versions
    Diff { from: String, to: String },
    /// Restore block values from a version (matched by id prefix)
    Rollback { id: String },
}

/// Interactive loop. Reads a line, runs a turn, prints the answer.
pub async fn run_repl(runtime: &AgentRuntime) -> Result<()> {
    println!("hearth — type a message, 'quit' to exit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        match runtime.agent.run_turn(input).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) => eprintln!("error: {}\n", e),
        }
    }

    Ok(())
}
