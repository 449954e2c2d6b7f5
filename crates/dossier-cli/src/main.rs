// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// Allow clippy warnings for CLI application
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Unified Dossier CLI.
//!
//! `dossier investigate <name>` runs a full investigation and writes the
//! output files; `dossier evaluate` replays the built-in personas. Exit code
//! is 0 on success and 1 on any unhandled error.

mod evaluate;
mod wiring;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dossier", version, about = "Autonomous due-diligence investigations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate a named subject.
    Investigate {
        /// Subject full name.
        name: String,
        /// Subject's current role.
        #[arg(long)]
        role: Option<String>,
        /// Subject's current organization.
        #[arg(long)]
        org: Option<String>,
        /// Maximum director iterations.
        #[arg(long = "max-iter")]
        max_iter: Option<u32>,
        /// Cost budget in USD (0 = unlimited).
        #[arg(long)]
        budget: Option<f64>,
        /// Output directory.
        #[arg(long, default_value = "outputs")]
        output: String,
        /// Print per-node progress lines while running.
        #[arg(long)]
        live: bool,
        /// Write per-iteration state snapshots.
        #[arg(long)]
        debug: bool,
        /// Resume a crashed run from its checkpoint thread id.
        #[arg(long)]
        resume: Option<String>,
        /// Always produce a redacted report.
        #[arg(long = "redact-pii")]
        redact_pii: bool,
    },
    /// Run the built-in evaluation personas.
    Evaluate {
        /// Persona name, or difficulty tier (easy|medium|hard).
        #[arg(long)]
        persona: Option<String>,
        /// Run every persona.
        #[arg(long)]
        all: bool,
    },
}

fn init_tracing(live: bool) {
    use tracing_subscriber::EnvFilter;
    let default_filter = if live { "dossier=info,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Investigate {
            name,
            role,
            org,
            max_iter,
            budget,
            output,
            live,
            debug,
            resume,
            redact_pii,
        } => {
            init_tracing(live);
            let engine = wiring::build_engine(&output, budget, debug, redact_pii)?;
            let outcome = match resume {
                Some(thread_id) => engine.resume(&thread_id).await?,
                None => engine.investigate(&name, role, org, max_iter).await?,
            };
            let state = &outcome.state;
            println!(
                "Investigation complete: {} entities, {} connections, {} risk flags in {} iterations (${:.4})",
                state.entities.len(),
                state.connections.len(),
                state.risk_flags.len(),
                state.iteration,
                state.estimated_cost_usd,
            );
            println!(
                "Outputs written to {}/{}_report.md",
                output,
                dossier::models::subject_slug(&state.subject.full_name)
            );
            Ok(())
        }
        Commands::Evaluate { persona, all } => {
            init_tracing(true);
            evaluate::run(persona.as_deref(), all).await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
