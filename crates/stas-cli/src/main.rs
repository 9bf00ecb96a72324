//! stas CLI - Simultaneous Task Allocation and Scheduling
//!
//! Command-line interface for loading problem documents, running the
//! allocation search and emitting solution documents.
//!
//! ## Exit Code Contract
//!
//! | Exit Code | Meaning |
//! |-----------|---------|
//! | 0 | Solved (or, for `check`, the document is valid) |
//! | 1 | Unsolvable: the search exhausted its frontier |
//! | 2 | Timeout: the wall-clock budget ran out first |
//! | 3 | Invalid input |

mod input;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::input::load_problem;
use crate::output::SolutionDoc;
use stas_solver::ItagsSearch;

const EXIT_SOLVED: u8 = 0;
const EXIT_UNSOLVABLE: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;
const EXIT_INVALID_INPUT: u8 = 3;

#[derive(Parser)]
#[command(name = "stas")]
#[command(author, version, about = "Task allocation and scheduling engine", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a problem document (no search)
    Check {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run the allocation search and emit the solution
    Solve {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Evaluate schedule quality with the single-shot scheduler
        #[arg(long)]
        quick_nsq: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Solve {
            file,
            output,
            quick_nsq,
        } => solve(&file, output.as_deref(), quick_nsq),
    }
}

fn check(file: &std::path::Path) -> ExitCode {
    match load_problem(file) {
        Ok(inputs) => {
            println!(
                "ok: {} tasks, {} robots, {} species, {} precedence constraints",
                inputs.num_tasks(),
                inputs.num_robots(),
                inputs.species.len(),
                inputs.precedence.len()
            );
            ExitCode::from(EXIT_SOLVED)
        }
        Err(error) => {
            eprintln!("invalid problem: {error}");
            ExitCode::from(EXIT_INVALID_INPUT)
        }
    }
}

fn solve(file: &std::path::Path, output: Option<&std::path::Path>, quick_nsq: bool) -> ExitCode {
    let inputs = match load_problem(file) {
        Ok(inputs) => inputs,
        Err(error) => {
            eprintln!("invalid problem: {error}");
            return ExitCode::from(EXIT_INVALID_INPUT);
        }
    };

    let mut search = ItagsSearch::new(inputs.clone());
    if quick_nsq {
        search = search.with_quick_nsq();
    }

    let outcome = search.search();
    match &outcome.solution {
        Some(solution) => {
            let doc = SolutionDoc::build(
                &inputs,
                solution,
                &outcome,
                search.context().scheduling_failures(),
                search.context().scheduling_iterations(),
            );
            if let Err(error) = emit(&doc, output) {
                eprintln!("cannot write solution: {error:#}");
                return ExitCode::from(EXIT_INVALID_INPUT);
            }
            tracing::info!(
                makespan = solution.schedule.makespan,
                generated = outcome.statistics.nodes_generated,
                expanded = outcome.statistics.nodes_expanded,
                "solved"
            );
            ExitCode::from(EXIT_SOLVED)
        }
        None if outcome.timed_out => {
            eprintln!("timeout: search budget exhausted before a solution was found");
            ExitCode::from(EXIT_TIMEOUT)
        }
        None => {
            eprintln!("unsolvable: the search exhausted its frontier without a goal");
            ExitCode::from(EXIT_UNSOLVABLE)
        }
    }
}

fn emit(doc: &SolutionDoc, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let text = doc.to_json_pretty().context("serialising solution")?;
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
