mod cli;

use clap::{Parser, Subcommand};
use env_logger::Env;

use cli::optimise::{cmd_optimise, OptimiseArgs};
use cli::targets::cmd_targets;

#[derive(Parser)]
#[command(
    name = "npu-graphopt",
    version,
    about = "Graph-level optimiser for fixed-point NPU backends"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite a graph description into operations the target can run
    Optimise(OptimiseArgs),
    /// List the known target architectures
    Targets,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Optimise(args) => cmd_optimise(args),
        Command::Targets => cmd_targets(),
    }
}
