use std::path::PathBuf;
use std::process;

use clap::Args;
use log::info;

use npu_graphopt::diagnostic::Diagnostic;
use npu_graphopt::optimise::steps;
use npu_graphopt::{optimise_graph, GraphDesc};

use super::{default_output, load_graph, resolve_options, write_file};

#[derive(Args)]
pub struct OptimiseArgs {
    /// Graph description (JSON)
    pub input: PathBuf,
    /// Target architecture (see `npu-graphopt targets`)
    #[arg(long)]
    pub target: Option<String>,
    /// Operator set of the input graph
    #[arg(long, value_parser = ["graphir", "tflite"])]
    pub frontend: Option<String>,
    /// Optimiser options file (JSON)
    #[arg(long, value_name = "PATH")]
    pub options: Option<PathBuf>,
    /// Output graph description (default: <input>.opt.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Write the optimisation log as JSON
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,
    /// Check graph consistency after every step
    #[arg(long)]
    pub verify: bool,
    /// Skip a rule by name (repeatable)
    #[arg(long = "disable", value_name = "RULE")]
    pub disable: Vec<String>,
}

pub fn cmd_optimise(args: OptimiseArgs) {
    let mut options = resolve_options(
        args.options.as_deref(),
        args.target.as_deref(),
        args.frontend.as_deref(),
    );
    options.verify_steps |= args.verify;

    let known = steps::rule_names(options.frontend);
    for rule in args.disable {
        if !known.contains(&rule.as_str()) {
            Diagnostic::warning(format!("no rule named '{}' in this pipeline", rule))
                .with_help("rule names are listed in the optimisation log".to_string())
                .render("<command line>", "");
        }
        options.disabled_rules.push(rule);
    }

    let (before, mut graph) = load_graph(&args.input);
    info!(
        "optimising {} for {} ({:?} frontend)",
        args.input.display(),
        options.target,
        options.frontend
    );

    let log = match optimise_graph(&mut graph, &options) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let after = GraphDesc::from_graph(&graph);
    let json = match after.to_json() {
        Ok(j) => j,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    let out_path = args.output.unwrap_or_else(|| default_output(&args.input));
    write_file(&out_path, &json);

    if let Some(log_path) = args.log {
        match log.to_json() {
            Ok(text) => write_file(&log_path, &text),
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
    }

    if let (Ok(old), Ok(new)) = (before.fingerprint(), after.fingerprint()) {
        info!("fingerprint {} -> {}", old, new);
    }
    eprint!("{}", after.summary());
    eprintln!(
        "{} rewrites, {} -> {} ops, wrote {}",
        log.len(),
        before.operations.len(),
        after.operations.len(),
        out_path.display()
    );
}
