pub mod optimise;
pub mod targets;

use std::path::{Path, PathBuf};
use std::process;

use npu_graphopt::config::{resolve_target, Frontend, OptimiserOptions};
use npu_graphopt::diagnostic::{json_error_span, Diagnostic};
use npu_graphopt::{Graph, GraphDesc, GraphError};

/// Read a file or exit with an error naming it.
fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Span of the first quoted occurrence of `name`.
fn quoted_span(source: &str, name: &str) -> Option<std::ops::Range<usize>> {
    let quoted = format!("\"{}\"", name);
    source
        .find(&quoted)
        .map(|start| start + 1..start + 1 + name.len())
}

/// Turn a graph loading error into a diagnostic pointing into `source`.
fn graph_diagnostic(error: &GraphError, source: &str) -> Diagnostic {
    let diag = Diagnostic::error(error.to_string());
    match error {
        GraphError::Description(e) => diag.with_span(json_error_span(source, e)),
        GraphError::UnknownTensor(name) => match quoted_span(source, name) {
            Some(span) => diag
                .with_span(span)
                .with_help("declare the tensor in the \"tensors\" list".to_string()),
            None => diag,
        },
        GraphError::DuplicateTensor(name) => {
            // Point at the second declaration.
            let quoted = format!("\"{}\"", name);
            let second = source
                .match_indices(&quoted)
                .nth(1)
                .map(|(start, _)| start + 1..start + 1 + name.len());
            match second {
                Some(span) => diag.with_span(span),
                None => diag,
            }
        }
        _ => diag,
    }
}

/// Load a graph description and build it, rendering failures against the
/// file contents.
pub fn load_graph(path: &Path) -> (GraphDesc, Graph) {
    let source = read_source(path);
    let filename = path.display().to_string();
    let built = GraphDesc::from_json(&source).and_then(|desc| {
        let graph = desc.build()?;
        Ok((desc, graph))
    });
    match built {
        Ok(pair) => pair,
        Err(e) => {
            graph_diagnostic(&e, &source).render(&filename, &source);
            process::exit(1);
        }
    }
}

/// Merge the options file (if any) with command-line overrides.
pub fn resolve_options(
    options_path: Option<&Path>,
    target: Option<&str>,
    frontend: Option<&str>,
) -> OptimiserOptions {
    let mut options = match options_path {
        Some(path) => match OptimiserOptions::load(path) {
            Ok(o) => o,
            Err(diag) => {
                let source = std::fs::read_to_string(path).unwrap_or_default();
                diag.render(&path.display().to_string(), &source);
                process::exit(1);
            }
        },
        None => OptimiserOptions::default(),
    };

    if let Some(name) = target {
        match resolve_target(name) {
            Ok(t) => options.target = t.to_string(),
            Err(diag) => {
                diag.render("<command line>", "");
                process::exit(1);
            }
        }
    }

    if let Some(name) = frontend {
        match Frontend::parse(name) {
            Some(f) => options.frontend = f,
            None => {
                eprintln!("error: unknown frontend '{}' (expected graphir or tflite)", name);
                process::exit(1);
            }
        }
    }
    options
}

/// Default output path: `<input stem>.opt.json` beside the input.
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("graph");
    input.with_file_name(format!("{}.opt.json", stem))
}

pub fn write_file(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        eprintln!("error: cannot write '{}': {}", path.display(), e);
        process::exit(1);
    }
}
