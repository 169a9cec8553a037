//! Optimiser options and target resolution.
//!
//! Options come from defaults, an optional JSON file, and CLI overrides,
//! in that order. Problems with user-supplied files are reported as
//! `Diagnostic`s so the CLI can render them against the file contents.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arch::KNOWN_TARGETS;
use crate::diagnostic::{json_error_span, Diagnostic};


/// Which rewrite pipeline a graph goes through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frontend {
    /// Canonical operator set only.
    #[default]
    GraphIr,
    /// TFLite-flavoured operators, normalised before the GraphIr steps run.
    TfLite,
}

impl Frontend {
    pub fn parse(name: &str) -> Option<Frontend> {
        match name.to_ascii_lowercase().as_str() {
            "graphir" => Some(Frontend::GraphIr),
            "tflite" => Some(Frontend::TfLite),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimiserOptions {
    /// Architecture name passed to `arch::create_constraints`.
    pub target: String,
    pub frontend: Frontend,
    /// Append provenance records to the optimisation log.
    pub record_optimisations: bool,
    /// Check reader/writer consistency after every step.
    pub verify_steps: bool,
    /// Rule names the scheduler skips.
    pub disabled_rules: Vec<String>,
}

impl Default for OptimiserOptions {
    fn default() -> Self {
        Self {
            target: "ethos-u55".to_string(),
            frontend: Frontend::GraphIr,
            record_optimisations: true,
            verify_steps: false,
            disabled_rules: Vec::new(),
        }
    }
}

impl OptimiserOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(format!(
                "cannot read options file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_json(&content, path)
    }

    fn parse_json(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let options: OptimiserOptions = serde_json::from_str(content).map_err(|e| {
            Diagnostic::error(format!("{}: invalid options: {}", path.display(), e))
                .with_span(json_error_span(content, &e))
        })?;
        resolve_target(&options.target).map_err(|d| match find_value(content, &options.target) {
            Some(span) => d.with_span(span),
            None => d,
        })?;
        Ok(options)
    }

    pub fn is_rule_disabled(&self, rule: &str) -> bool {
        self.disabled_rules.iter().any(|r| r == rule)
    }
}

/// Check that `name` is a known architecture.
pub fn resolve_target(name: &str) -> Result<&'static str, Diagnostic> {
    KNOWN_TARGETS
        .iter()
        .copied()
        .find(|&t| t == name)
        .ok_or_else(|| {
            Diagnostic::error(format!("unknown target '{}'", name))
                .with_help(format!("available targets: {}", KNOWN_TARGETS.join(", ")))
        })
}

/// Span of the first quoted occurrence of `value`.
fn find_value(content: &str, value: &str) -> Option<std::ops::Range<usize>> {
    let quoted = format!("\"{}\"", value);
    content
        .find(&quoted)
        .map(|start| start + 1..start + 1 + value.len())
}
