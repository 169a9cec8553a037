use std::ops::Range;

/// A user-facing diagnostic (error or warning) about an input file.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Byte range in the offending file, when one is known.
    pub span: Option<Range<usize>>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span: None,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne. Without a span the
    /// report points at the start of `source`.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let span = self
            .span
            .clone()
            .map(|s| s.start.min(source.len())..s.end.min(source.len()))
            .unwrap_or(0..0);
        let mut report = Report::build(kind, filename, span.start).with_message(&self.message);
        if self.span.is_some() {
            report = report.with_label(
                Label::new((filename, span))
                    .with_message(&self.message)
                    .with_color(color),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        // Writing to stderr only fails when stderr is gone.
        let _ = report.finish().eprint((filename, Source::from(source)));
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

/// Byte span of the character a `serde_json` error points at.
pub fn json_error_span(content: &str, error: &serde_json::Error) -> Range<usize> {
    let line_start: usize = content
        .split_inclusive('\n')
        .take(error.line().saturating_sub(1))
        .map(str::len)
        .sum();
    let offset = (line_start + error.column().saturating_sub(1)).min(content.len());
    offset..(offset + 1).min(content.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let d = Diagnostic::error("unknown target".to_string()).with_span(10..15);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "unknown target");
        assert_eq!(d.span, Some(10..15));
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_warning_construction() {
        let d = Diagnostic::warning("option ignored".to_string());
        assert_eq!(d.severity, Severity::Warning);
        assert!(d.span.is_none());
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::warning("hint".to_string())
            .with_note("note 1".to_string())
            .with_help("help text".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.notes, vec!["note 1", "note 2"]);
        assert_eq!(d.help.as_deref(), Some("help text"));
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "{\n  \"target\": \"ethos-u99\"\n}\n";
        let d = Diagnostic::error("unknown target".to_string())
            .with_span(14..25)
            .with_note("known targets: ethos-u55".to_string());
        d.render("options.json", source);
        // Out-of-range spans are clamped.
        Diagnostic::error("bad".to_string())
            .with_span(100..200)
            .render("options.json", source);
    }

    #[test]
    fn test_render_diagnostics_without_span() {
        let diagnostics = vec![
            Diagnostic::warning("first".to_string()),
            Diagnostic::error("second".to_string()),
        ];
        render_diagnostics(&diagnostics, "graph.json", "");
    }

    #[test]
    fn test_json_error_span_points_at_offending_line() {
        let source = "{\n  \"target\": ,\n}\n";
        let err = serde_json::from_str::<serde_json::Value>(source).unwrap_err();
        let span = json_error_span(source, &err);
        assert_eq!(err.line(), 2);
        // Line two spans bytes 2..16.
        assert!(span.start >= 2 && span.end <= 16);
        assert_eq!(span.len(), 1);
    }
}
