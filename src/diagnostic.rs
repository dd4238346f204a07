use std::ops::Range;

/// A shader compiler diagnostic located in generated kernel source.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub labels: Vec<(Range<usize>, String)>,
    pub notes: Vec<String>,
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
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn with_label(mut self, range: Range<usize>, text: String) -> Self {
        self.labels.push((range, text));
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    /// The headline as a compiler would print it: `error: <message>`.
    pub fn headline(&self) -> String {
        match self.severity {
            Severity::Error => format!("error: {}", self.message),
            Severity::Warning => format!("warning: {}", self.message),
        }
    }

    /// Render the diagnostic against `source` using ariadne, without colour.
    pub fn render(&self, filename: &str, source: &str) -> String {
        use ariadne::{Config, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let clamp = |r: &Range<usize>| {
            let end = r.end.min(source.len());
            r.start.min(end)..end
        };
        let offset = self.labels.first().map(|(r, _)| clamp(r).start).unwrap_or(0);

        let mut report = Report::build(kind, filename, offset)
            .with_config(Config::default().with_color(false))
            .with_message(&self.message);

        for (range, text) in &self.labels {
            report = report.with_label(Label::new((filename, clamp(range))).with_message(text));
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        let mut out = Vec::new();
        if report
            .finish()
            .write((filename, Source::from(source)), &mut out)
            .is_err()
        {
            return self.headline();
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// First line of compiler output that carries an error marker.
pub fn first_error_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| {
        line.len() >= 5 && line[..5].eq_ignore_ascii_case("error")
            || line.starts_with("[E") && line.contains("] Error")
    })
}
