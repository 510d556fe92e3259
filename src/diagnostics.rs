//! Diagnostic collection.
//!
//! Every stage reports into a [`DiagnosticSink`]. The analyzer brackets each
//! wave with a [`RestorationPoint`] so a wave's diagnostics can be withdrawn,
//! kept aside, or replayed once the wave loop knows whether it converged.

use colored::Colorize;

use crate::frontend::{SourceMap, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "{}", "info".cyan()),
            Severity::Warning => write!(f, "{}", "warning".yellow()),
            Severity::Error => write!(f, "{}", "error".red()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub token: Token,
    pub severity: Severity,
    /// Machine readable kind, e.g. `type-mismatch`
    pub tag: &'static str,
    pub message: String,
    /// Reporting location inside the compiler, only with `error-backtrace`
    pub backtrace: Option<String>,
}

/// Marks a position in the sink that can later be rolled back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorationPoint(usize);

#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

macro_rules! function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f)
            .rsplit("::")
            .find(|&part| part != "f" && part != "{{closure}}")
            .unwrap_or("?")
    }};
}

pub(crate) use function;

macro_rules! report {
    ($sink:expr, $severity:expr, $token:expr, $tag:expr, $($message:tt)+) => {{
        #[cfg(feature = "error-backtrace")]
        let backtrace = Some(format!(
            "{}::{} (at {}:{}:{})",
            module_path!(),
            $crate::diagnostics::function!(),
            file!(),
            line!(),
            column!()
        ));

        #[cfg(not(feature = "error-backtrace"))]
        let backtrace = None;

        $sink.report($crate::diagnostics::Diagnostic {
            token: $token,
            severity: $severity,
            tag: $tag,
            message: format!($($message)+),
            backtrace,
        })
    }};
}

pub(crate) use report;

macro_rules! report_error {
    ($sink:expr, $token:expr, $tag:expr, $($message:tt)+) => {
        $crate::diagnostics::report!(
            $sink,
            $crate::diagnostics::Severity::Error,
            $token,
            $tag,
            $($message)+
        )
    };
}

pub(crate) use report_error;

macro_rules! report_warning {
    ($sink:expr, $token:expr, $tag:expr, $($message:tt)+) => {
        $crate::diagnostics::report!(
            $sink,
            $crate::diagnostics::Severity::Warning,
            $token,
            $tag,
            $($message)+
        )
    };
}

pub(crate) use report_warning;

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn restoration_point(&self) -> RestorationPoint {
        RestorationPoint(self.diagnostics.len())
    }

    /// Moves every diagnostic reported since `point` out of the sink
    pub fn take_since(&mut self, point: RestorationPoint) -> Vec<Diagnostic> {
        let start = point.0.min(self.diagnostics.len());

        self.diagnostics.split_off(start)
    }

    /// Discards every diagnostic reported since `point`
    pub fn restore(&mut self, point: RestorationPoint) {
        self.diagnostics.truncate(point.0);
    }

    pub fn replay(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| d.tag == tag)
    }

    pub fn render(&self, sources: &SourceMap) -> String {
        let mut output = String::new();

        for diagnostic in &self.diagnostics {
            output.push_str(&format!(
                "{}: {} {}\n",
                diagnostic.severity,
                diagnostic.message,
                format!("[{}]", diagnostic.tag).white()
            ));

            let location = match sources.get(diagnostic.token.source) {
                Some(file) => format!(
                    "{}:{}:{}",
                    file.origin,
                    file.row_for_position(diagnostic.token.offset),
                    file.column_for_position(diagnostic.token.offset)
                ),
                None => "<synthesized>".to_owned(),
            };

            output.push_str(&format!("  {} {location}\n", "-->".blue()));

            if let Some(backtrace) = &diagnostic.backtrace {
                output.push_str(&format!("  {}: {backtrace}\n", "backtrace".blue()));
            }
        }

        output
    }
}
