//! Per-compile diagnostic collection
//!
//! Each compile owns one [`Session`]; passes record problems into it in
//! order, and the pass manager aborts once a pass has recorded an error.

use super::ast::Location;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// How serious a recorded problem is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts compilation at the end of the reporting pass
    Error,
    /// Reported, compilation continues
    Warning,
    /// Advisory only
    Info,
}

/// Extra context attached to a problem, usually pointing at a second location
#[derive(Debug, Clone)]
pub struct Note {
    pub message: String,
    pub location: Option<Location>,
}

/// One diagnostic recorded by a pass
#[derive(Debug, Clone)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    pub notes: Vec<Note>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Callback receiving warnings or infos as they are recorded
pub type DiagnosticSink = Rc<dyn Fn(&Problem)>;

/// Statically inferred match behavior of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The rule matches every input (possibly consuming nothing)
    Always,
    /// Nothing is known statically
    Sometimes,
    /// The rule can never match
    Never,
}

/// State shared by all passes of one compile
pub struct Session {
    problems: Vec<Problem>,
    errors_in_pass: usize,
    severity_overrides: HashMap<String, Severity>,
    warning_sink: Option<DiagnosticSink>,
    info_sink: Option<DiagnosticSink>,
    /// Per-rule result of the match inference pass; consulted by the
    /// bytecode generator to decide where repetitions need zero-width
    /// guards
    pub match_results: HashMap<String, MatchResult>,
    /// Per-rule nullability (can the rule succeed without consuming input)
    pub nullability: HashMap<String, bool>,
}

impl Session {
    pub fn new(
        severity_overrides: HashMap<String, Severity>,
        warning_sink: Option<DiagnosticSink>,
        info_sink: Option<DiagnosticSink>,
    ) -> Self {
        Self {
            problems: Vec::new(),
            errors_in_pass: 0,
            severity_overrides,
            warning_sink,
            info_sink,
            match_results: HashMap::new(),
            nullability: HashMap::new(),
        }
    }

    /// The severity a pass should report at, honoring per-pass overrides
    pub fn severity_for(&self, pass: &str, default: Severity) -> Severity {
        self.severity_overrides.get(pass).copied().unwrap_or(default)
    }

    /// Record a problem
    pub fn report(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        location: Option<Location>,
        notes: Vec<Note>,
    ) {
        let problem = Problem {
            severity,
            message: message.into(),
            location,
            notes,
        };

        match severity {
            Severity::Error => self.errors_in_pass += 1,
            Severity::Warning => {
                if let Some(sink) = &self.warning_sink {
                    sink(&problem);
                }
            }
            Severity::Info => {
                if let Some(sink) = &self.info_sink {
                    sink(&problem);
                }
            }
        }

        self.problems.push(problem);
    }

    pub fn error(&mut self, message: impl Into<String>, location: Option<Location>) {
        self.report(Severity::Error, message, location, vec![]);
    }

    pub fn error_with_notes(
        &mut self,
        message: impl Into<String>,
        location: Option<Location>,
        notes: Vec<Note>,
    ) {
        self.report(Severity::Error, message, location, notes);
    }

    /// All problems recorded so far
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Errors recorded by the pass currently running
    pub(crate) fn take_pass_errors(&mut self) -> usize {
        std::mem::take(&mut self.errors_in_pass)
    }

    /// The error problems, for embedding into a `CompileError`
    pub(crate) fn error_problems(&self) -> Vec<Problem> {
        self.problems
            .iter()
            .filter(|p| p.severity == Severity::Error)
            .cloned()
            .collect()
    }
}
