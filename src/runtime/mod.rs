//! Direct execution of compiled grammars.
//!
//! A [`Parser`] interprets the bytecode against an input string and yields
//! a structural match tree. Embedded user code never runs here: actions
//! yield their inner expression's value and semantic predicates match
//! without consuming, while the recognition semantics (ordered choice,
//! backtracking, furthest-failure reporting, memoization, tracing) are
//! exactly those of an emitted parser.

pub mod errors;
pub mod tracer;

mod executor;

pub use errors::{ParseError, ParseFailure, SourceText};
pub use tracer::{CollectingTracer, DefaultTracer, TraceEvent, TraceEventKind, Tracer};

use crate::compiler::bytecode::Program;
use crate::compiler::errors::CompileError;
use crate::compiler::Options;
use executor::CompiledClass;

/// A structural parse result
///
/// Null stands in for missed optionals and lookahead results; sequences
/// and repetitions collect into arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Null,
    Str(String),
    Array(Vec<ParsedValue>),
}

impl ParsedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Options of one parse invocation
pub struct ParseOptions<'a> {
    /// The rule to start from; defaults to the first allowed start rule
    pub start_rule: Option<&'a str>,
    /// Tag attached to error locations
    pub source: Option<&'a str>,
    /// Receives tracing events; without one, tracing parsers print through
    /// [`DefaultTracer`]
    pub tracer: Option<&'a mut dyn Tracer>,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            start_rule: None,
            source: None,
            tracer: None,
        }
    }
}

/// The partial-result descriptor returned in library mode
///
/// Library mode never raises on a failed or incomplete match; callers
/// inspect the progress and may escalate through [`LibraryResult::throw`].
#[derive(Debug, Clone)]
pub struct LibraryResult {
    /// The start rule's value, when it matched at all
    pub result: Option<ParsedValue>,
    /// How far the parse consumed input
    pub curr_pos: usize,
    /// True only for a complete match of the whole input
    pub success: bool,
    pub max_fail_pos: usize,
    /// Descriptions recorded at the furthest failure position
    pub max_fail_expected: Vec<String>,
    failure: ParseFailure,
}

impl LibraryResult {
    /// The error a plain parse would have raised
    pub fn throw(&self) -> ParseError {
        ParseError::Failure(self.failure.clone())
    }
}

/// A compiled parser executing bytecode directly
#[derive(Debug)]
pub struct Parser {
    program: Program,
    classes: Vec<CompiledClass>,
    cache: bool,
    trace: bool,
}

impl Parser {
    /// Build a parser from generated bytecode
    pub(crate) fn from_program(program: Program, options: &Options) -> Result<Self, CompileError> {
        let classes = program
            .classes
            .iter()
            .map(CompiledClass::compile)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CompileError::Config {
                message: format!("Unsupported character class: {}", err),
            })?;

        Ok(Self {
            program,
            classes,
            cache: options.cache,
            trace: options.trace,
        })
    }

    /// The rules a parse may start from
    pub fn start_rules(&self) -> &[String] {
        &self.program.start_rules
    }

    /// Parse the whole input with default options
    pub fn parse(&self, input: &str) -> Result<ParsedValue, ParseError> {
        self.parse_with_options(input, ParseOptions::default())
    }

    /// Parse the whole input, raising on failure
    pub fn parse_with_options(
        &self,
        input: &str,
        mut options: ParseOptions,
    ) -> Result<ParsedValue, ParseError> {
        let start = self.resolve_start_rule(options.start_rule)?;
        let outcome = executor::run(self, input, start, options.source, options.tracer.take())?;

        match outcome.value {
            Some(value) if outcome.success => Ok(value),
            _ => Err(ParseError::Failure(outcome.failure)),
        }
    }

    /// Parse in library mode, returning a progress descriptor instead of
    /// raising on failed or incomplete matches
    pub fn parse_library(
        &self,
        input: &str,
        mut options: ParseOptions,
    ) -> Result<LibraryResult, ParseError> {
        let start = self.resolve_start_rule(options.start_rule)?;
        let outcome = executor::run(self, input, start, options.source, options.tracer.take())?;

        Ok(LibraryResult {
            result: outcome.value,
            curr_pos: outcome.curr_pos,
            success: outcome.success,
            max_fail_pos: outcome.max_fail_pos,
            max_fail_expected: outcome.max_fail_expected,
            failure: outcome.failure,
        })
    }

    pub(crate) fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn classes(&self) -> &[CompiledClass] {
        &self.classes
    }

    pub(crate) fn cache_enabled(&self) -> bool {
        self.cache
    }

    pub(crate) fn trace_enabled(&self) -> bool {
        self.trace
    }

    fn resolve_start_rule(&self, requested: Option<&str>) -> Result<usize, ParseError> {
        let name = requested.unwrap_or_else(|| self.program.default_start_rule());

        if !self.program.start_rules.iter().any(|r| r == name) {
            return Err(ParseError::BadStartRule {
                name: name.to_string(),
            });
        }

        self.program
            .rule_index(name)
            .ok_or_else(|| ParseError::BadStartRule {
                name: name.to_string(),
            })
    }
}
