//! The compiler pipeline: grammar text in, parser / source text / AST out.
//!
//! A compile parses the grammar fragments, runs the analysis passes in
//! order against a fresh [`Session`](session::Session), then hands the
//! checked AST to the [bytecode generator](generator) and on to the
//! requested backend. Plugins get one chance to reshape the pass lists
//! and the options before anything runs.

pub mod ast;
pub mod bytecode;
pub mod errors;
pub mod generator;
pub mod parser;
pub mod passes;
pub mod report;
pub mod session;
pub mod visitor;

mod singles;
pub(crate) mod utils;

use crate::generators;
use crate::runtime;
use ast::Grammar;
use errors::CompileError;
use parser::SourceFragment;
use session::{DiagnosticSink, Session, Severity};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Module wrapper of the emitted source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Bare,
    CommonJs,
    Amd,
    Umd,
    Es,
    Globals,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Bare => "bare",
            Self::CommonJs => "commonjs",
            Self::Amd => "amd",
            Self::Umd => "umd",
            Self::Es => "es",
            Self::Globals => "globals",
        })
    }
}

impl FromStr for Format {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bare" => Ok(Self::Bare),
            "commonjs" => Ok(Self::CommonJs),
            "amd" => Ok(Self::Amd),
            "umd" => Ok(Self::Umd),
            "es" => Ok(Self::Es),
            "globals" => Ok(Self::Globals),
            other => Err(CompileError::Config {
                message: format!("Unknown output format \"{}\"", other),
            }),
        }
    }
}

/// What [`generate`] should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// A directly executable [`runtime::Parser`]
    #[default]
    Parser,
    /// Emitted source text
    Source,
    /// Emitted source text plus mapping data
    SourceAndMap,
    /// The analyzed grammar AST
    Ast,
}

/// The result of a compile, shaped by [`Options::output`]
#[derive(Debug)]
pub enum Output {
    Parser(runtime::Parser),
    Source(String),
    SourceAndMap(String, generators::SourceMapping),
    Ast(Grammar),
}

impl Output {
    pub fn into_parser(self) -> Option<runtime::Parser> {
        match self {
            Self::Parser(parser) => Some(parser),
            _ => None,
        }
    }

    pub fn into_source(self) -> Option<String> {
        match self {
            Self::Source(source) => Some(source),
            Self::SourceAndMap(source, _) => Some(source),
            _ => None,
        }
    }

    pub fn into_ast(self) -> Option<Grammar> {
        match self {
            Self::Ast(grammar) => Some(grammar),
            _ => None,
        }
    }
}

/// A compiler extension: may add passes and claim options before the
/// pipeline runs
///
/// A plugin that cannot apply itself reports a [`CompileError::Plugin`].
pub trait Plugin {
    fn use_plugin(&self, compiler: &mut Compiler, options: &mut Options)
        -> Result<(), CompileError>;
}

/// The mutable façade handed to plugins
pub struct Compiler {
    pub passes: passes::Stages,
}

/// Compile options
///
/// `extra` carries unrecognized entries through to the generated parser's
/// options object; the compiler itself ignores them unless a plugin claims
/// them.
#[derive(Clone, Default)]
pub struct Options {
    /// Rules a parse may start from; empty means the first rule, and a
    /// literal `"*"` allows every rule
    pub allowed_start_rules: Vec<String>,
    /// Memoize rule results per position
    pub cache: bool,
    /// Emit tracing events on rule entry and exit
    pub trace: bool,
    pub format: Format,
    /// `variable → module path` pairs injected by the module wrapper
    pub dependencies: Vec<(String, String)>,
    /// Global name used by the `globals` and `umd` wrappers
    pub export_var: Option<String>,
    pub plugins: Vec<Rc<dyn Plugin>>,
    /// Tag attached to every location of this compile
    pub grammar_source: Option<String>,
    pub output: OutputKind,
    /// Per-pass severity overrides, keyed by pass name
    pub severities: HashMap<String, Severity>,
    /// Receives warnings as they are recorded
    pub warning: Option<DiagnosticSink>,
    /// Receives advisory diagnostics as they are recorded
    pub info: Option<DiagnosticSink>,
    /// Unrecognized options, passed through to parse-time action contexts
    pub extra: HashMap<String, String>,
}

/// Compile a single grammar source
pub fn generate(grammar: &str, options: Options) -> Result<Output, CompileError> {
    let fragments = [SourceFragment {
        source: options.grammar_source.clone(),
        text: grammar.to_string(),
    }];
    generate_from_fragments(&fragments, options)
}

/// Compile one or more grammar fragments as a single grammar
pub fn generate_from_fragments(
    fragments: &[SourceFragment],
    mut options: Options,
) -> Result<Output, CompileError> {
    let mut compiler = Compiler {
        passes: passes::Stages::default(),
    };

    // Plugins reshape the pipeline before anything runs
    let plugins = std::mem::take(&mut options.plugins);
    for plugin in &plugins {
        plugin.use_plugin(&mut compiler, &mut options)?;
    }

    let mut grammar = parser::parse_grammar_fragments(fragments)?;

    normalize_start_rules(&grammar, &mut options);

    let mut session = Session::new(
        options.severities.clone(),
        options.warning.clone(),
        options.info.clone(),
    );

    run_stage(&compiler.passes.check, &mut grammar, &options, &mut session)?;
    run_stage(&compiler.passes.transform, &mut grammar, &options, &mut session)?;

    if options.output == OutputKind::Ast {
        return Ok(Output::Ast(grammar));
    }

    let program = generator::generate_bytecode(&grammar, &options, &session);

    match options.output {
        OutputKind::Parser => Ok(Output::Parser(runtime::Parser::from_program(
            program, &options,
        )?)),
        OutputKind::Source => {
            let (source, _) = generators::generate_js(&program, &options)?;
            Ok(Output::Source(source))
        }
        OutputKind::SourceAndMap => {
            let (source, mapping) = generators::generate_js(&program, &options)?;
            Ok(Output::SourceAndMap(source, mapping))
        }
        OutputKind::Ast => unreachable!("handled above"),
    }
}

fn normalize_start_rules(grammar: &Grammar, options: &mut Options) {
    if options.allowed_start_rules.is_empty() {
        if let Some(first) = grammar.rules.first() {
            options.allowed_start_rules = vec![first.name.clone()];
        }
    } else if options.allowed_start_rules.iter().any(|name| name == "*") {
        options.allowed_start_rules = grammar.rules.iter().map(|r| r.name.clone()).collect();
    }
}

/// Run one pass list; the first pass that records an error aborts the
/// compile with everything collected so far
fn run_stage(
    stage: &[passes::Pass],
    grammar: &mut Grammar,
    options: &Options,
    session: &mut Session,
) -> Result<(), CompileError> {
    for pass in stage {
        (pass.run)(grammar, options, session);
        if session.take_pass_errors() > 0 {
            return Err(CompileError::Semantic {
                problems: session.error_problems(),
            });
        }
    }
    Ok(())
}
