//! # Peggy
//!
//! Peggy is a parser generator for Parsing Expression Grammars. A grammar
//! written in a small DSL compiles into either a self-contained JavaScript
//! parser (with user actions embedded verbatim) or a [`Parser`] value that
//! recognizes input directly and returns a structural match tree.
//!
//! The pipeline: the [grammar parser](compiler::parser) builds an AST with
//! precise source locations, the [analysis passes](compiler::passes)
//! enforce well-formedness, the [bytecode generator](compiler::generator)
//! lowers every rule to a stack-machine instruction list, and a backend
//! either [emits source text](generators) or executes the bytecode through
//! the [runtime](runtime).
//!
//! ```
//! use peggy::{generate, Options};
//!
//! let output = generate(
//!     "greeting = 'hello' ' '+ name\nname = [a-z]+",
//!     Options::default(),
//! )
//! .unwrap();
//!
//! let parser = output.into_parser().unwrap();
//! assert!(parser.parse("hello world").is_ok());
//! assert!(parser.parse("goodbye").is_err());
//! ```

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]

pub mod compiler;
pub mod generators;
pub mod runtime;

pub use compiler::ast::{Expression, ExpressionKind, Grammar, Location, Pos, Rule};
pub use compiler::errors::{CompileError, SyntaxError};
pub use compiler::parser::{parse_grammar, parse_grammar_fragments, SourceFragment};
pub use compiler::report::format_problem;
pub use compiler::session::{Note, Problem, Severity};
pub use compiler::{
    generate, generate_from_fragments, Compiler, Format, Options, Output, OutputKind, Plugin,
};
pub use generators::{generate_js, SourceMapping};
pub use runtime::{
    DefaultTracer, LibraryResult, ParseError, ParseFailure, ParseOptions, ParsedValue, Parser,
    SourceText, TraceEvent, TraceEventKind, Tracer,
};
