//! Source-text backends.
//!
//! A generator is a pure function from a compiled [`Program`] and the
//! compile options to source text; emitted parsers honor the same runtime
//! contract the in-crate interpreter implements.
//!
//! [`Program`]: crate::compiler::bytecode::Program

mod javascript;
mod skeleton;

pub use javascript::{generate_js, MappingEntry, SourceMapping};
