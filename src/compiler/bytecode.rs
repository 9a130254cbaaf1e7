//! The stack-machine instruction set rules compile to, plus the
//! grammar-wide constant pools.
//!
//! Instructions operate on a per-parse machine with a current input
//! position, a value stack (holding results, saved positions, or the
//! distinguished FAILED sentinel), a silent-failure counter and the
//! furthest-failure record. Control flow is structured: conditional and
//! repetition instructions carry their blocks inline, and both the
//! JavaScript emitter and the interpreter walk the same structure.
//!
//! Every block compiled from an expression satisfies two invariants:
//! it pushes exactly one value, and on failure it leaves the current
//! position where the block started.

use super::ast::{ClassPart, Code, Location};
use super::utils::{push_escaped, quote_for_message};
use std::rc::Rc;

/// One instruction of the parsing stack machine
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Push a null value (the result of a failed optional)
    PushNull,
    /// Push the FAILED sentinel
    PushFailed,
    /// Push an empty collection for repetition results
    PushEmptyArray,
    /// Push the empty string without consuming input
    PushEmptyString,
    /// Push the current input position
    PushCurrPos,

    /// Drop the top of the stack
    Pop,
    /// Drop the `n` topmost values
    PopN(usize),
    /// Drop the value directly below the top
    Nip,
    /// Pop a saved position and rewind the input to it
    PopCurrPos,

    /// Pop `n` values and push them as one collection
    WrapN(usize),
    /// Pop `count` values and push the picked subset: one pick pushes the
    /// value itself, several push a collection (indices count from the
    /// bottom of the popped group)
    PluckN { count: usize, picks: Vec<usize> },
    /// Pop a saved position and replace it with the input consumed since
    TextFromSaved,

    /// Match one character; fails at end of input
    MatchAny { expectation: usize },
    /// Match a literal from the pool and push the matched text
    MatchLiteral {
        literal: usize,
        ignore_case: bool,
        expectation: usize,
    },
    /// Match one character against a class from the pool
    MatchClass { class: usize, expectation: usize },
    /// Push FAILED and record an expectation at the current position
    Fail { expectation: usize },

    /// Invoke a rule by index and push its result
    CallRule { rule: usize },
    /// Invoke a rule of an imported parser; the expectation describes the
    /// delegated rule when the import cannot be consulted
    CallLibrary {
        import: usize,
        name: usize,
        expectation: usize,
    },
    /// Pop `discard` values (the saved position and the inner results) and
    /// push the action's result; `params` are label slots as offsets from
    /// the top of the stack before popping
    CallAction {
        function: usize,
        discard: usize,
        params: Vec<usize>,
    },
    /// Evaluate a predicate; pushes null on success and FAILED otherwise
    CallPredicate {
        function: usize,
        negated: bool,
        params: Vec<usize>,
    },

    /// Enter lookahead: expectations are no longer recorded
    SilentFailsOn,
    /// Leave lookahead
    SilentFailsOff,

    /// Run `then` when the top of the stack is FAILED, `otherwise` if not
    IfError {
        then: Vec<Insn>,
        otherwise: Vec<Insn>,
    },
    /// Run `then` when the top of the stack is not FAILED
    IfNotError {
        then: Vec<Insn>,
        otherwise: Vec<Insn>,
    },

    /// Greedy repetition; pushes the collected values. With `guard` set, an
    /// iteration that succeeds without consuming input fails the whole
    /// repetition instead of looping forever.
    RepeatStar { element: Vec<Insn>, guard: bool },
    /// As `RepeatStar`, but fails unless at least one iteration matched
    RepeatPlus { element: Vec<Insn>, guard: bool },
    /// Bounded repetition with optional delimiter; boundaries are resolved
    /// when the instruction runs
    RepeatRange {
        element: Vec<Insn>,
        delimiter: Option<Vec<Insn>>,
        min: BoundaryRef,
        max: BoundaryRef,
        guard: bool,
    },
}

/// A repetition boundary as the machine sees it
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryRef {
    /// Inlined constant; `None` means unbounded
    Constant(Option<u64>),
    /// A labeled value on the stack, addressed from the top
    SlotFromTop(usize),
    /// A zero-argument function from the pool, evaluated by the host
    Function(usize),
}

/// One compiled rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCode {
    pub name: String,
    pub code: Vec<Insn>,
    /// Where the rule was declared, for mapping emitted code back to the
    /// grammar
    pub location: Location,
}

/// An expected-input description recorded at failure positions
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Literal { text: String, ignore_case: bool },
    Class(ClassDesc),
    Any,
    EndOfInput,
    /// A human-readable description from a `named` wrapper or rule display
    /// name
    Other(String),
}

impl Expectation {
    /// The description used in `Expected …` messages
    pub fn describe(&self) -> String {
        match self {
            Self::Literal { text, .. } => quote_for_message(text),
            Self::Class(desc) => desc.display(),
            Self::Any => "any character".to_string(),
            Self::EndOfInput => "end of input".to_string(),
            Self::Other(name) => name.clone(),
        }
    }
}

/// A character class as stored in the constant pool
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDesc {
    pub parts: Vec<ClassPart>,
    pub inverted: bool,
    pub ignore_case: bool,
    pub unicode: bool,
}

impl ClassDesc {
    /// Render the class roughly as it was written, for error messages
    pub fn display(&self) -> String {
        let mut out = String::from("[");
        if self.inverted {
            out.push('^');
        }
        for part in &self.parts {
            match part {
                ClassPart::Single(c) => push_class_char(&mut out, *c),
                ClassPart::Range(lo, hi) => {
                    push_class_char(&mut out, *lo);
                    out.push('-');
                    push_class_char(&mut out, *hi);
                }
                ClassPart::Property { name, negated } => {
                    out.push('\\');
                    out.push(if *negated { 'P' } else { 'p' });
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
        }
        out.push(']');
        out
    }
}

fn push_class_char(out: &mut String, c: char) {
    match c {
        ']' => out.push_str("\\]"),
        '^' => out.push_str("\\^"),
        '-' => out.push_str("\\-"),
        '\\' => out.push_str("\\\\"),
        c => {
            let mut buf = String::new();
            push_escaped(&mut buf, &c.to_string());
            out.push_str(&buf);
        }
    }
}

/// An embedded action or predicate body with its parameter list
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCode {
    pub predicate: bool,
    pub params: Vec<String>,
    pub body: String,
    pub location: Location,
}

/// An import binding a library reference resolves through
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryImport {
    pub binding: String,
    pub module: String,
}

/// A complete compiled grammar: per-rule code plus shared constant pools
#[derive(Debug, Clone)]
pub struct Program {
    pub rules: Vec<RuleCode>,
    pub literals: Vec<String>,
    pub classes: Vec<ClassDesc>,
    pub expectations: Vec<Expectation>,
    pub functions: Vec<FunctionCode>,
    pub imports: Vec<LibraryImport>,
    /// Names of the rules a parse may start from, in declaration order
    pub start_rules: Vec<String>,
    pub top_level_initializer: Option<Code>,
    pub initializer: Option<Code>,
    pub grammar_source: Option<Rc<str>>,
}

impl Program {
    pub fn rule_index(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|rule| rule.name == name)
    }

    /// The rule used when a parse names no start rule
    pub fn default_start_rule(&self) -> &str {
        &self.start_rules[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_descriptions() {
        let literal = Expectation::Literal {
            text: "let".to_string(),
            ignore_case: false,
        };
        assert_eq!(literal.describe(), "\"let\"");

        let class = Expectation::Class(ClassDesc {
            parts: vec![
                ClassPart::Range('a', 'z'),
                ClassPart::Single(']'),
                ClassPart::Single('\n'),
            ],
            inverted: true,
            ignore_case: false,
            unicode: false,
        });
        assert_eq!(class.describe(), "[^a-z\\]\\n]");

        assert_eq!(Expectation::Any.describe(), "any character");
        assert_eq!(Expectation::EndOfInput.describe(), "end of input");
        assert_eq!(
            Expectation::Other("integer".to_string()).describe(),
            "integer"
        );
    }
}
