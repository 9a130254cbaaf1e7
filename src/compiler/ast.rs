//! The grammar syntax tree produced by the [parser](super::parser) and
//! consumed by the analysis passes and the bytecode generator.

use std::fmt;
use std::rc::Rc;

/// A position in a grammar source text
///
/// Offsets are 0-based, lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }

    /// Position of the very first character of a source
    pub fn start() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open span `[start, end)` in a grammar source text
///
/// The `source` field is the opaque tag the grammar fragment was registered
/// under; it is carried through to every diagnostic referring to this span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub source: Option<Rc<str>>,
    pub start: Pos,
    pub end: Pos,
}

impl Location {
    pub fn new(source: Option<Rc<str>>, start: Pos, end: Pos) -> Self {
        Self { source, start, end }
    }

    /// Zero-width location, used for synthesized nodes
    pub fn at(source: Option<Rc<str>>, pos: Pos) -> Self {
        Self {
            source,
            start: pos,
            end: pos,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}:{}", source, self.start),
            None => write!(f, "{}", self.start),
        }
    }
}

/// A block of user-supplied code, kept byte-for-byte as written
///
/// The compiler never interprets this text; it flows verbatim into the
/// emitted parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub text: String,
    pub location: Location,
}

/// An `import … from "module";` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub bindings: Vec<ImportBinding>,
    pub module: String,
    pub location: Location,
}

/// One name bound by an import header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub name: String,
    pub location: Location,
}

/// A complete grammar: imports, optional initializers and an ordered rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub imports: Vec<Import>,
    /// Code executed once when the generated module is loaded
    pub top_level_initializer: Option<Code>,
    /// Code executed at the start of every parse
    pub initializer: Option<Code>,
    pub rules: Vec<Rule>,
    pub location: Location,
}

impl Grammar {
    /// Look a rule up by name
    pub fn find_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }
}

/// A named rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub name_location: Location,
    /// Human-readable name used in error messages instead of the expected
    /// set of the rule's body
    pub display_name: Option<String>,
    pub expression: Expression,
    pub location: Location,
}

/// A parsing expression with its source span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub location: Location,
}

impl Expression {
    pub fn new(kind: ExpressionKind, location: Location) -> Self {
        Self { kind, location }
    }
}

/// The closed set of parsing expression shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionKind {
    /// Match an exact substring
    Literal { value: String, ignore_case: bool },

    /// Match one character against a set of parts
    Class {
        parts: Vec<ClassPart>,
        inverted: bool,
        ignore_case: bool,
        unicode: bool,
    },

    /// Match any single character; fails only at end of input
    Any { unicode: bool },

    /// Invoke another rule of this grammar
    RuleRef { name: String },

    /// Invoke a rule of an imported grammar (`binding.rule`)
    LibraryRef { library: String, name: String },

    /// All sub-expressions must match in order
    Sequence { elements: Vec<Expression> },

    /// Ordered choice: the first matching alternative wins
    Choice { alternatives: Vec<Expression> },

    /// Match the inner expression or yield null without failing
    Optional(Box<Expression>),

    /// Greedy repetition, zero or more matches
    ZeroOrMore(Box<Expression>),

    /// Greedy repetition, at least one match
    OneOrMore(Box<Expression>),

    /// Bounded repetition with an optional delimiter between items
    Repeated {
        min: Boundary,
        max: Boundary,
        delimiter: Option<Box<Expression>>,
        inner: Box<Expression>,
    },

    /// Pure scoping; labels inside do not leak out
    Group(Box<Expression>),

    /// Bind the sub-result to a name; with `pick`, the element becomes the
    /// enclosing sequence's value
    Labeled {
        label: Option<String>,
        label_location: Location,
        pick: bool,
        inner: Box<Expression>,
    },

    /// Discard the structured result and yield the matched substring
    Text(Box<Expression>),

    /// Positive syntactic lookahead; consumes nothing
    SimpleAnd(Box<Expression>),

    /// Negative syntactic lookahead; consumes nothing
    SimpleNot(Box<Expression>),

    /// Positive semantic predicate; the code's truthiness gates the match
    SemanticAnd(Code),

    /// Negative semantic predicate
    SemanticNot(Code),

    /// Run user code on match; its return value becomes the result
    Action { inner: Box<Expression>, code: Code },

    /// Replace the inner expected-set contribution with one description
    Named { name: String, inner: Box<Expression> },
}

/// One part of a character class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassPart {
    Single(char),
    /// Inclusive range
    Range(char, char),
    /// Unicode property escape `\p{…}` / `\P{…}`; only valid in classes
    /// carrying the `u` flag
    Property { name: String, negated: bool },
}

/// One boundary of a bounded repetition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryKind {
    /// A constant count; `None` means unbounded and is only meaningful as a
    /// maximum
    Constant(Option<u64>),
    /// The boundary is read at parse time from a label in scope
    Variable(String),
    /// The boundary is computed at parse time by a zero-argument code block
    Code(String),
}

impl Boundary {
    /// The constant value of this boundary, if it is one
    pub fn constant(&self) -> Option<Option<u64>> {
        match self.kind {
            BoundaryKind::Constant(value) => Some(value),
            _ => None,
        }
    }
}
