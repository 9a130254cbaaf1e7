use super::ast::Location;
use super::session::Problem;
use super::utils::{join_expected, quote_for_message};
use std::fmt;

/// Error raised while turning a grammar into a parser
#[derive(Debug)]
pub enum CompileError {
    /// The grammar DSL itself did not parse
    Syntax(SyntaxError),

    /// The grammar parsed but violates a well-formedness rule; carries every
    /// problem the failing pass recorded
    Semantic { problems: Vec<Problem> },

    /// The requested option combination is invalid
    Config { message: String },

    /// A plugin could not be applied
    Plugin { message: String },
}

impl CompileError {
    /// The location of the first problem, when one is known
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Syntax(err) => Some(&err.location),
            Self::Semantic { problems } => problems.first().and_then(|p| p.location.as_ref()),
            Self::Config { .. } | Self::Plugin { .. } => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Syntax(err) => write!(f, "{}", err),
            Self::Semantic { problems } => {
                for (i, problem) in problems.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    match &problem.location {
                        Some(location) => {
                            write!(f, "{}: {}", location, problem.message)?;
                        }
                        None => write!(f, "{}", problem.message)?,
                    }
                }
                Ok(())
            }
            Self::Config { message } => write!(f, "{}", message),
            Self::Plugin { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<SyntaxError> for CompileError {
    fn from(err: SyntaxError) -> Self {
        Self::Syntax(err)
    }
}

/// A failure to parse the grammar DSL
///
/// Carries the furthest position the parser reached, the deduplicated set of
/// descriptions it would have accepted there, and what it found instead.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    location: Location,
    expected: Vec<String>,
    found: Option<String>,
    tip: Option<String>,
}

impl SyntaxError {
    pub(crate) fn new(
        location: Location,
        expected: Vec<String>,
        found: Option<String>,
        tip: Option<String>,
    ) -> Self {
        Self {
            location,
            expected,
            found,
            tip,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Sorted, deduplicated expected descriptions at the failure position
    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    /// The text found at the failure position, `None` at end of input
    pub fn found(&self) -> Option<&str> {
        self.found.as_deref()
    }

    /// An optional hint on how to fix the grammar
    pub fn tip(&self) -> Option<&str> {
        self.tip.as_deref()
    }

    /// The standard `Expected … but … found.` message
    pub fn message(&self) -> String {
        let found = match &self.found {
            Some(found) => format!("{} found", quote_for_message(found)),
            None => "end of input found".to_string(),
        };
        format!("Expected {} but {}.", join_expected(&self.expected), found)
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message())
    }
}

impl std::error::Error for SyntaxError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Pos;

    fn loc() -> Location {
        Location::at(None, Pos::start())
    }

    #[test]
    fn syntax_error_message() {
        let err = SyntaxError::new(
            loc(),
            vec!["\"=\"".to_string(), "identifier".to_string()],
            Some(";".to_string()),
            None,
        );
        assert_eq!(err.message(), "Expected \"=\" or identifier but \";\" found.");
    }

    #[test]
    fn syntax_error_message_at_eof() {
        let err = SyntaxError::new(loc(), vec!["expression".to_string()], None, None);
        assert_eq!(err.message(), "Expected expression but end of input found.");
    }
}
