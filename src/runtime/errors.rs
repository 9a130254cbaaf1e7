//! Errors raised while parsing input with a compiled parser.

use crate::compiler::ast::Location;
use crate::compiler::utils::{join_expected, quote_for_message};
use std::fmt;

/// Error returned by [`Parser::parse`](super::Parser::parse)
#[derive(Debug, Clone)]
pub enum ParseError {
    /// The input did not match; carries the furthest-failure record
    Failure(ParseFailure),

    /// The requested start rule is unknown or not allowed
    BadStartRule { name: String },

    /// A repetition boundary read from a label did not hold a number
    Boundary { message: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Failure(failure) => write!(f, "{}", failure),
            Self::BadStartRule { name } => {
                write!(f, "Can't start parsing from rule \"{}\"", name)
            }
            Self::Boundary { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ParseError {}

/// A syntax error at the furthest position the parse reached
#[derive(Debug, Clone)]
pub struct ParseFailure {
    location: Location,
    expected: Vec<String>,
    found: Option<String>,
}

/// One input record the formatter can render excerpts from
#[derive(Debug, Clone, Copy)]
pub struct SourceText<'a> {
    pub source: Option<&'a str>,
    pub text: &'a str,
}

impl ParseFailure {
    pub(crate) fn new(location: Location, expected: Vec<String>, found: Option<String>) -> Self {
        Self {
            location,
            expected,
            found,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Sorted, deduplicated descriptions of what could have matched
    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    /// The text at the failure position, `None` at end of input
    pub fn found(&self) -> Option<&str> {
        self.found.as_deref()
    }

    /// The standard `Expected … but … found.` message
    pub fn message(&self) -> String {
        let found = match &self.found {
            Some(found) => format!("{} found", quote_for_message(found)),
            None => "end of input found".to_string(),
        };
        format!("Expected {} but {}.", join_expected(&self.expected), found)
    }

    /// Render the message with a source excerpt and a caret under the
    /// failure position, when the matching source text is provided
    pub fn format(&self, sources: &[SourceText]) -> String {
        let header = format!(
            "Error: {}\n --> {}:{}:{}",
            self.message(),
            self.location.source.as_deref().unwrap_or("<input>"),
            self.location.start.line,
            self.location.start.column,
        );

        let text = sources
            .iter()
            .find(|s| s.source == self.location.source.as_deref())
            .map(|s| s.text);

        match text {
            Some(text) => {
                let line_number = self.location.start.line;
                let line = text.lines().nth(line_number - 1).unwrap_or("");
                let number = line_number.to_string();
                let caret_width = if self.location.end.offset > self.location.start.offset {
                    self.location
                        .end
                        .column
                        .saturating_sub(self.location.start.column)
                } else {
                    1
                }
                .max(1);

                format!(
                    "{header}\n{pad} |\n{number} | {line}\n{pad} | {caret_pad}{carets}",
                    header = header,
                    pad = " ".repeat(number.len()),
                    number = number,
                    line = line,
                    caret_pad = " ".repeat(self.location.start.column.saturating_sub(1)),
                    carets = "^".repeat(caret_width),
                )
            }
            None => header,
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message())
    }
}

impl std::error::Error for ParseFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Pos;

    fn failure() -> ParseFailure {
        ParseFailure::new(
            Location::new(
                Some("test.txt".into()),
                Pos::new(4, 1, 5),
                Pos::new(5, 1, 6),
            ),
            vec!["\"b\"".to_string(), "integer".to_string()],
            Some("c".to_string()),
        )
    }

    #[test]
    fn message_shape() {
        assert_eq!(
            failure().message(),
            "Expected \"b\" or integer but \"c\" found."
        );
    }

    #[test]
    fn format_renders_an_excerpt() {
        let formatted = failure().format(&[SourceText {
            source: Some("test.txt"),
            text: "a + cde",
        }]);
        assert_eq!(
            formatted,
            "Error: Expected \"b\" or integer but \"c\" found.\n --> test.txt:1:5\n  |\n1 | a + cde\n  |     ^"
        );
    }

    #[test]
    fn format_without_matching_source() {
        let formatted = failure().format(&[]);
        assert!(formatted.ends_with("--> test.txt:1:5"));
    }
}
