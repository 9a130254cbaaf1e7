use super::session::{Problem, Severity};

/// Format a diagnostic in a human-readable way, with a source excerpt and
/// a caret line when the matching source text is provided
///
/// `sources` pairs each grammar source tag with its text, the way the
/// fragments were handed to the compiler.
pub fn format_problem(problem: &Problem, sources: &[(Option<&str>, &str)]) -> String {
    let severity = match problem.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    };

    let mut out = format!("{}: {}", severity, problem.message);

    if let Some(location) = &problem.location {
        out.push_str(&format!(
            "\n --> {}:{}:{}",
            location.source.as_deref().unwrap_or("<grammar>"),
            location.start.line,
            location.start.column,
        ));

        let text = sources
            .iter()
            .find(|(source, _)| *source == location.source.as_deref())
            .map(|(_, text)| *text);

        if let Some(text) = text {
            let line_number = location.start.line;
            let line = text.lines().nth(line_number - 1).unwrap_or("");
            let number = line_number.to_string();
            let width = if location.end.line == location.start.line {
                location.end.column.saturating_sub(location.start.column)
            } else {
                1
            }
            .max(1);

            out.push_str(&format!(
                "\n{pad} |\n{number} | {line}\n{pad} | {caret_pad}{carets}",
                pad = " ".repeat(number.len()),
                number = number,
                line = line,
                caret_pad = " ".repeat(location.start.column.saturating_sub(1)),
                carets = "^".repeat(width),
            ));
        }
    }

    for note in &problem.notes {
        match &note.location {
            Some(location) => out.push_str(&format!("\nnote: {} ({})", note.message, location)),
            None => out.push_str(&format!("\nnote: {}", note.message)),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{Location, Pos};
    use crate::compiler::session::Note;

    #[test]
    fn renders_severity_excerpt_and_notes() {
        let problem = Problem {
            severity: Severity::Error,
            message: "Rule \"b\" is already defined".to_string(),
            location: Some(Location::new(
                Some("g.peggy".into()),
                Pos::new(10, 2, 1),
                Pos::new(11, 2, 2),
            )),
            notes: vec![Note {
                message: "first defined here".to_string(),
                location: None,
            }],
        };

        let formatted = format_problem(&problem, &[(Some("g.peggy"), "a = 'x'\nb = 'y'")]);
        assert_eq!(
            formatted,
            "error: Rule \"b\" is already defined\n --> g.peggy:2:1\n  |\n2 | b = 'y'\n  | ^\nnote: first defined here"
        );
    }
}
