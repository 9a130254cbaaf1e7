//! Label hygiene: no duplicate labels in one scope, no picks mixed with
//! action blocks, no reserved words as names.

use crate::compiler::ast::{Expression, ExpressionKind, Grammar, Location};
use crate::compiler::session::{Note, Session, Severity};
use crate::compiler::utils::is_reserved_word;
use crate::compiler::visitor::{walk_expression, Visitor};
use crate::compiler::Options;
use std::collections::HashMap;

/// `@` picks choose a sequence's value; an action over the same sequence
/// would silently override them, so the combination is rejected
pub(super) fn report_incorrect_plucks(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-incorrect-plucks", Severity::Error);

    struct Check {
        problems: Vec<Location>,
    }

    impl Visitor for Check {
        fn visit_expression(&mut self, expression: &Expression) {
            if let ExpressionKind::Action { inner, .. } = &expression.kind {
                let elements: &[Expression] = match &inner.kind {
                    ExpressionKind::Sequence { elements } => elements,
                    _ => std::slice::from_ref(inner.as_ref()),
                };
                for element in elements {
                    if let ExpressionKind::Labeled {
                        pick: true,
                        label_location,
                        ..
                    } = &element.kind
                    {
                        self.problems.push(label_location.clone());
                    }
                }
            }
            walk_expression(self, expression);
        }
    }

    let mut check = Check { problems: vec![] };
    check.visit_grammar(grammar);

    for location in check.problems {
        session.report(
            severity,
            "\"@\" cannot be used on a sequence that has an action block",
            Some(location),
            vec![],
        );
    }
}

/// Scope = enclosing sequence (shared with the action applied to it); any
/// other composite opens a fresh scope
pub(super) fn report_duplicate_labels(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-duplicate-labels", Severity::Error);
    let mut problems = vec![];

    for rule in &grammar.rules {
        let mut scope = HashMap::new();
        check_expression(&rule.expression, &mut scope, &mut problems);
    }

    for (name, location, first) in problems {
        session.report(
            severity,
            format!("Label \"{}\" is already defined in this scope", name),
            Some(location),
            vec![Note {
                message: "first defined here".to_string(),
                location: Some(first),
            }],
        );
    }
}

fn check_expression(
    expression: &Expression,
    scope: &mut HashMap<String, Location>,
    problems: &mut Vec<(String, Location, Location)>,
) {
    match &expression.kind {
        ExpressionKind::Labeled {
            label,
            label_location,
            inner,
            ..
        } => {
            if let Some(name) = label {
                match scope.get(name) {
                    Some(first) => {
                        problems.push((name.clone(), label_location.clone(), first.clone()));
                    }
                    None => {
                        scope.insert(name.clone(), label_location.clone());
                    }
                }
            }
            check_expression(inner, scope, problems);
        }

        // Sequences and their actions share the surrounding scope
        ExpressionKind::Sequence { elements } => {
            for element in elements {
                check_expression(element, scope, problems);
            }
        }
        ExpressionKind::Action { inner, .. } => check_expression(inner, scope, problems),

        // Alternatives are independent of each other
        ExpressionKind::Choice { alternatives } => {
            for alternative in alternatives {
                let mut inner_scope = scope.clone();
                check_expression(alternative, &mut inner_scope, problems);
            }
        }

        ExpressionKind::Repeated {
            delimiter, inner, ..
        } => {
            let mut inner_scope = scope.clone();
            check_expression(inner, &mut inner_scope, problems);
            if let Some(delimiter) = delimiter {
                let mut delimiter_scope = scope.clone();
                check_expression(delimiter, &mut delimiter_scope, problems);
            }
        }

        ExpressionKind::Optional(inner)
        | ExpressionKind::ZeroOrMore(inner)
        | ExpressionKind::OneOrMore(inner)
        | ExpressionKind::Group(inner)
        | ExpressionKind::Text(inner)
        | ExpressionKind::SimpleAnd(inner)
        | ExpressionKind::SimpleNot(inner)
        | ExpressionKind::Named { inner, .. } => {
            let mut inner_scope = scope.clone();
            check_expression(inner, &mut inner_scope, problems);
        }

        ExpressionKind::Literal { .. }
        | ExpressionKind::Class { .. }
        | ExpressionKind::Any { .. }
        | ExpressionKind::RuleRef { .. }
        | ExpressionKind::LibraryRef { .. }
        | ExpressionKind::SemanticAnd(_)
        | ExpressionKind::SemanticNot(_) => {}
    }
}

/// Flag reserved words used as rule or label names
///
/// The parser already refuses unescaped reserved words, so for parsed
/// grammars this only fires on escaped spellings; those are legal but worth
/// a warning because the emitted code must keep avoiding the plain name.
pub(super) fn report_reserved_words(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-reserved-words", Severity::Warning);
    let mut problems = vec![];

    for rule in &grammar.rules {
        if is_reserved_word(&rule.name) {
            problems.push((rule.name.clone(), rule.name_location.clone()));
        }
    }

    struct Check {
        problems: Vec<(String, Location)>,
    }

    impl Visitor for Check {
        fn visit_expression(&mut self, expression: &Expression) {
            if let ExpressionKind::Labeled {
                label: Some(name),
                label_location,
                ..
            } = &expression.kind
            {
                if is_reserved_word(name) {
                    self.problems.push((name.clone(), label_location.clone()));
                }
            }
            walk_expression(self, expression);
        }
    }

    let mut check = Check { problems: vec![] };
    check.visit_grammar(grammar);
    problems.extend(check.problems);

    for (name, location) in problems {
        session.report(
            severity,
            format!("\"{}\" is a reserved word", name),
            Some(location),
            vec![],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_grammar;

    fn errors(pass: fn(&mut Grammar, &Options, &mut Session), text: &str) -> Vec<String> {
        let mut grammar = parse_grammar(text, None).unwrap();
        let mut session = Session::new(Default::default(), None, None);
        pass(&mut grammar, &Options::default(), &mut session);
        session
            .problems()
            .iter()
            .filter(|p| p.severity == Severity::Error)
            .map(|p| p.message.clone())
            .collect()
    }

    #[test]
    fn pick_with_action_is_rejected() {
        let problems = errors(report_incorrect_plucks, "a = @'x' 'y' { return 1; }");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("action block"));
    }

    #[test]
    fn pick_without_action_is_fine() {
        assert!(errors(report_incorrect_plucks, "a = @'x' 'y'").is_empty());
    }

    #[test]
    fn duplicate_labels_in_one_sequence() {
        let problems = errors(report_duplicate_labels, "a = x:'1' y:'2' x:'3'");
        assert_eq!(
            problems,
            vec!["Label \"x\" is already defined in this scope"]
        );
    }

    #[test]
    fn groups_and_alternatives_open_fresh_scopes() {
        assert!(errors(report_duplicate_labels, "a = x:'1' (x:'2')").is_empty());
        assert!(errors(report_duplicate_labels, "a = x:'1' / x:'2'").is_empty());
    }

    #[test]
    fn action_shares_the_sequence_scope() {
        let problems = errors(
            report_duplicate_labels,
            "a = n:'1' n:'2' { return n; }",
        );
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn reserved_words_warn_on_escaped_names() {
        let mut grammar = parse_grammar("\\u0077hile = 'a'", None).unwrap();
        let mut session = Session::new(Default::default(), None, None);
        report_reserved_words(&mut grammar, &Options::default(), &mut session);

        let warnings: Vec<_> = session
            .problems()
            .iter()
            .filter(|p| p.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("reserved word"));
    }
}
