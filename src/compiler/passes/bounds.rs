//! Start-rule validation, reachability, and repetition boundary sanity.

use crate::compiler::ast::{BoundaryKind, Expression, ExpressionKind, Grammar, Location};
use crate::compiler::session::{Session, Severity};
use crate::compiler::visitor::{walk_expression, Visitor};
use crate::compiler::Options;
use std::collections::{HashMap, HashSet};

/// Every allowed start rule must name a declared rule (`*` was expanded
/// before the passes ran)
pub(super) fn check_allowed_start_rules(
    grammar: &mut Grammar,
    options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("check-allowed-start-rules", Severity::Error);
    let declared: HashSet<&str> = grammar.rules.iter().map(|r| r.name.as_str()).collect();

    let mut problems = vec![];
    for name in &options.allowed_start_rules {
        if name != "*" && !declared.contains(name.as_str()) {
            problems.push(format!("Start rule \"{}\" is not defined", name));
        }
    }

    for message in problems {
        session.report(severity, message, None, vec![]);
    }
}

/// Rules unreachable from the allowed start set are almost always leftovers
pub(super) fn report_unused_rules(
    grammar: &mut Grammar,
    options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-unused-rules", Severity::Warning);

    // References per rule, gathered in one sweep
    struct Refs {
        names: Vec<String>,
    }

    impl Visitor for Refs {
        fn visit_expression(&mut self, expression: &Expression) {
            if let ExpressionKind::RuleRef { name } = &expression.kind {
                self.names.push(name.clone());
            }
            walk_expression(self, expression);
        }
    }

    let mut references: HashMap<&str, Vec<String>> = HashMap::new();
    for rule in &grammar.rules {
        let mut refs = Refs { names: vec![] };
        refs.visit_rule(rule);
        references.insert(&rule.name, refs.names);
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = options
        .allowed_start_rules
        .iter()
        .map(String::as_str)
        .filter(|name| references.contains_key(name))
        .collect();

    while let Some(name) = queue.pop() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(refs) = references.get(name) {
            for referenced in refs {
                if references.contains_key(referenced.as_str()) {
                    queue.push(referenced);
                }
            }
        }
    }

    let mut problems = vec![];
    for rule in &grammar.rules {
        if !reachable.contains(rule.name.as_str()) {
            problems.push((
                format!(
                    "Rule \"{}\" is not referenced from any start rule",
                    rule.name
                ),
                rule.name_location.clone(),
            ));
        }
    }

    for (message, location) in problems {
        session.report(severity, message, Some(location), vec![]);
    }
}

/// Constant repetition boundaries must describe a non-empty range, and
/// variable boundaries must name a label visible at the repetition
pub(super) fn validate_repetition_boundaries(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("validate-repetition-boundaries", Severity::Error);
    let mut problems = vec![];

    for rule in &grammar.rules {
        let mut scope = Vec::new();
        check_boundaries(&rule.expression, &mut scope, &mut problems);
    }

    for (message, location) in problems {
        session.report(severity, message, Some(location), vec![]);
    }
}

/// Walk with the labels visible at each point, mirroring the label scoping
/// the bytecode generator uses
fn check_boundaries(
    expression: &Expression,
    scope: &mut Vec<String>,
    problems: &mut Vec<(String, Location)>,
) {
    match &expression.kind {
        ExpressionKind::Repeated {
            min,
            max,
            delimiter,
            inner,
        } => {
            if let BoundaryKind::Constant(Some(0)) = max.kind {
                problems.push((
                    "The maximum repetition count must be greater than zero".to_string(),
                    max.location.clone(),
                ));
            } else if let (BoundaryKind::Constant(Some(low)), BoundaryKind::Constant(Some(high))) =
                (&min.kind, &max.kind)
            {
                if low > high {
                    problems.push((
                        "The minimum repetition count exceeds the maximum".to_string(),
                        min.location.clone(),
                    ));
                }
            }

            for boundary in [min, max] {
                if let BoundaryKind::Variable(name) = &boundary.kind {
                    if !scope.contains(name) {
                        problems.push((
                            format!(
                                "Repetition boundary \"{}\" does not name a preceding label",
                                name
                            ),
                            boundary.location.clone(),
                        ));
                    }
                }
            }

            let mut inner_scope = scope.clone();
            check_boundaries(inner, &mut inner_scope, problems);
            if let Some(delimiter) = delimiter {
                let mut delimiter_scope = scope.clone();
                check_boundaries(delimiter, &mut delimiter_scope, problems);
            }
        }

        ExpressionKind::Labeled { label, inner, .. } => {
            check_boundaries(inner, scope, problems);
            if let Some(name) = label {
                scope.push(name.clone());
            }
        }

        ExpressionKind::Sequence { elements } => {
            for element in elements {
                check_boundaries(element, scope, problems);
            }
        }
        ExpressionKind::Action { inner, .. } => check_boundaries(inner, scope, problems),

        ExpressionKind::Choice { alternatives } => {
            for alternative in alternatives {
                let mut inner_scope = scope.clone();
                check_boundaries(alternative, &mut inner_scope, problems);
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
            check_boundaries(inner, &mut inner_scope, problems);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_grammar;

    fn session_after(
        pass: fn(&mut Grammar, &Options, &mut Session),
        text: &str,
        options: &Options,
    ) -> Session {
        let mut grammar = parse_grammar(text, None).unwrap();
        let mut session = Session::new(Default::default(), None, None);
        pass(&mut grammar, options, &mut session);
        session
    }

    fn options_with_start(rules: &[&str]) -> Options {
        Options {
            allowed_start_rules: rules.iter().map(|s| s.to_string()).collect(),
            ..Options::default()
        }
    }

    #[test]
    fn unknown_start_rule_is_rejected() {
        let session = session_after(
            check_allowed_start_rules,
            "a = 'x'",
            &options_with_start(&["nope"]),
        );
        assert_eq!(
            session.problems()[0].message,
            "Start rule \"nope\" is not defined"
        );
    }

    #[test]
    fn unused_rules_warn() {
        let session = session_after(
            report_unused_rules,
            "a = b\nb = 'x'\norphan = 'y'",
            &options_with_start(&["a"]),
        );
        let warnings: Vec<_> = session
            .problems()
            .iter()
            .filter(|p| p.severity == Severity::Warning)
            .map(|p| p.message.clone())
            .collect();
        assert_eq!(
            warnings,
            vec!["Rule \"orphan\" is not referenced from any start rule"]
        );
    }

    #[test]
    fn all_rules_reachable_through_chain() {
        let session = session_after(
            report_unused_rules,
            "a = b\nb = c 'x'\nc = 'y'",
            &options_with_start(&["a"]),
        );
        assert!(session.problems().is_empty());
    }

    #[test]
    fn zero_maximum_is_rejected() {
        let session = session_after(
            validate_repetition_boundaries,
            "a = 'x'|0|",
            &Options::default(),
        );
        assert_eq!(
            session.problems()[0].message,
            "The maximum repetition count must be greater than zero"
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let session = session_after(
            validate_repetition_boundaries,
            "a = 'x'|3..2|",
            &Options::default(),
        );
        assert_eq!(
            session.problems()[0].message,
            "The minimum repetition count exceeds the maximum"
        );
    }

    #[test]
    fn sane_boundaries_pass() {
        let session = session_after(
            validate_repetition_boundaries,
            "a = 'x'|2..3| 'y'|4| 'z'|..|",
            &Options::default(),
        );
        assert!(session.problems().is_empty());
    }

    #[test]
    fn variable_boundary_must_be_a_visible_label() {
        let session = session_after(
            validate_repetition_boundaries,
            "a = n:'3' 'x'|n| 'y'|m|",
            &Options::default(),
        );
        assert_eq!(
            session.problems()[0].message,
            "Repetition boundary \"m\" does not name a preceding label"
        );
        assert_eq!(session.problems().len(), 1);
    }
}
