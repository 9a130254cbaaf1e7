//! Termination checks and match inference.
//!
//! Both checks rest on nullability: whether an expression can succeed
//! without consuming input. Nullability of mutually recursive rules is
//! computed as a fixed point, starting from "consumes input" and flipping
//! rules until the map stabilizes.

use crate::compiler::ast::{BoundaryKind, Expression, ExpressionKind, Grammar, Rule};
use crate::compiler::session::{MatchResult, Session, Severity};
use crate::compiler::visitor::{walk_expression, Visitor};
use crate::compiler::Options;
use std::collections::HashMap;

/// Compute per-rule nullability as a fixed point
pub fn compute_nullability(grammar: &Grammar) -> HashMap<String, bool> {
    let mut nullable: HashMap<String, bool> =
        grammar.rules.iter().map(|r| (r.name.clone(), false)).collect();

    loop {
        let mut changed = false;
        for rule in &grammar.rules {
            if !nullable[&rule.name] && expression_nullable(&rule.expression, &nullable) {
                nullable.insert(rule.name.clone(), true);
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}

/// Can this expression succeed without consuming any input?
pub fn expression_nullable(expression: &Expression, rules: &HashMap<String, bool>) -> bool {
    match &expression.kind {
        ExpressionKind::Literal { value, .. } => value.is_empty(),
        ExpressionKind::Class { .. } | ExpressionKind::Any { .. } => false,
        ExpressionKind::RuleRef { name } => rules.get(name).copied().unwrap_or(false),
        // Nothing is known about imported rules
        ExpressionKind::LibraryRef { .. } => false,
        ExpressionKind::Sequence { elements } => {
            elements.iter().all(|e| expression_nullable(e, rules))
        }
        ExpressionKind::Choice { alternatives } => {
            alternatives.iter().any(|e| expression_nullable(e, rules))
        }
        ExpressionKind::Optional(_) | ExpressionKind::ZeroOrMore(_) => true,
        ExpressionKind::OneOrMore(inner) => expression_nullable(inner, rules),
        ExpressionKind::Repeated { min, inner, .. } => match min.constant() {
            Some(Some(0)) | None => true,
            Some(Some(_)) => expression_nullable(inner, rules),
            Some(None) => true,
        },
        ExpressionKind::SimpleAnd(_)
        | ExpressionKind::SimpleNot(_)
        | ExpressionKind::SemanticAnd(_)
        | ExpressionKind::SemanticNot(_) => true,
        ExpressionKind::Group(inner)
        | ExpressionKind::Text(inner)
        | ExpressionKind::Labeled { inner, .. }
        | ExpressionKind::Action { inner, .. }
        | ExpressionKind::Named { inner, .. } => expression_nullable(inner, rules),
    }
}

pub(super) fn report_infinite_loops(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-infinite-loops", Severity::Error);
    let nullable = compute_nullability(grammar);

    struct Check<'a> {
        nullable: &'a HashMap<String, bool>,
        problems: Vec<Expression>,
    }

    impl Visitor for Check<'_> {
        fn visit_expression(&mut self, expression: &Expression) {
            match &expression.kind {
                ExpressionKind::ZeroOrMore(inner) | ExpressionKind::OneOrMore(inner) => {
                    if expression_nullable(inner, self.nullable) {
                        self.problems.push(expression.clone());
                    }
                }
                ExpressionKind::Repeated { min, max, inner, .. } => {
                    let bounded_below = matches!(min.kind, BoundaryKind::Constant(Some(n)) if n > 0);
                    let unbounded_above = matches!(max.kind, BoundaryKind::Constant(None));
                    if expression_nullable(inner, self.nullable)
                        && (!bounded_below || unbounded_above)
                    {
                        self.problems.push(expression.clone());
                    }
                }
                _ => {}
            }
            walk_expression(self, expression);
        }
    }

    let mut check = Check {
        nullable: &nullable,
        problems: vec![],
    };
    check.visit_grammar(grammar);

    for expression in check.problems {
        session.report(
            severity,
            "Possible infinite loop: the repeated expression may match without consuming input",
            Some(expression.location),
            vec![],
        );
    }

    session.nullability = nullable;
}

pub(super) fn report_infinite_recursion(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-infinite-recursion", Severity::Error);
    let nullable = compute_nullability(grammar);

    let rules: HashMap<&str, &Rule> = grammar.rules.iter().map(|r| (r.name.as_str(), r)).collect();

    struct Check<'a> {
        rules: &'a HashMap<&'a str, &'a Rule>,
        nullable: &'a HashMap<String, bool>,
        stack: Vec<&'a str>,
        problems: Vec<(String, Expression)>,
    }

    impl<'a> Check<'a> {
        fn walk_rule(&mut self, rule: &'a Rule) {
            self.stack.push(&rule.name);
            self.walk_expr(&rule.expression);
            self.stack.pop();
        }

        /// Walk only positions reachable before any input is consumed
        fn walk_expr(&mut self, expression: &'a Expression) {
            match &expression.kind {
                ExpressionKind::RuleRef { name } => {
                    // Only report cycles closing back on the root, so each
                    // left-recursive rule is reported exactly once
                    if self.stack.first() == Some(&name.as_str()) {
                        let mut path: Vec<&str> = self.stack.clone();
                        path.push(name);
                        self.problems
                            .push((path.join(" -> "), expression.clone()));
                    } else if !self.stack.contains(&name.as_str()) {
                        if let Some(rule) = self.rules.get(name.as_str()) {
                            self.walk_rule(rule);
                        }
                    }
                }
                ExpressionKind::Sequence { elements } => {
                    for element in elements {
                        self.walk_expr(element);
                        if !expression_nullable(element, self.nullable) {
                            break;
                        }
                    }
                }
                ExpressionKind::Choice { alternatives } => {
                    for alternative in alternatives {
                        self.walk_expr(alternative);
                    }
                }
                ExpressionKind::Repeated {
                    delimiter, inner, ..
                } => {
                    self.walk_expr(inner);
                    if let Some(delimiter) = delimiter {
                        if expression_nullable(inner, self.nullable) {
                            self.walk_expr(delimiter);
                        }
                    }
                }
                ExpressionKind::Optional(inner)
                | ExpressionKind::ZeroOrMore(inner)
                | ExpressionKind::OneOrMore(inner)
                | ExpressionKind::Group(inner)
                | ExpressionKind::Text(inner)
                | ExpressionKind::SimpleAnd(inner)
                | ExpressionKind::SimpleNot(inner) => self.walk_expr(inner),
                ExpressionKind::Labeled { inner, .. }
                | ExpressionKind::Action { inner, .. }
                | ExpressionKind::Named { inner, .. } => self.walk_expr(inner),
                ExpressionKind::Literal { .. }
                | ExpressionKind::Class { .. }
                | ExpressionKind::Any { .. }
                | ExpressionKind::LibraryRef { .. }
                | ExpressionKind::SemanticAnd(_)
                | ExpressionKind::SemanticNot(_) => {}
            }
        }
    }

    let mut problems = vec![];
    for rule in &grammar.rules {
        let mut check = Check {
            rules: &rules,
            nullable: &nullable,
            stack: vec![],
            problems: vec![],
        };
        check.walk_rule(rule);
        problems.extend(check.problems);
    }

    for (path, expression) in problems {
        session.report(
            severity,
            format!("Possible infinite recursion: {}", path),
            Some(expression.location),
            vec![],
        );
    }
}

/// Annotate the session with per-rule nullability and match results; the
/// bytecode generator consults both when deciding where loops need
/// zero-width guards
pub(super) fn inference_match_result(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    session.nullability = compute_nullability(grammar);
    session.match_results = compute_match_results(grammar);
}

fn compute_match_results(grammar: &Grammar) -> HashMap<String, MatchResult> {
    let mut results: HashMap<String, MatchResult> = grammar
        .rules
        .iter()
        .map(|r| (r.name.clone(), MatchResult::Sometimes))
        .collect();

    // The lattice has three points, so each rule changes at most twice
    for _ in 0..=grammar.rules.len() * 2 {
        let mut changed = false;
        for rule in &grammar.rules {
            let result = match_result_of(&rule.expression, &results);
            if results[&rule.name] != result {
                results.insert(rule.name.clone(), result);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    results
}

/// Statically inferred match behavior of one expression
pub fn match_result_of(
    expression: &Expression,
    rules: &HashMap<String, MatchResult>,
) -> MatchResult {
    use MatchResult::*;

    match &expression.kind {
        ExpressionKind::Literal { value, .. } => {
            if value.is_empty() {
                Always
            } else {
                Sometimes
            }
        }
        ExpressionKind::Class { parts, inverted, .. } => {
            if parts.is_empty() && !inverted {
                Never
            } else {
                Sometimes
            }
        }
        ExpressionKind::Any { .. } => Sometimes,
        ExpressionKind::RuleRef { name } => rules.get(name).copied().unwrap_or(Sometimes),
        ExpressionKind::LibraryRef { .. } => Sometimes,
        ExpressionKind::Sequence { elements } => {
            let mut all_always = true;
            for element in elements {
                match match_result_of(element, rules) {
                    Never => return Never,
                    Sometimes => all_always = false,
                    Always => {}
                }
            }
            if all_always {
                Always
            } else {
                Sometimes
            }
        }
        ExpressionKind::Choice { alternatives } => {
            let mut all_never = true;
            for alternative in alternatives {
                match match_result_of(alternative, rules) {
                    Always => return Always,
                    Sometimes => all_never = false,
                    Never => {}
                }
            }
            if all_never {
                Never
            } else {
                Sometimes
            }
        }
        ExpressionKind::Optional(_) | ExpressionKind::ZeroOrMore(_) => Always,
        ExpressionKind::OneOrMore(inner) => match_result_of(inner, rules),
        ExpressionKind::Repeated { min, inner, .. } => match min.constant() {
            Some(Some(0)) => Always,
            Some(Some(_)) => match match_result_of(inner, rules) {
                Never => Never,
                _ => Sometimes,
            },
            _ => Sometimes,
        },
        ExpressionKind::SimpleAnd(inner) => match_result_of(inner, rules),
        ExpressionKind::SimpleNot(inner) => match match_result_of(inner, rules) {
            Always => Never,
            Never => Always,
            Sometimes => Sometimes,
        },
        ExpressionKind::SemanticAnd(_) | ExpressionKind::SemanticNot(_) => Sometimes,
        ExpressionKind::Group(inner)
        | ExpressionKind::Text(inner)
        | ExpressionKind::Labeled { inner, .. }
        | ExpressionKind::Action { inner, .. }
        | ExpressionKind::Named { inner, .. } => match_result_of(inner, rules),
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
    fn nullability_fixed_point() {
        let grammar = parse_grammar("a = b c\nb = 'x'?\nc = b / 'y'", None).unwrap();
        let nullable = compute_nullability(&grammar);
        assert!(nullable["b"]);
        assert!(nullable["c"]);
        assert!(nullable["a"]);

        let grammar = parse_grammar("a = b b\nb = 'x'", None).unwrap();
        let nullable = compute_nullability(&grammar);
        assert!(!nullable["a"]);
    }

    #[test]
    fn empty_string_star_is_an_infinite_loop() {
        let problems = errors(report_infinite_loops, "a = ''*");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("infinite loop"));
    }

    #[test]
    fn loops_through_nullable_rules_are_detected() {
        let problems = errors(report_infinite_loops, "a = b+\nb = 'x'?");
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn consuming_repetition_is_fine() {
        assert!(errors(report_infinite_loops, "a = 'x'* 'y'+").is_empty());
    }

    #[test]
    fn unbounded_repetition_of_nullable_expression_is_rejected() {
        let problems = errors(report_infinite_loops, "a = ('x'?)|2..|");
        assert_eq!(problems.len(), 1);
        // A bounded repetition of the same expression terminates
        assert!(errors(report_infinite_loops, "a = ('x'?)|2..4|").is_empty());
    }

    #[test]
    fn direct_left_recursion_is_reported() {
        let problems = errors(report_infinite_recursion, "a = a 'x' / 'x'");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("a -> a"));
    }

    #[test]
    fn indirect_left_recursion_through_nullable_prefix() {
        let problems = errors(report_infinite_recursion, "a = b 'x'\nb = 'y'? a");
        assert!(problems.iter().any(|p| p.contains("a -> b -> a")));
    }

    #[test]
    fn consumed_prefix_breaks_recursion() {
        assert!(errors(report_infinite_recursion, "a = 'y' a / 'x'").is_empty());
    }

    #[test]
    fn match_results() {
        let grammar = parse_grammar("a = 'x'?\nb = 'x'\nc = []\nd = !c", None).unwrap();
        let results = compute_match_results(&grammar);
        assert_eq!(results["a"], MatchResult::Always);
        assert_eq!(results["b"], MatchResult::Sometimes);
        assert_eq!(results["c"], MatchResult::Never);
        assert_eq!(results["d"], MatchResult::Always);
    }

    #[test]
    fn inference_annotates_the_session() {
        let mut grammar = parse_grammar("a = b*\nb = 'x'?", None).unwrap();
        let mut session = Session::new(Default::default(), None, None);
        inference_match_result(&mut grammar, &Options::default(), &mut session);

        assert_eq!(session.nullability["b"], true);
        assert_eq!(session.match_results["a"], MatchResult::Always);
        assert_eq!(session.match_results["b"], MatchResult::Always);
    }
}
