//! Reference checks: every rule and import binding that is used must be
//! declared, and nothing may be declared twice.

use crate::compiler::ast::{Expression, ExpressionKind, Grammar, Location};
use crate::compiler::session::{Note, Session, Severity};
use crate::compiler::visitor::{walk_expression, Visitor};
use crate::compiler::Options;
use std::collections::{HashMap, HashSet};

pub(super) fn report_undefined_rules(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-undefined-rules", Severity::Error);

    let declared: HashSet<&str> = grammar.rules.iter().map(|r| r.name.as_str()).collect();
    let imported: HashSet<&str> = grammar
        .imports
        .iter()
        .flat_map(|import| import.bindings.iter().map(|b| b.name.as_str()))
        .collect();

    struct Check<'a> {
        declared: &'a HashSet<&'a str>,
        imported: &'a HashSet<&'a str>,
        problems: Vec<(String, Location)>,
    }

    impl Visitor for Check<'_> {
        fn visit_expression(&mut self, expression: &Expression) {
            match &expression.kind {
                ExpressionKind::RuleRef { name } => {
                    if !self.declared.contains(name.as_str()) {
                        self.problems.push((
                            format!("Rule \"{}\" is not defined", name),
                            expression.location.clone(),
                        ));
                    }
                }
                ExpressionKind::LibraryRef { library, .. } => {
                    if !self.imported.contains(library.as_str()) {
                        self.problems.push((
                            format!("Import binding \"{}\" is not defined", library),
                            expression.location.clone(),
                        ));
                    }
                }
                _ => walk_expression(self, expression),
            }
        }
    }

    let mut check = Check {
        declared: &declared,
        imported: &imported,
        problems: vec![],
    };
    check.visit_grammar(grammar);

    for (message, location) in check.problems {
        session.report(severity, message, Some(location), vec![]);
    }
}

pub(super) fn report_duplicate_rules(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-duplicate-rules", Severity::Error);

    let mut seen: HashMap<&str, &Location> = HashMap::new();
    let mut problems = vec![];

    for rule in &grammar.rules {
        match seen.get(rule.name.as_str()) {
            Some(first) => {
                problems.push((
                    format!("Rule \"{}\" is already defined", rule.name),
                    rule.name_location.clone(),
                    Note {
                        message: "first defined here".to_string(),
                        location: Some((*first).clone()),
                    },
                ));
            }
            None => {
                seen.insert(rule.name.as_str(), &rule.name_location);
            }
        }
    }

    for (message, location, note) in problems {
        session.report(severity, message, Some(location), vec![note]);
    }
}

pub(super) fn report_duplicate_imports(
    grammar: &mut Grammar,
    _options: &Options,
    session: &mut Session,
) {
    let severity = session.severity_for("report-duplicate-imports", Severity::Error);

    let mut seen: HashMap<&str, &Location> = HashMap::new();
    let mut problems = vec![];

    for import in &grammar.imports {
        for binding in &import.bindings {
            match seen.get(binding.name.as_str()) {
                Some(first) => {
                    problems.push((
                        format!("Import binding \"{}\" is already defined", binding.name),
                        binding.location.clone(),
                        Note {
                            message: "first bound here".to_string(),
                            location: Some((*first).clone()),
                        },
                    ));
                }
                None => {
                    seen.insert(binding.name.as_str(), &binding.location);
                }
            }
        }
    }

    for (message, location, note) in problems {
        session.report(severity, message, Some(location), vec![note]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_grammar;
    use crate::compiler::session::Severity;

    fn run(pass: fn(&mut Grammar, &Options, &mut Session), text: &str) -> Vec<String> {
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
    fn undefined_rule_is_reported() {
        let problems = run(report_undefined_rules, "start = missing");
        assert_eq!(problems, vec!["Rule \"missing\" is not defined"]);
    }

    #[test]
    fn defined_rules_pass() {
        assert!(run(report_undefined_rules, "start = other\nother = 'x'").is_empty());
    }

    #[test]
    fn library_reference_requires_an_import() {
        let problems = run(report_undefined_rules, "start = lib.rule");
        assert_eq!(problems, vec!["Import binding \"lib\" is not defined"]);

        assert!(run(
            report_undefined_rules,
            "import lib from \"./lib.js\";\nstart = lib.rule"
        )
        .is_empty());
    }

    #[test]
    fn duplicate_rules_are_reported() {
        let problems = run(report_duplicate_rules, "a = 'x'\nb = 'y'\na = 'z'");
        assert_eq!(problems, vec!["Rule \"a\" is already defined"]);
    }

    #[test]
    fn duplicate_import_bindings_are_reported() {
        let problems = run(
            report_duplicate_imports,
            "import a from \"./a.js\";\nimport { x as a } from \"./b.js\";\nstart = a.r",
        );
        assert_eq!(problems, vec!["Import binding \"a\" is already defined"]);
    }
}
