//! Uniform traversal over the grammar AST.
//!
//! Analysis passes implement [`Visitor`] and override the node kinds they
//! care about; the `walk_*` functions provide the default recursion into
//! children. Rewriting passes use [`MutVisitor`], which walks the same
//! shape with mutable access and leaves locations untouched unless the
//! pass itself changes them.

use super::ast::{Expression, ExpressionKind, Grammar, Rule};

/// Read-only traversal with default recursion
pub trait Visitor {
    fn visit_grammar(&mut self, grammar: &Grammar) {
        walk_grammar(self, grammar);
    }

    fn visit_rule(&mut self, rule: &Rule) {
        walk_rule(self, rule);
    }

    fn visit_expression(&mut self, expression: &Expression) {
        walk_expression(self, expression);
    }
}

pub fn walk_grammar<V: Visitor + ?Sized>(visitor: &mut V, grammar: &Grammar) {
    for rule in &grammar.rules {
        visitor.visit_rule(rule);
    }
}

pub fn walk_rule<V: Visitor + ?Sized>(visitor: &mut V, rule: &Rule) {
    visitor.visit_expression(&rule.expression);
}

/// Recurse into an expression's children in source order
pub fn walk_expression<V: Visitor + ?Sized>(visitor: &mut V, expression: &Expression) {
    match &expression.kind {
        ExpressionKind::Literal { .. }
        | ExpressionKind::Class { .. }
        | ExpressionKind::Any { .. }
        | ExpressionKind::RuleRef { .. }
        | ExpressionKind::LibraryRef { .. }
        | ExpressionKind::SemanticAnd(_)
        | ExpressionKind::SemanticNot(_) => {}

        ExpressionKind::Sequence { elements } => {
            for element in elements {
                visitor.visit_expression(element);
            }
        }
        ExpressionKind::Choice { alternatives } => {
            for alternative in alternatives {
                visitor.visit_expression(alternative);
            }
        }
        ExpressionKind::Repeated {
            delimiter, inner, ..
        } => {
            visitor.visit_expression(inner);
            if let Some(delimiter) = delimiter {
                visitor.visit_expression(delimiter);
            }
        }
        ExpressionKind::Optional(inner)
        | ExpressionKind::ZeroOrMore(inner)
        | ExpressionKind::OneOrMore(inner)
        | ExpressionKind::Group(inner)
        | ExpressionKind::Text(inner)
        | ExpressionKind::SimpleAnd(inner)
        | ExpressionKind::SimpleNot(inner) => visitor.visit_expression(inner),

        ExpressionKind::Labeled { inner, .. } => visitor.visit_expression(inner),
        ExpressionKind::Action { inner, .. } => visitor.visit_expression(inner),
        ExpressionKind::Named { inner, .. } => visitor.visit_expression(inner),
    }
}

/// Rewriting traversal with default recursion
pub trait MutVisitor {
    fn visit_grammar_mut(&mut self, grammar: &mut Grammar) {
        walk_grammar_mut(self, grammar);
    }

    fn visit_rule_mut(&mut self, rule: &mut Rule) {
        walk_rule_mut(self, rule);
    }

    fn visit_expression_mut(&mut self, expression: &mut Expression) {
        walk_expression_mut(self, expression);
    }
}

pub fn walk_grammar_mut<V: MutVisitor + ?Sized>(visitor: &mut V, grammar: &mut Grammar) {
    for rule in &mut grammar.rules {
        visitor.visit_rule_mut(rule);
    }
}

pub fn walk_rule_mut<V: MutVisitor + ?Sized>(visitor: &mut V, rule: &mut Rule) {
    visitor.visit_expression_mut(&mut rule.expression);
}

pub fn walk_expression_mut<V: MutVisitor + ?Sized>(visitor: &mut V, expression: &mut Expression) {
    match &mut expression.kind {
        ExpressionKind::Literal { .. }
        | ExpressionKind::Class { .. }
        | ExpressionKind::Any { .. }
        | ExpressionKind::RuleRef { .. }
        | ExpressionKind::LibraryRef { .. }
        | ExpressionKind::SemanticAnd(_)
        | ExpressionKind::SemanticNot(_) => {}

        ExpressionKind::Sequence { elements } => {
            for element in elements {
                visitor.visit_expression_mut(element);
            }
        }
        ExpressionKind::Choice { alternatives } => {
            for alternative in alternatives {
                visitor.visit_expression_mut(alternative);
            }
        }
        ExpressionKind::Repeated {
            delimiter, inner, ..
        } => {
            visitor.visit_expression_mut(inner);
            if let Some(delimiter) = delimiter {
                visitor.visit_expression_mut(delimiter);
            }
        }
        ExpressionKind::Optional(inner)
        | ExpressionKind::ZeroOrMore(inner)
        | ExpressionKind::OneOrMore(inner)
        | ExpressionKind::Group(inner)
        | ExpressionKind::Text(inner)
        | ExpressionKind::SimpleAnd(inner)
        | ExpressionKind::SimpleNot(inner) => visitor.visit_expression_mut(inner),

        ExpressionKind::Labeled { inner, .. } => visitor.visit_expression_mut(inner),
        ExpressionKind::Action { inner, .. } => visitor.visit_expression_mut(inner),
        ExpressionKind::Named { inner, .. } => visitor.visit_expression_mut(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_grammar;

    struct RefCollector {
        names: Vec<String>,
    }

    impl Visitor for RefCollector {
        fn visit_expression(&mut self, expression: &Expression) {
            if let ExpressionKind::RuleRef { name } = &expression.kind {
                self.names.push(name.clone());
            }
            walk_expression(self, expression);
        }
    }

    #[test]
    fn collects_references_in_source_order() {
        let grammar = parse_grammar(
            "start = a (b / c:'x' d)* !e\na = 'a'\nb = 'b'\nd = 'd'\ne = 'e'",
            None,
        )
        .unwrap();
        let mut collector = RefCollector { names: vec![] };
        collector.visit_grammar(&grammar);
        assert_eq!(collector.names, vec!["a", "b", "d", "e"]);
    }

    struct Upcaser;

    impl MutVisitor for Upcaser {
        fn visit_expression_mut(&mut self, expression: &mut Expression) {
            if let ExpressionKind::Literal { value, .. } = &mut expression.kind {
                *value = value.to_uppercase();
            }
            walk_expression_mut(self, expression);
        }
    }

    #[test]
    fn rewrites_preserve_locations() {
        let mut grammar = parse_grammar("start = 'ab' 'cd'", None).unwrap();
        let before = grammar.rules[0].expression.location.clone();
        Upcaser.visit_grammar_mut(&mut grammar);

        assert_eq!(grammar.rules[0].expression.location, before);
        match &grammar.rules[0].expression.kind {
            ExpressionKind::Sequence { elements } => {
                assert!(matches!(
                    &elements[0].kind,
                    ExpressionKind::Literal { value, .. } if value == "AB"
                ));
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
    }
}
