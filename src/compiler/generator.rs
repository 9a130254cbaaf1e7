//! Lowers the analyzed grammar AST to stack-machine bytecode.
//!
//! Every expression compiles to a block that pushes exactly one value and
//! restores the input position when it fails. Sequences thread a label
//! environment mapping label names to value-stack slots, so actions and
//! predicates receive their captured values in declaration order.

use super::ast::*;
use super::bytecode::*;
use super::passes::{compute_nullability, expression_nullable};
use super::session::Session;
use super::Options;
use std::collections::HashMap;

/// Compile a checked grammar into a [`Program`]
pub fn generate_bytecode(grammar: &Grammar, options: &Options, session: &Session) -> Program {
    let nullability = if session.nullability.is_empty() {
        compute_nullability(grammar)
    } else {
        session.nullability.clone()
    };

    let rule_indices: HashMap<&str, usize> = grammar
        .rules
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut imports = Vec::new();
    let mut import_indices: HashMap<&str, usize> = HashMap::new();
    for import in &grammar.imports {
        for binding in &import.bindings {
            if !import_indices.contains_key(binding.name.as_str()) {
                import_indices.insert(&binding.name, imports.len());
                imports.push(LibraryImport {
                    binding: binding.name.clone(),
                    module: import.module.clone(),
                });
            }
        }
    }

    let mut generator = Generator {
        nullability,
        rule_indices,
        import_indices,
        literals: Vec::new(),
        classes: Vec::new(),
        expectations: Vec::new(),
        functions: Vec::new(),
    };

    let rules: Vec<RuleCode> = grammar
        .rules
        .iter()
        .map(|rule| {
            let mut ctx = Ctx {
                sp: 0,
                env: Vec::new(),
            };
            RuleCode {
                name: rule.name.clone(),
                code: generator.gen(&rule.expression, &mut ctx),
                location: rule.location.clone(),
            }
        })
        .collect();

    Program {
        rules,
        literals: generator.literals,
        classes: generator.classes,
        expectations: generator.expectations,
        functions: generator.functions,
        imports,
        start_rules: options.allowed_start_rules.clone(),
        top_level_initializer: grammar.top_level_initializer.clone(),
        initializer: grammar.initializer.clone(),
        grammar_source: grammar.location.source.clone(),
    }
}

/// Lowering state for one expression position
#[derive(Clone)]
struct Ctx {
    /// Values on the rule's frame of the value stack
    sp: usize,
    /// Visible labels in declaration order, each with its frame slot
    env: Vec<(String, usize)>,
}

impl Ctx {
    fn lookup(&self, name: &str) -> Option<usize> {
        self.env
            .iter()
            .rev()
            .find(|(label, _)| label == name)
            .map(|(_, slot)| *slot)
    }

    /// A child context for a construct whose labels must not leak out
    fn scoped(&self) -> Ctx {
        self.clone()
    }
}

enum SeqFinish {
    Plain,
    Pluck(Vec<usize>),
    Action(FunctionCode),
}

struct Generator<'a> {
    nullability: HashMap<String, bool>,
    rule_indices: HashMap<&'a str, usize>,
    import_indices: HashMap<&'a str, usize>,
    literals: Vec<String>,
    classes: Vec<ClassDesc>,
    expectations: Vec<Expectation>,
    functions: Vec<FunctionCode>,
}

impl<'a> Generator<'a> {
    fn add_literal(&mut self, text: &str) -> usize {
        match self.literals.iter().position(|l| l == text) {
            Some(i) => i,
            None => {
                self.literals.push(text.to_string());
                self.literals.len() - 1
            }
        }
    }

    fn add_class(&mut self, desc: &ClassDesc) -> usize {
        match self.classes.iter().position(|c| c == desc) {
            Some(i) => i,
            None => {
                self.classes.push(desc.clone());
                self.classes.len() - 1
            }
        }
    }

    fn add_expectation(&mut self, expectation: Expectation) -> usize {
        match self.expectations.iter().position(|e| *e == expectation) {
            Some(i) => i,
            None => {
                self.expectations.push(expectation);
                self.expectations.len() - 1
            }
        }
    }

    fn add_function(&mut self, function: FunctionCode) -> usize {
        match self.functions.iter().position(|f| {
            f.predicate == function.predicate
                && f.params == function.params
                && f.body == function.body
        }) {
            Some(i) => i,
            None => {
                self.functions.push(function);
                self.functions.len() - 1
            }
        }
    }

    fn nullable(&self, expression: &Expression) -> bool {
        expression_nullable(expression, &self.nullability)
    }

    /// Parameter list for an embedded function: every visible label, in
    /// declaration order, with its offset from the top of the stack
    fn function_params(&self, ctx: &Ctx) -> (Vec<String>, Vec<usize>) {
        let names = ctx.env.iter().map(|(name, _)| name.clone()).collect();
        let offsets = ctx
            .env
            .iter()
            .map(|(_, slot)| ctx.sp - 1 - slot)
            .collect();
        (names, offsets)
    }

    fn gen(&mut self, expression: &Expression, ctx: &mut Ctx) -> Vec<Insn> {
        match &expression.kind {
            ExpressionKind::Literal { value, ignore_case } => {
                ctx.sp += 1;
                if value.is_empty() {
                    return vec![Insn::PushEmptyString];
                }
                let literal = self.add_literal(value);
                let expectation = self.add_expectation(Expectation::Literal {
                    text: value.clone(),
                    ignore_case: *ignore_case,
                });
                vec![Insn::MatchLiteral {
                    literal,
                    ignore_case: *ignore_case,
                    expectation,
                }]
            }

            ExpressionKind::Class {
                parts,
                inverted,
                ignore_case,
                unicode,
            } => {
                let desc = ClassDesc {
                    parts: parts.clone(),
                    inverted: *inverted,
                    ignore_case: *ignore_case,
                    unicode: *unicode,
                };
                let class = self.add_class(&desc);
                let expectation = self.add_expectation(Expectation::Class(desc));
                ctx.sp += 1;
                vec![Insn::MatchClass { class, expectation }]
            }

            ExpressionKind::Any { .. } => {
                let expectation = self.add_expectation(Expectation::Any);
                ctx.sp += 1;
                vec![Insn::MatchAny { expectation }]
            }

            ExpressionKind::RuleRef { name } => {
                ctx.sp += 1;
                match self.rule_indices.get(name.as_str()) {
                    Some(rule) => vec![Insn::CallRule { rule: *rule }],
                    // Unresolved references only survive analysis when the
                    // undefined-rule check was downgraded
                    None => {
                        let expectation =
                            self.add_expectation(Expectation::Other(format!("rule {}", name)));
                        vec![Insn::Fail { expectation }]
                    }
                }
            }

            ExpressionKind::LibraryRef { library, name } => {
                ctx.sp += 1;
                let expectation = self.add_expectation(Expectation::Other(format!(
                    "rule {}.{}",
                    library, name
                )));
                match self.import_indices.get(library.as_str()).copied() {
                    Some(import) => {
                        let name = self.add_literal(name);
                        vec![Insn::CallLibrary {
                            import,
                            name,
                            expectation,
                        }]
                    }
                    None => vec![Insn::Fail { expectation }],
                }
            }

            ExpressionKind::Sequence { elements } => {
                let picks: Vec<usize> = elements
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| matches!(e.kind, ExpressionKind::Labeled { pick: true, .. }))
                    .map(|(i, _)| i)
                    .collect();
                let finish = if picks.is_empty() {
                    SeqFinish::Plain
                } else {
                    SeqFinish::Pluck(picks)
                };
                self.gen_sequence(elements, finish, ctx)
            }

            ExpressionKind::Choice { alternatives } => {
                let base_sp = ctx.sp;

                let mut code = Vec::new();
                for (i, alternative) in alternatives.iter().enumerate().rev() {
                    let mut alt_ctx = Ctx {
                        sp: base_sp,
                        env: ctx.env.clone(),
                    };
                    let mut alt_code = self.gen(alternative, &mut alt_ctx);
                    if i < alternatives.len() - 1 {
                        let mut then = vec![Insn::Pop];
                        then.extend(code);
                        alt_code.push(Insn::IfError {
                            then,
                            otherwise: vec![],
                        });
                    }
                    code = alt_code;
                }

                ctx.sp = base_sp + 1;
                code
            }

            ExpressionKind::Optional(inner) => {
                let mut inner_ctx = ctx.scoped();
                let mut code = self.gen(inner, &mut inner_ctx);
                code.push(Insn::IfError {
                    then: vec![Insn::Pop, Insn::PushNull],
                    otherwise: vec![],
                });
                ctx.sp += 1;
                code
            }

            ExpressionKind::ZeroOrMore(inner) => {
                let guard = self.nullable(inner);
                let mut element_ctx = ctx.scoped();
                element_ctx.sp += 1; // the accumulator sits below the element
                let element = self.gen(inner, &mut element_ctx);
                ctx.sp += 1;
                vec![Insn::RepeatStar { element, guard }]
            }

            ExpressionKind::OneOrMore(inner) => {
                let guard = self.nullable(inner);
                let mut element_ctx = ctx.scoped();
                element_ctx.sp += 1;
                let element = self.gen(inner, &mut element_ctx);
                ctx.sp += 1;
                vec![Insn::RepeatPlus { element, guard }]
            }

            ExpressionKind::Repeated {
                min,
                max,
                delimiter,
                inner,
            } => {
                // Boundaries are resolved against the stack as it is when
                // the instruction starts, before the accumulator is pushed
                let min_ref = self.boundary_ref(min, ctx);
                let max_ref = self.boundary_ref(max, ctx);

                let guard =
                    self.nullable(inner) && matches!(max_ref, BoundaryRef::Constant(None));

                let mut element_ctx = ctx.scoped();
                element_ctx.sp += 1;
                let element = self.gen(inner, &mut element_ctx);

                let delimiter = delimiter.as_ref().map(|d| {
                    let mut delimiter_ctx = ctx.scoped();
                    delimiter_ctx.sp += 1;
                    self.gen(d, &mut delimiter_ctx)
                });

                ctx.sp += 1;
                vec![Insn::RepeatRange {
                    element,
                    delimiter,
                    min: min_ref,
                    max: max_ref,
                    guard,
                }]
            }

            ExpressionKind::Group(inner) => {
                let mut inner_ctx = ctx.scoped();
                let code = self.gen(inner, &mut inner_ctx);
                ctx.sp += 1;
                code
            }

            ExpressionKind::Labeled { label, inner, .. } => {
                let code = self.gen(inner, ctx);
                if let Some(name) = label {
                    ctx.env.push((name.clone(), ctx.sp - 1));
                }
                code
            }

            ExpressionKind::Text(inner) => {
                let mut code = vec![Insn::PushCurrPos];
                let mut inner_ctx = ctx.scoped();
                inner_ctx.sp += 1;
                code.extend(self.gen(inner, &mut inner_ctx));
                code.push(Insn::IfNotError {
                    then: vec![Insn::Pop, Insn::TextFromSaved],
                    otherwise: vec![Insn::Nip],
                });
                ctx.sp += 1;
                code
            }

            ExpressionKind::SimpleAnd(inner) => {
                let mut code = vec![Insn::PushCurrPos, Insn::SilentFailsOn];
                let mut inner_ctx = ctx.scoped();
                inner_ctx.sp += 1;
                code.extend(self.gen(inner, &mut inner_ctx));
                code.push(Insn::SilentFailsOff);
                code.push(Insn::IfNotError {
                    then: vec![Insn::Pop, Insn::PopCurrPos, Insn::PushNull],
                    otherwise: vec![Insn::Nip],
                });
                ctx.sp += 1;
                code
            }

            ExpressionKind::SimpleNot(inner) => {
                let mut code = vec![Insn::PushCurrPos, Insn::SilentFailsOn];
                let mut inner_ctx = ctx.scoped();
                inner_ctx.sp += 1;
                code.extend(self.gen(inner, &mut inner_ctx));
                code.push(Insn::SilentFailsOff);
                code.push(Insn::IfError {
                    then: vec![Insn::Pop, Insn::PopCurrPos, Insn::PushNull],
                    otherwise: vec![Insn::Pop, Insn::PopCurrPos, Insn::PushFailed],
                });
                ctx.sp += 1;
                code
            }

            ExpressionKind::SemanticAnd(code) | ExpressionKind::SemanticNot(code) => {
                let negated = matches!(expression.kind, ExpressionKind::SemanticNot(_));
                let (params, offsets) = self.function_params(ctx);
                let function = self.add_function(FunctionCode {
                    predicate: true,
                    params,
                    body: code.text.clone(),
                    location: code.location.clone(),
                });
                ctx.sp += 1;
                vec![Insn::CallPredicate {
                    function,
                    negated,
                    params: offsets,
                }]
            }

            ExpressionKind::Action { inner, code } => self.gen_action(inner, code, ctx),

            ExpressionKind::Named { name, inner } => {
                let expectation = self.add_expectation(Expectation::Other(name.clone()));
                let mut code = vec![Insn::SilentFailsOn];
                let mut inner_ctx = ctx.scoped();
                code.extend(self.gen(inner, &mut inner_ctx));
                code.push(Insn::SilentFailsOff);
                code.push(Insn::IfError {
                    then: vec![Insn::Pop, Insn::Fail { expectation }],
                    otherwise: vec![],
                });
                ctx.sp += 1;
                code
            }
        }
    }

    fn gen_sequence(
        &mut self,
        elements: &[Expression],
        finish: SeqFinish,
        ctx: &mut Ctx,
    ) -> Vec<Insn> {
        let base_sp = ctx.sp;
        let env_len = ctx.env.len();

        let mut code = vec![Insn::PushCurrPos];
        ctx.sp += 1;
        code.extend(self.gen_chain(elements, 0, &finish, ctx));

        ctx.sp = base_sp + 1;
        ctx.env.truncate(env_len);
        code
    }

    /// Compile elements[i..] followed by the finish step; each failure
    /// branch drops what the successful prefix pushed and rewinds
    fn gen_chain(
        &mut self,
        elements: &[Expression],
        i: usize,
        finish: &SeqFinish,
        ctx: &mut Ctx,
    ) -> Vec<Insn> {
        let n = elements.len();
        if i == n {
            return match finish {
                SeqFinish::Plain => vec![Insn::WrapN(n), Insn::Nip],
                SeqFinish::Pluck(picks) => vec![
                    Insn::PluckN {
                        count: n,
                        picks: picks.clone(),
                    },
                    Insn::Nip,
                ],
                SeqFinish::Action(function) => {
                    let (params, offsets) = self.function_params(ctx);
                    let function = self.add_function(FunctionCode {
                        params,
                        ..function.clone()
                    });
                    vec![Insn::CallAction {
                        function,
                        discard: n + 1,
                        params: offsets,
                    }]
                }
            };
        }

        let mut code = self.gen(&elements[i], ctx);
        let then = self.gen_chain(elements, i + 1, finish, ctx);
        code.push(Insn::IfNotError {
            then,
            otherwise: vec![Insn::PopN(i + 1), Insn::PopCurrPos, Insn::PushFailed],
        });
        code
    }

    fn gen_action(&mut self, inner: &Expression, code: &Code, ctx: &mut Ctx) -> Vec<Insn> {
        let base_sp = ctx.sp;
        let env_len = ctx.env.len();

        let finish = SeqFinish::Action(FunctionCode {
            predicate: false,
            params: vec![],
            body: code.text.clone(),
            location: code.location.clone(),
        });

        let elements: &[Expression] = match &inner.kind {
            ExpressionKind::Sequence { elements } => elements,
            _ => std::slice::from_ref(inner),
        };

        let mut out = vec![Insn::PushCurrPos];
        ctx.sp += 1;
        out.extend(self.gen_chain(elements, 0, &finish, ctx));

        ctx.sp = base_sp + 1;
        ctx.env.truncate(env_len);
        out
    }

    fn boundary_ref(&mut self, boundary: &Boundary, ctx: &Ctx) -> BoundaryRef {
        match &boundary.kind {
            BoundaryKind::Constant(value) => BoundaryRef::Constant(*value),
            BoundaryKind::Variable(name) => match ctx.lookup(name) {
                Some(slot) => BoundaryRef::SlotFromTop(ctx.sp - 1 - slot),
                // Only reachable when boundary validation was downgraded
                None => BoundaryRef::Constant(Some(0)),
            },
            BoundaryKind::Code(body) => {
                let function = self.add_function(FunctionCode {
                    predicate: false,
                    params: vec![],
                    body: body.clone(),
                    location: boundary.location.clone(),
                });
                BoundaryRef::Function(function)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_grammar;

    fn program(text: &str) -> Program {
        let grammar = parse_grammar(text, None).unwrap();
        let options = Options {
            allowed_start_rules: vec![grammar.rules[0].name.clone()],
            ..Options::default()
        };
        let session = Session::new(Default::default(), None, None);
        generate_bytecode(&grammar, &options, &session)
    }

    #[test]
    fn literal_lowering() {
        let program = program("a = 'xy'");
        assert_eq!(program.literals, vec!["xy".to_string()]);
        assert_eq!(
            program.rules[0].code,
            vec![Insn::MatchLiteral {
                literal: 0,
                ignore_case: false,
                expectation: 0,
            }]
        );
    }

    #[test]
    fn literals_are_deduplicated() {
        let program = program("a = 'x' 'x' 'y'");
        assert_eq!(program.literals, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn choice_lowering_tries_alternatives_in_order() {
        let program = program("a = 'x' / 'y'");
        match &program.rules[0].code[..] {
            [Insn::MatchLiteral { literal: 0, .. }, Insn::IfError { then, otherwise }] => {
                assert!(otherwise.is_empty());
                assert_eq!(then[0], Insn::Pop);
                assert!(matches!(then[1], Insn::MatchLiteral { literal: 1, .. }));
            }
            other => panic!("unexpected choice code: {:?}", other),
        }
    }

    #[test]
    fn sequence_failure_rewinds() {
        let program = program("a = 'x' 'y'");
        match &program.rules[0].code[..] {
            [Insn::PushCurrPos, Insn::MatchLiteral { .. }, Insn::IfNotError { then, otherwise }] => {
                assert_eq!(
                    otherwise,
                    &[Insn::PopN(1), Insn::PopCurrPos, Insn::PushFailed]
                );
                match &then[..] {
                    [Insn::MatchLiteral { .. }, Insn::IfNotError { then, otherwise }] => {
                        assert_eq!(then, &[Insn::WrapN(2), Insn::Nip]);
                        assert_eq!(
                            otherwise,
                            &[Insn::PopN(2), Insn::PopCurrPos, Insn::PushFailed]
                        );
                    }
                    other => panic!("unexpected inner chain: {:?}", other),
                }
            }
            other => panic!("unexpected sequence code: {:?}", other),
        }
    }

    #[test]
    fn action_receives_labels_in_declaration_order() {
        let program = program("a = x:'1' y:'2' { return [x, y]; }");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].params, vec!["x", "y"]);
        assert!(!program.functions[0].predicate);

        // Find the CallAction at the end of the chain
        fn find_action(code: &[Insn]) -> Option<(usize, Vec<usize>)> {
            for insn in code {
                match insn {
                    Insn::CallAction {
                        discard, params, ..
                    } => return Some((*discard, params.clone())),
                    Insn::IfNotError { then, otherwise } | Insn::IfError { then, otherwise } => {
                        if let Some(found) = find_action(then).or_else(|| find_action(otherwise)) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }

        let (discard, params) = find_action(&program.rules[0].code).expect("an action call");
        assert_eq!(discard, 3);
        // With the saved position and both results on the stack, x sits two
        // below the top and y one below
        assert_eq!(params, vec![1, 0]);
    }

    #[test]
    fn pluck_lowering() {
        let program = program("a = '(' @inner:'x' ')'");
        fn find_pluck(code: &[Insn]) -> Option<(usize, Vec<usize>)> {
            for insn in code {
                match insn {
                    Insn::PluckN { count, picks } => return Some((*count, picks.clone())),
                    Insn::IfNotError { then, otherwise } | Insn::IfError { then, otherwise } => {
                        if let Some(found) = find_pluck(then).or_else(|| find_pluck(otherwise)) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        let (count, picks) = find_pluck(&program.rules[0].code).expect("a pluck");
        assert_eq!(count, 3);
        assert_eq!(picks, vec![1]);
    }

    #[test]
    fn nullable_repetition_gets_a_guard() {
        let program = program("a = ('x'?)*\nb = 'x'*");
        assert!(matches!(
            program.rules[0].code[0],
            Insn::RepeatStar { guard: true, .. }
        ));
        assert!(matches!(
            program.rules[1].code[0],
            Insn::RepeatStar { guard: false, .. }
        ));
    }

    #[test]
    fn variable_boundary_resolves_to_a_slot() {
        let program = program("a = n:'3' 'x'|n|");
        fn find_range(code: &[Insn]) -> Option<(BoundaryRef, BoundaryRef)> {
            for insn in code {
                match insn {
                    Insn::RepeatRange { min, max, .. } => {
                        return Some((min.clone(), max.clone()))
                    }
                    Insn::IfNotError { then, otherwise } | Insn::IfError { then, otherwise } => {
                        if let Some(found) = find_range(then).or_else(|| find_range(otherwise)) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        let (min, max) = find_range(&program.rules[0].code).expect("a ranged repetition");
        // The label is one below the top when the repetition starts
        assert_eq!(min, BoundaryRef::SlotFromTop(0));
        assert_eq!(max, BoundaryRef::SlotFromTop(0));
    }

    #[test]
    fn named_rule_contributes_one_expectation() {
        let program = program("int \"integer\" = [0-9]");
        assert!(program
            .expectations
            .iter()
            .any(|e| matches!(e, Expectation::Other(name) if name == "integer")));
        assert_eq!(program.rules[0].code[0], Insn::SilentFailsOn);
    }
}
