//! Hand-written parser for the grammar DSL.
//!
//! The parser descends through the expression precedence levels (choice,
//! action, sequence, labeled, prefixed, suffixed, primary), attaches a
//! [`Location`] to every node it builds, and keeps a furthest-failure
//! record so that syntax errors report the deepest position reached along
//! with everything that would have been accepted there.

use super::ast::*;
use super::errors::SyntaxError;
use super::singles;
use super::utils::{is_identifier_part, is_identifier_start, is_reserved_word, sort_expected};
use std::rc::Rc;

/// One grammar fragment to parse: an optional source tag plus its text
#[derive(Debug, Clone)]
pub struct SourceFragment {
    pub source: Option<String>,
    pub text: String,
}

impl SourceFragment {
    pub fn new(source: Option<&str>, text: &str) -> Self {
        Self {
            source: source.map(str::to_string),
            text: text.to_string(),
        }
    }
}

/// Parse a single grammar source
pub fn parse_grammar(text: &str, source: Option<&str>) -> Result<Grammar, SyntaxError> {
    let fragments = [SourceFragment::new(source, text)];
    parse_grammar_fragments(&fragments)
}

/// Parse one or more grammar fragments and concatenate their rule lists
///
/// Fragments are parsed independently. Imports are concatenated in order;
/// for the initializers, the first fragment that declares one wins.
pub fn parse_grammar_fragments(fragments: &[SourceFragment]) -> Result<Grammar, SyntaxError> {
    assert!(!fragments.is_empty(), "at least one grammar fragment is required");

    let mut merged: Option<Grammar> = None;

    for fragment in fragments {
        let source: Option<Rc<str>> = fragment.source.as_deref().map(Rc::from);
        let grammar = parse_fragment(&fragment.text, source)?;

        match &mut merged {
            None => merged = Some(grammar),
            Some(acc) => {
                acc.imports.extend(grammar.imports);
                if acc.top_level_initializer.is_none() {
                    acc.top_level_initializer = grammar.top_level_initializer;
                }
                if acc.initializer.is_none() {
                    acc.initializer = grammar.initializer;
                }
                acc.rules.extend(grammar.rules);
            }
        }
    }

    Ok(merged.expect("checked above"))
}

fn parse_fragment(text: &str, source: Option<Rc<str>>) -> Result<Grammar, SyntaxError> {
    let mut r = Reader::new(text, source);

    r.skip_ws()?;
    let start = r.current_pos();

    let mut imports = Vec::new();
    while r.at_keyword("import") {
        imports.push(parse_import(&mut r)?);
        r.skip_ws()?;
    }

    // `{{ … }}` runs once at module load, `{ … }` at the start of each parse
    let top_level_initializer = parse_top_level_initializer(&mut r)?;
    r.skip_ws()?;

    let initializer = if r.peek() == Some('{') {
        let code = singles::code_block(&mut r)?.expect("peeked an opening brace");
        r.skip_ws()?;
        r.eat_char(';');
        r.skip_ws()?;
        Some(code)
    } else {
        None
    };

    let mut rules = Vec::new();

    while !r.at_eof() {
        rules.push(parse_rule(&mut r)?);
        r.skip_ws()?;
        while r.eat_char(';') {
            r.skip_ws()?;
        }
    }

    if rules.is_empty() {
        r.note_expected("rule definition");
        return Err(r.error_at_furthest());
    }

    let location = r.location_from(start);
    Ok(Grammar {
        imports,
        top_level_initializer,
        initializer,
        rules,
        location,
    })
}

fn parse_top_level_initializer(r: &mut Reader) -> Result<Option<Code>, SyntaxError> {
    if !(r.peek() == Some('{') && r.peek_at(1) == Some('{')) {
        return Ok(None);
    }

    let open = r.current_pos();
    r.bump();
    // The inner braces balance through the regular code block scanner
    let code = singles::code_block(r)?.expect("peeked an opening brace");
    if !r.eat_char('}') {
        return Err(r.error_here(
            open,
            vec!["\"}}\"".to_string()],
            "a top-level initializer is closed with double braces",
        ));
    }
    r.skip_ws()?;
    r.eat_char(';');
    r.skip_ws()?;
    Ok(Some(code))
}

fn parse_import(r: &mut Reader) -> Result<Import, SyntaxError> {
    let start = r.current_pos();
    r.eat_keyword("import");
    r.skip_ws()?;

    let mut bindings = Vec::new();

    match r.peek() {
        // `import "module";` binds nothing
        Some('"' | '\'') => {}
        Some('*') => {
            parse_namespace_binding(r, &mut bindings)?;
            r.skip_ws()?;
            expect_from(r)?;
        }
        Some('{') => {
            parse_named_bindings(r, &mut bindings)?;
            r.skip_ws()?;
            expect_from(r)?;
        }
        _ => {
            // Default binding, optionally followed by named/namespace ones
            let binding_start = r.current_pos();
            let (name, _) = match singles::identifier(r)? {
                Some(id) => id,
                None => {
                    r.note_expected("import binding");
                    return Err(r.error_at_furthest());
                }
            };
            bindings.push(ImportBinding {
                name,
                location: r.location_from(binding_start),
            });
            r.skip_ws()?;
            if r.eat_char(',') {
                r.skip_ws()?;
                match r.peek() {
                    Some('*') => parse_namespace_binding(r, &mut bindings)?,
                    Some('{') => parse_named_bindings(r, &mut bindings)?,
                    _ => {
                        r.note_expected("\"*\"");
                        r.note_expected("\"{\"");
                        return Err(r.error_at_furthest());
                    }
                }
                r.skip_ws()?;
            }
            expect_from(r)?;
        }
    }

    r.skip_ws()?;
    let module = match singles::string_literal(r)? {
        Some(module) => module,
        None => {
            r.note_expected("module specifier string");
            return Err(r.error_at_furthest());
        }
    };
    r.skip_ws()?;
    r.eat_char(';');

    Ok(Import {
        bindings,
        module,
        location: r.location_from(start),
    })
}

fn expect_from(r: &mut Reader) -> Result<(), SyntaxError> {
    if r.eat_keyword("from") {
        Ok(())
    } else {
        r.note_expected("\"from\"");
        Err(r.error_at_furthest())
    }
}

fn parse_namespace_binding(
    r: &mut Reader,
    bindings: &mut Vec<ImportBinding>,
) -> Result<(), SyntaxError> {
    let start = r.current_pos();
    r.bump(); // `*`
    r.skip_ws()?;
    if !r.eat_keyword("as") {
        r.note_expected("\"as\"");
        return Err(r.error_at_furthest());
    }
    r.skip_ws()?;
    let (name, _) = match singles::identifier(r)? {
        Some(id) => id,
        None => {
            r.note_expected("namespace binding name");
            return Err(r.error_at_furthest());
        }
    };
    bindings.push(ImportBinding {
        name,
        location: r.location_from(start),
    });
    Ok(())
}

fn parse_named_bindings(
    r: &mut Reader,
    bindings: &mut Vec<ImportBinding>,
) -> Result<(), SyntaxError> {
    r.bump(); // `{`
    loop {
        r.skip_ws()?;
        if r.eat_char('}') {
            return Ok(());
        }

        let start = r.current_pos();
        // The exported name may be an identifier or a string
        let exported_is_string = matches!(r.peek(), Some('"' | '\''));
        let exported = if exported_is_string {
            singles::string_literal(r)?
        } else {
            singles::identifier(r)?.map(|(name, _)| name)
        };
        let exported = match exported {
            Some(name) => name,
            None => {
                r.note_expected("import specifier");
                return Err(r.error_at_furthest());
            }
        };

        r.skip_ws()?;
        let name = if r.eat_keyword("as") {
            r.skip_ws()?;
            match singles::identifier(r)? {
                Some((name, _)) => name,
                None => {
                    r.note_expected("binding name");
                    return Err(r.error_at_furthest());
                }
            }
        } else if exported_is_string {
            r.note_expected("\"as\"");
            return Err(r.error_at_furthest());
        } else {
            exported
        };

        bindings.push(ImportBinding {
            name,
            location: r.location_from(start),
        });

        r.skip_ws()?;
        if !r.eat_char(',') && r.peek() != Some('}') {
            r.note_expected("\",\"");
            r.note_expected("\"}\"");
            return Err(r.error_at_furthest());
        }
    }
}

fn parse_rule(r: &mut Reader) -> Result<Rule, SyntaxError> {
    let start = r.current_pos();

    let name_start = r.current_pos();
    let (name, had_escape) = match singles::identifier(r)? {
        Some(id) => id,
        None => {
            r.note_expected("rule definition");
            return Err(r.error_at_furthest());
        }
    };
    let name_location = r.location_from(name_start);

    if is_reserved_word(&name) && !had_escape {
        return Err(r.error_here(
            name_start,
            vec!["rule name".to_string()],
            &format!("\"{}\" is a reserved word; escape it to use it as a name", name),
        ));
    }

    r.skip_ws()?;
    let display_name = singles::string_literal(r)?;
    r.skip_ws()?;

    if !r.eat_char('=') {
        r.note_expected("\"=\"");
        return Err(r.error_at_furthest());
    }
    r.skip_ws()?;

    let expression = parse_expression(r)?;

    let expression = match &display_name {
        Some(display) => {
            let location = expression.location.clone();
            Expression::new(
                ExpressionKind::Named {
                    name: display.clone(),
                    inner: Box::new(expression),
                },
                location,
            )
        }
        None => expression,
    };

    Ok(Rule {
        name,
        name_location,
        display_name,
        expression,
        location: r.location_from(start),
    })
}

/// Parse a full expression (the loosest precedence level, ordered choice)
pub(crate) fn parse_expression(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();
    let mut alternatives = vec![parse_action_sequence(r)?];

    loop {
        let mark = r.mark();
        r.skip_ws()?;
        if r.eat_char('/') {
            r.skip_ws()?;
            alternatives.push(parse_action_sequence(r)?);
        } else {
            r.note_expected("\"/\"");
            r.reset(mark);
            break;
        }
    }

    if alternatives.len() == 1 {
        Ok(alternatives.pop().expect("one alternative"))
    } else {
        Ok(Expression::new(
            ExpressionKind::Choice { alternatives },
            r.location_from(start),
        ))
    }
}

/// A sequence of labeled elements, optionally closed by an action block
fn parse_action_sequence(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();
    let mut elements = vec![parse_labeled(r)?];

    loop {
        let mark = r.mark();
        r.skip_ws()?;
        if !starts_expression(r) || at_rule_definition(r)? {
            r.reset(mark);
            break;
        }
        elements.push(parse_labeled(r)?);
    }

    let code = {
        let mark = r.mark();
        r.skip_ws()?;
        if r.peek() == Some('{') {
            Some(singles::code_block(r)?.expect("peeked an opening brace"))
        } else {
            r.reset(mark);
            None
        }
    };

    // A single element without picks needs no sequence wrapper; a pick has
    // sequence semantics even when it stands alone
    let has_pick = elements
        .iter()
        .any(|e| matches!(e.kind, ExpressionKind::Labeled { pick: true, .. }));
    let inner = if elements.len() == 1 && !has_pick {
        elements.pop().expect("one element")
    } else {
        Expression::new(
            ExpressionKind::Sequence { elements },
            r.location_from(start),
        )
    };

    Ok(match code {
        Some(code) => Expression::new(
            ExpressionKind::Action {
                inner: Box::new(inner),
                code,
            },
            r.location_from(start),
        ),
        None => inner,
    })
}

/// Could an expression start at the cursor?
fn starts_expression(r: &Reader) -> bool {
    match r.peek() {
        Some('"' | '\'' | '[' | '.' | '(' | '@' | '&' | '!' | '$' | '\\') => true,
        Some(c) => is_identifier_start(c),
        None => false,
    }
}

/// Lookahead: does a new rule definition (`name "display"? =`) start here?
fn at_rule_definition(r: &mut Reader) -> Result<bool, SyntaxError> {
    if !matches!(r.peek(), Some(c) if is_identifier_start(c) || c == '\\') {
        return Ok(false);
    }

    let mark = r.mark();
    let result = (|| -> Result<bool, SyntaxError> {
        if singles::identifier(r)?.is_none() {
            return Ok(false);
        }
        r.skip_ws()?;
        if matches!(r.peek(), Some('"' | '\'')) && singles::string_literal(r).is_err() {
            return Ok(false);
        }
        r.skip_ws()?;
        Ok(r.peek() == Some('='))
    })();
    r.reset(mark);

    // Lookahead failures are not errors; the element parse will re-raise
    // anything real
    Ok(result.unwrap_or(false))
}

fn parse_labeled(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();

    if r.eat_char('@') {
        let at_location = r.location_from(start);
        let label = parse_label_name(r)?;
        let (label, label_location) = match label {
            Some((name, location)) => (Some(name), location),
            None => (None, at_location),
        };
        r.skip_ws()?;
        let inner = parse_prefixed(r)?;
        return Ok(Expression::new(
            ExpressionKind::Labeled {
                label,
                label_location,
                pick: true,
                inner: Box::new(inner),
            },
            r.location_from(start),
        ));
    }

    if matches!(r.peek(), Some(c) if is_identifier_start(c) || c == '\\') {
        let mark = r.mark();
        if let Some((label, label_location)) = parse_label_name(r)? {
            r.skip_ws()?;
            let inner = parse_prefixed(r)?;
            return Ok(Expression::new(
                ExpressionKind::Labeled {
                    label: Some(label),
                    label_location,
                    pick: false,
                    inner: Box::new(inner),
                },
                r.location_from(start),
            ));
        }
        r.reset(mark);
    }

    parse_prefixed(r)
}

/// Parse `name:` and return the name with its span (excluding the colon);
/// resets and returns `None` when the cursor is not at a label
fn parse_label_name(r: &mut Reader) -> Result<Option<(String, Location)>, SyntaxError> {
    let mark = r.mark();
    let start = r.current_pos();

    let parsed = match r.peek() {
        Some(c) if is_identifier_start(c) || c == '\\' => singles::identifier(r)?,
        _ => None,
    };

    let (name, had_escape) = match parsed {
        Some(id) => id,
        None => {
            r.reset(mark);
            return Ok(None);
        }
    };
    let location = r.location_from(start);

    r.skip_ws()?;
    if !r.eat_char(':') {
        r.reset(mark);
        return Ok(None);
    }

    if is_reserved_word(&name) && !had_escape {
        return Err(r.error_here(
            start,
            vec!["label name".to_string()],
            &format!("\"{}\" is a reserved word; escape it to use it as a label", name),
        ));
    }

    Ok(Some((name, location)))
}

fn parse_prefixed(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();

    match r.peek() {
        Some('$') => {
            r.bump();
            r.skip_ws()?;
            let inner = parse_suffixed(r)?;
            Ok(Expression::new(
                ExpressionKind::Text(Box::new(inner)),
                r.location_from(start),
            ))
        }
        Some(op @ ('&' | '!')) => {
            r.bump();
            r.skip_ws()?;
            if r.peek() == Some('{') {
                let code = singles::code_block(r)?.expect("peeked an opening brace");
                let kind = if op == '&' {
                    ExpressionKind::SemanticAnd(code)
                } else {
                    ExpressionKind::SemanticNot(code)
                };
                Ok(Expression::new(kind, r.location_from(start)))
            } else {
                let inner = Box::new(parse_suffixed(r)?);
                let kind = if op == '&' {
                    ExpressionKind::SimpleAnd(inner)
                } else {
                    ExpressionKind::SimpleNot(inner)
                };
                Ok(Expression::new(kind, r.location_from(start)))
            }
        }
        _ => parse_suffixed(r),
    }
}

fn parse_suffixed(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();
    let inner = parse_primary(r)?;

    let mark = r.mark();
    r.skip_ws()?;

    match r.peek() {
        Some('?') => {
            r.bump();
            Ok(Expression::new(
                ExpressionKind::Optional(Box::new(inner)),
                r.location_from(start),
            ))
        }
        Some('*') => {
            r.bump();
            Ok(Expression::new(
                ExpressionKind::ZeroOrMore(Box::new(inner)),
                r.location_from(start),
            ))
        }
        Some('+') => {
            r.bump();
            Ok(Expression::new(
                ExpressionKind::OneOrMore(Box::new(inner)),
                r.location_from(start),
            ))
        }
        Some('|') => match parse_repeated_suffix(r, &inner)? {
            Some(kind) => Ok(Expression::new(kind, r.location_from(start))),
            None => {
                r.reset(mark);
                Ok(inner)
            }
        },
        _ => {
            r.reset(mark);
            Ok(inner)
        }
    }
}

/// Parse a `|min..max, delimiter|` repetition suffix
///
/// Resets silently when the `|` turns out not to open a well-formed
/// repetition, so a delimiter expression inside one can stop at the
/// closing bar.
fn parse_repeated_suffix(
    r: &mut Reader,
    inner: &Expression,
) -> Result<Option<ExpressionKind>, SyntaxError> {
    let mark = r.mark();
    r.bump(); // `|`
    r.skip_ws()?;

    let first = parse_boundary(r)?;
    r.skip_ws()?;

    let (min, max) = if r.eat_str("..") {
        r.skip_ws()?;
        let second = parse_boundary(r)?;
        r.skip_ws()?;
        let here = r.current_pos();
        let min = first.unwrap_or(Boundary {
            kind: BoundaryKind::Constant(Some(0)),
            location: Location::at(r.source(), here),
        });
        let max = second.unwrap_or(Boundary {
            kind: BoundaryKind::Constant(None),
            location: Location::at(r.source(), here),
        });
        (min, max)
    } else {
        match first {
            // `|n|` repeats exactly n times
            Some(count) => (count.clone(), count),
            None => {
                r.note_expected("repetition count");
                r.reset(mark);
                return Ok(None);
            }
        }
    };

    let delimiter = if r.eat_char(',') {
        r.skip_ws()?;
        let delimiter = parse_expression(r)?;
        r.skip_ws()?;
        Some(Box::new(delimiter))
    } else {
        None
    };

    if !r.eat_char('|') {
        r.note_expected("\"|\"");
        r.reset(mark);
        return Ok(None);
    }

    Ok(Some(ExpressionKind::Repeated {
        min,
        max,
        delimiter,
        inner: Box::new(inner.clone()),
    }))
}

fn parse_boundary(r: &mut Reader) -> Result<Option<Boundary>, SyntaxError> {
    let start = r.current_pos();

    if let Some(value) = singles::integer(r) {
        return Ok(Some(Boundary {
            kind: BoundaryKind::Constant(Some(value)),
            location: r.location_from(start),
        }));
    }

    if matches!(r.peek(), Some(c) if is_identifier_start(c) || c == '\\') {
        if let Some((name, _)) = singles::identifier(r)? {
            return Ok(Some(Boundary {
                kind: BoundaryKind::Variable(name),
                location: r.location_from(start),
            }));
        }
    }

    if r.peek() == Some('{') {
        let code = singles::code_block(r)?.expect("peeked an opening brace");
        return Ok(Some(Boundary {
            kind: BoundaryKind::Code(code.text),
            location: code.location,
        }));
    }

    Ok(None)
}

fn parse_primary(r: &mut Reader) -> Result<Expression, SyntaxError> {
    let start = r.current_pos();

    match r.peek() {
        Some('"' | '\'') => {
            let value = singles::string_literal(r)?.expect("peeked a quote");
            let ignore_case = eat_flags(r, "i").contains('i');
            Ok(Expression::new(
                ExpressionKind::Literal { value, ignore_case },
                r.location_from(start),
            ))
        }
        Some('[') => {
            let (parts, inverted) = singles::character_class(r)?.expect("peeked a bracket");
            let flags = eat_flags(r, "iu");
            let ignore_case = flags.contains('i');
            let unicode = flags.contains('u');

            if !unicode
                && parts
                    .iter()
                    .any(|p| matches!(p, ClassPart::Property { .. }))
            {
                return Err(r.error_here(
                    start,
                    vec!["\"u\" flag".to_string()],
                    "property escapes are only available in unicode classes",
                ));
            }

            Ok(Expression::new(
                ExpressionKind::Class {
                    parts,
                    inverted,
                    ignore_case,
                    unicode,
                },
                r.location_from(start),
            ))
        }
        Some('.') => {
            r.bump();
            Ok(Expression::new(
                ExpressionKind::Any { unicode: false },
                r.location_from(start),
            ))
        }
        Some('(') => {
            r.bump();
            r.skip_ws()?;
            let inner = parse_expression(r)?;
            r.skip_ws()?;
            if !r.eat_char(')') {
                r.note_expected("\")\"");
                return Err(r.error_at_furthest());
            }
            Ok(Expression::new(
                ExpressionKind::Group(Box::new(inner)),
                r.location_from(start),
            ))
        }
        Some(c) if is_identifier_start(c) || c == '\\' => {
            let (name, _) = singles::identifier(r)?.expect("peeked an identifier start");

            // `binding.rule` refers to an imported grammar
            if r.peek() == Some('.')
                && matches!(r.peek_at(1), Some(c) if is_identifier_start(c) || c == '\\')
            {
                r.bump();
                let (rule, _) = singles::identifier(r)?.expect("peeked an identifier start");
                return Ok(Expression::new(
                    ExpressionKind::LibraryRef {
                        library: name,
                        name: rule,
                    },
                    r.location_from(start),
                ));
            }

            Ok(Expression::new(
                ExpressionKind::RuleRef { name },
                r.location_from(start),
            ))
        }
        _ => {
            r.note_expected("literal");
            r.note_expected("character class");
            r.note_expected("\".\"");
            r.note_expected("\"(\"");
            r.note_expected("rule reference");
            Err(r.error_at_furthest())
        }
    }
}

/// Consume trailing flag characters after a literal or class
///
/// The run must stop at a word boundary; `[a-z]iota` is a class followed by
/// a rule reference, not a flagged class.
fn eat_flags(r: &mut Reader, allowed: &str) -> String {
    let mark = r.mark();
    let mut flags = String::new();

    while let Some(c) = r.peek() {
        if !is_identifier_part(c) {
            break;
        }
        if !allowed.contains(c) || flags.contains(c) {
            r.reset(mark);
            return String::new();
        }
        r.bump();
        flags.push(c);
    }

    flags
}

/// Cursor over one grammar source with location and furthest-failure
/// bookkeeping
pub(crate) struct Reader<'a> {
    input: &'a str,
    source: Option<Rc<str>>,
    offset: usize,
    line: usize,
    column: usize,
    /// End of the last consumed token; node spans never include trailing
    /// whitespace
    last_end: Pos,
    furthest: Pos,
    expected: Vec<String>,
}

/// A saved cursor state for backtracking
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mark {
    offset: usize,
    line: usize,
    column: usize,
    last_end: Pos,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a str, source: Option<Rc<str>>) -> Self {
        Self {
            input,
            source,
            offset: 0,
            line: 1,
            column: 1,
            last_end: Pos::start(),
            furthest: Pos::start(),
            expected: Vec::new(),
        }
    }

    pub(crate) fn source(&self) -> Option<Rc<str>> {
        self.source.clone()
    }

    pub(crate) fn current_pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.offset >= self.input.len()
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.input[self.offset..]
    }

    pub(crate) fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[start..end]
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub(crate) fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance_raw(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume one character as part of a token
    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.advance_raw()?;
        self.last_end = self.current_pos();
        Some(c)
    }

    pub(crate) fn eat_char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            for _ in s.chars() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    /// Is the cursor at the given keyword followed by a word boundary?
    pub(crate) fn at_keyword(&self, keyword: &str) -> bool {
        self.rest().starts_with(keyword)
            && !matches!(
                self.rest()[keyword.len()..].chars().next(),
                Some(c) if is_identifier_part(c)
            )
    }

    pub(crate) fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.eat_str(keyword)
        } else {
            false
        }
    }

    pub(crate) fn mark(&self) -> Mark {
        Mark {
            offset: self.offset,
            line: self.line,
            column: self.column,
            last_end: self.last_end,
        }
    }

    pub(crate) fn reset(&mut self, mark: Mark) {
        self.offset = mark.offset;
        self.line = mark.line;
        self.column = mark.column;
        self.last_end = mark.last_end;
    }

    /// Record that `desc` would have been accepted at the cursor
    ///
    /// Only descriptions recorded at the furthest position reached survive
    /// into the final error.
    pub(crate) fn note_expected(&mut self, desc: &str) {
        if self.offset > self.furthest.offset {
            self.furthest = self.current_pos();
            self.expected.clear();
        }
        if self.offset == self.furthest.offset {
            self.expected.push(desc.to_string());
        }
    }

    /// Build the error for the furthest failure recorded so far
    pub(crate) fn error_at_furthest(&self) -> SyntaxError {
        let found = self.input[self.furthest.offset..]
            .chars()
            .next()
            .map(|c| c.to_string());
        SyntaxError::new(
            Location::at(self.source.clone(), self.furthest),
            sort_expected(self.expected.clone()),
            found,
            None,
        )
    }

    /// Build a hard error spanning from `start` to the cursor
    pub(crate) fn error_here(&self, start: Pos, expected: Vec<String>, tip: &str) -> SyntaxError {
        let found = self.peek().map(|c| c.to_string());
        SyntaxError::new(
            Location::new(self.source.clone(), start, self.current_pos()),
            sort_expected(expected),
            found,
            Some(tip.to_string()),
        )
    }

    pub(crate) fn location_from(&self, start: Pos) -> Location {
        Location::new(self.source.clone(), start, self.last_end)
    }

    /// Skip whitespace and comments (`// …` and non-nesting `/* … */`)
    pub(crate) fn skip_ws(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance_raw();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance_raw();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let open = self.current_pos();
                    self.advance_raw();
                    self.advance_raw();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(self.error_here(
                                    open,
                                    vec!["\"*/\"".to_string()],
                                    "comments opened with /* do not nest and must be closed",
                                ));
                            }
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance_raw();
                                self.advance_raw();
                                break;
                            }
                            _ => {
                                self.advance_raw();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Grammar {
        parse_grammar(text, None).expect("grammar should parse")
    }

    fn single_rule(text: &str) -> Rule {
        let mut grammar = parse(text);
        assert_eq!(grammar.rules.len(), 1);
        grammar.rules.pop().expect("one rule")
    }

    #[test]
    fn literal_rule() {
        let rule = single_rule("start = 'a'");
        assert_eq!(rule.name, "start");
        assert_eq!(
            rule.expression.kind,
            ExpressionKind::Literal {
                value: "a".to_string(),
                ignore_case: false,
            }
        );
    }

    #[test]
    fn case_insensitive_literal() {
        let rule = single_rule("start = \"ab\"i");
        assert_eq!(
            rule.expression.kind,
            ExpressionKind::Literal {
                value: "ab".to_string(),
                ignore_case: true,
            }
        );
    }

    #[test]
    fn choice_and_sequence_precedence() {
        let rule = single_rule("start = 'a' 'b' / 'c'");
        match rule.expression.kind {
            ExpressionKind::Choice { alternatives } => {
                assert_eq!(alternatives.len(), 2);
                assert!(matches!(
                    alternatives[0].kind,
                    ExpressionKind::Sequence { ref elements } if elements.len() == 2
                ));
            }
            other => panic!("expected a choice, got {:?}", other),
        }
    }

    #[test]
    fn action_binds_to_sequence() {
        let rule = single_rule("start = a:'x' 'y' { return a; }");
        match rule.expression.kind {
            ExpressionKind::Action { inner, code } => {
                assert_eq!(code.text, " return a; ");
                assert!(matches!(inner.kind, ExpressionKind::Sequence { .. }));
            }
            other => panic!("expected an action, got {:?}", other),
        }
    }

    #[test]
    fn labels_and_picks() {
        let rule = single_rule("start = @'a' b:'b'");
        match rule.expression.kind {
            ExpressionKind::Sequence { elements } => {
                assert!(matches!(
                    elements[0].kind,
                    ExpressionKind::Labeled { pick: true, label: None, .. }
                ));
                assert!(matches!(
                    elements[1].kind,
                    ExpressionKind::Labeled { pick: false, label: Some(ref l), .. } if l == "b"
                ));
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn lone_pick_keeps_sequence_semantics() {
        let rule = single_rule("start = @n:'1' ");
        assert!(matches!(
            rule.expression.kind,
            ExpressionKind::Sequence { ref elements } if elements.len() == 1
        ));
    }

    #[test]
    fn prefix_and_suffix_operators() {
        let rule = single_rule("start = !'a' $('b' 'c')+ &{ ok } 'd'?");
        match rule.expression.kind {
            ExpressionKind::Sequence { elements } => {
                assert!(matches!(elements[0].kind, ExpressionKind::SimpleNot(_)));
                assert!(matches!(elements[1].kind, ExpressionKind::Text(_)));
                assert!(matches!(elements[2].kind, ExpressionKind::SemanticAnd(_)));
                assert!(matches!(elements[3].kind, ExpressionKind::Optional(_)));
                match &elements[1].kind {
                    ExpressionKind::Text(inner) => {
                        assert!(matches!(inner.kind, ExpressionKind::OneOrMore(_)));
                    }
                    _ => unreachable!(),
                }
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn repetition_suffix() {
        let rule = single_rule("start = 'a'|2..3|");
        match rule.expression.kind {
            ExpressionKind::Repeated { min, max, delimiter, .. } => {
                assert_eq!(min.kind, BoundaryKind::Constant(Some(2)));
                assert_eq!(max.kind, BoundaryKind::Constant(Some(3)));
                assert!(delimiter.is_none());
            }
            other => panic!("expected a repetition, got {:?}", other),
        }
    }

    #[test]
    fn repetition_with_delimiter_and_open_bounds() {
        let rule = single_rule("start = n:'x' 'a'|{ two() }.., ',' 'b'|");
        match rule.expression.kind {
            ExpressionKind::Sequence { elements } => match &elements[1].kind {
                ExpressionKind::Repeated { min, max, delimiter, .. } => {
                    assert!(matches!(min.kind, BoundaryKind::Code(_)));
                    assert_eq!(max.kind, BoundaryKind::Constant(None));
                    assert!(matches!(
                        delimiter.as_deref().map(|d| &d.kind),
                        Some(ExpressionKind::Sequence { .. })
                    ));
                }
                other => panic!("expected a repetition, got {:?}", other),
            },
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn variable_boundary() {
        let rule = single_rule("start = n:'3' 'a'|n|");
        match rule.expression.kind {
            ExpressionKind::Sequence { elements } => match &elements[1].kind {
                ExpressionKind::Repeated { min, max, .. } => {
                    assert_eq!(min.kind, BoundaryKind::Variable("n".to_string()));
                    assert_eq!(max.kind, BoundaryKind::Variable("n".to_string()));
                }
                other => panic!("expected a repetition, got {:?}", other),
            },
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn display_name_wraps_in_named() {
        let rule = single_rule("int \"integer\" = [0-9]+");
        assert_eq!(rule.display_name.as_deref(), Some("integer"));
        assert!(matches!(
            rule.expression.kind,
            ExpressionKind::Named { ref name, .. } if name == "integer"
        ));
    }

    #[test]
    fn multiple_rules_without_semicolons() {
        let grammar = parse("a = 'x'\nb = a\nc = b 'y'");
        assert_eq!(
            grammar.rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(matches!(
            grammar.rules[1].expression.kind,
            ExpressionKind::RuleRef { ref name } if name == "a"
        ));
    }

    #[test]
    fn initializers_and_imports() {
        let grammar = parse(
            "import { digit } from \"./digits.js\";\n\
             {{ const base = 10; }}\n\
             { let count = 0; }\n\
             start = digit.value",
        );
        assert_eq!(grammar.imports.len(), 1);
        assert_eq!(grammar.imports[0].module, "./digits.js");
        assert_eq!(grammar.imports[0].bindings[0].name, "digit");
        assert_eq!(
            grammar.top_level_initializer.as_ref().map(|c| c.text.trim()),
            Some("const base = 10;")
        );
        assert_eq!(
            grammar.initializer.as_ref().map(|c| c.text.trim()),
            Some("let count = 0;")
        );
        assert!(matches!(
            grammar.rules[0].expression.kind,
            ExpressionKind::LibraryRef { ref library, ref name }
                if library == "digit" && name == "value"
        ));
    }

    #[test]
    fn comments_are_skipped() {
        let grammar = parse("// leading\nstart = 'a' /* inline */ 'b'\n");
        assert!(matches!(
            grammar.rules[0].expression.kind,
            ExpressionKind::Sequence { ref elements } if elements.len() == 2
        ));
    }

    #[test]
    fn locations_are_tracked() {
        let rule = single_rule("start\n  = 'ab'");
        assert_eq!(rule.name_location.start.offset, 0);
        assert_eq!(rule.name_location.end.offset, 5);
        assert_eq!(rule.expression.location.start.line, 2);
        assert_eq!(rule.expression.location.start.column, 5);
        assert_eq!(rule.expression.location.end.offset, 14);
        assert!(rule.location.end.offset >= rule.expression.location.end.offset);
    }

    #[test]
    fn syntax_error_reports_furthest_position() {
        let err = parse_grammar("start = 'a' / ", None).unwrap_err();
        assert_eq!(err.location().start.offset, 14);
        assert!(!err.expected().is_empty());
        assert!(err.found().is_none());
    }

    #[test]
    fn reserved_rule_name_is_rejected() {
        let err = parse_grammar("while = 'a'", None).unwrap_err();
        assert!(err.tip().unwrap_or_default().contains("reserved word"));
    }

    #[test]
    fn escaped_reserved_word_is_allowed() {
        let rule = single_rule("\\u0077hile = 'a'");
        assert_eq!(rule.name, "while");
    }

    #[test]
    fn fragments_concatenate() {
        let fragments = [
            SourceFragment::new(Some("a.peggy"), "{ let n = 1; }\nstart = part"),
            SourceFragment::new(Some("b.peggy"), "{ let n = 2; }\npart = 'x'"),
        ];
        let grammar = parse_grammar_fragments(&fragments).expect("fragments should parse");
        assert_eq!(grammar.rules.len(), 2);
        // The first fragment's initializer wins
        assert_eq!(
            grammar.initializer.as_ref().map(|c| c.text.trim()),
            Some("let n = 1;")
        );
        let source = grammar.rules[1].location.source.as_deref();
        assert_eq!(source, Some("b.peggy"));
    }
}
