//! Leaf parsers for the grammar DSL: string literals, character classes,
//! identifiers, integers and balanced code blocks.
//!
//! Each parser returns `Ok(None)` when the construct does not start at the
//! current position, so the caller can try the next alternative; hard errors
//! (an unterminated string, an invalid range) are raised immediately.

use super::ast::{ClassPart, Code, Location};
use super::errors::SyntaxError;
use super::parser::Reader;
use super::utils::is_identifier_part;
use super::utils::is_identifier_start;

/// Try to parse a single- or double-quoted string literal
pub(crate) fn string_literal(r: &mut Reader) -> Result<Option<String>, SyntaxError> {
    let quote = match r.peek() {
        Some(c @ ('"' | '\'')) => c,
        _ => return Ok(None),
    };

    let start = r.current_pos();
    r.bump();

    let mut value = String::new();

    loop {
        match r.peek() {
            None | Some('\n') => {
                return Err(r.error_here(
                    start,
                    vec![format!("closing {}", quote)],
                    "unterminated string literal",
                ));
            }
            Some(c) if c == quote => {
                r.bump();
                return Ok(Some(value));
            }
            Some('\\') => {
                r.bump();
                if let Some(c) = escape_sequence(r)? {
                    value.push(c);
                }
            }
            Some(c) => {
                r.bump();
                value.push(c);
            }
        }
    }
}

/// Try to parse a character class `[…]`, returning its parts and whether it
/// was inverted with a leading `^`
pub(crate) fn character_class(
    r: &mut Reader,
) -> Result<Option<(Vec<ClassPart>, bool)>, SyntaxError> {
    if r.peek() != Some('[') {
        return Ok(None);
    }

    let start = r.current_pos();
    r.bump();

    let inverted = r.eat_char('^');
    let mut parts = Vec::new();

    loop {
        match r.peek() {
            None | Some('\n') => {
                return Err(r.error_here(
                    start,
                    vec!["\"]\"".to_string()],
                    "unterminated character class",
                ));
            }
            Some(']') => {
                r.bump();
                return Ok(Some((parts, inverted)));
            }
            _ => {
                let part_start = r.current_pos();
                let first = match class_char(r)? {
                    ClassAtom::Char(c) => c,
                    ClassAtom::Property(part) => {
                        parts.push(part);
                        continue;
                    }
                };

                // A `-` continues a range unless it closes the class
                if r.peek() == Some('-') && r.peek_at(1) != Some(']') && r.peek_at(1).is_some() {
                    r.bump();
                    let second = match class_char(r)? {
                        ClassAtom::Char(c) => c,
                        ClassAtom::Property(_) => {
                            return Err(r.error_here(
                                part_start,
                                vec!["class character".to_string()],
                                "a property escape cannot bound a range",
                            ));
                        }
                    };

                    if second < first {
                        return Err(r.error_here(
                            part_start,
                            vec!["well-ordered range".to_string()],
                            &format!("invalid character range {}-{}", first, second),
                        ));
                    }

                    parts.push(ClassPart::Range(first, second));
                } else {
                    parts.push(ClassPart::Single(first));
                }
            }
        }
    }
}

enum ClassAtom {
    Char(char),
    Property(ClassPart),
}

/// One class atom: a plain character, an escape, or `\p{…}` / `\P{…}`
fn class_char(r: &mut Reader) -> Result<ClassAtom, SyntaxError> {
    match r.peek() {
        Some('\\') => {
            r.bump();
            match r.peek() {
                Some(negated @ ('p' | 'P')) => {
                    let start = r.current_pos();
                    r.bump();
                    if !r.eat_char('{') {
                        return Err(r.error_here(
                            start,
                            vec!["\"{\"".to_string()],
                            "property escapes are written \\p{Name}",
                        ));
                    }
                    let mut name = String::new();
                    loop {
                        match r.peek() {
                            Some('}') => {
                                r.bump();
                                break;
                            }
                            Some(c) if c.is_alphanumeric() || c == '_' || c == '=' => {
                                r.bump();
                                name.push(c);
                            }
                            _ => {
                                return Err(r.error_here(
                                    start,
                                    vec!["\"}\"".to_string()],
                                    "unterminated property escape",
                                ));
                            }
                        }
                    }
                    Ok(ClassAtom::Property(ClassPart::Property {
                        name,
                        negated: negated == 'P',
                    }))
                }
                _ => match escape_sequence(r)? {
                    Some(c) => Ok(ClassAtom::Char(c)),
                    None => Ok(ClassAtom::Char('\n')),
                },
            }
        }
        Some(c) => {
            r.bump();
            Ok(ClassAtom::Char(c))
        }
        None => {
            let pos = r.current_pos();
            Err(r.error_here(
                pos,
                vec!["class character".to_string()],
                "unterminated character class",
            ))
        }
    }
}

/// Decode the escape sequence after a consumed `\`
///
/// Returns `None` for a line continuation (`\` before a newline), which
/// contributes no character.
pub(crate) fn escape_sequence(r: &mut Reader) -> Result<Option<char>, SyntaxError> {
    let start = r.current_pos();
    let c = match r.peek() {
        Some(c) => c,
        None => {
            return Err(r.error_here(
                start,
                vec!["escape sequence".to_string()],
                "dangling backslash",
            ));
        }
    };
    r.bump();

    Ok(Some(match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'b' => '\u{8}',
        'f' => '\u{C}',
        'v' => '\u{B}',
        '0' => '\0',
        '\n' => return Ok(None),
        'x' => hex_escape(r, start, 2)?,
        'u' => {
            if r.eat_char('{') {
                let mut value: u32 = 0;
                let mut digits = 0;
                while let Some(d) = r.peek().and_then(|c| c.to_digit(16)) {
                    r.bump();
                    value = value.saturating_mul(16).saturating_add(d);
                    digits += 1;
                }
                if digits == 0 || !r.eat_char('}') {
                    return Err(r.error_here(
                        start,
                        vec!["hexadecimal digits and \"}\"".to_string()],
                        "malformed \\u{…} escape",
                    ));
                }
                char::from_u32(value).ok_or_else(|| {
                    r.error_here(
                        start,
                        vec!["valid code point".to_string()],
                        "escape does not denote a code point",
                    )
                })?
            } else {
                hex_escape(r, start, 4)?
            }
        }
        other => other,
    }))
}

fn hex_escape(r: &mut Reader, start: super::ast::Pos, digits: u32) -> Result<char, SyntaxError> {
    let mut value: u32 = 0;
    for _ in 0..digits {
        match r.peek().and_then(|c| c.to_digit(16)) {
            Some(d) => {
                r.bump();
                value = value * 16 + d;
            }
            None => {
                return Err(r.error_here(
                    start,
                    vec![format!("{} hexadecimal digits", digits)],
                    "malformed hexadecimal escape",
                ));
            }
        }
    }
    char::from_u32(value).ok_or_else(|| {
        r.error_here(
            start,
            vec!["valid code point".to_string()],
            "escape does not denote a code point",
        )
    })
}

/// Try to parse an identifier, honoring `\uXXXX` and `\u{…}` escapes
///
/// The second component of the result tells whether any escape was used;
/// escaped spellings of reserved words are allowed as names.
pub(crate) fn identifier(r: &mut Reader) -> Result<Option<(String, bool)>, SyntaxError> {
    let mut name = String::new();
    let mut had_escape = false;

    match r.peek() {
        Some('\\') => {
            let mark = r.mark();
            r.bump();
            if r.peek() == Some('u') {
                name.push(unicode_identifier_escape(r)?);
                had_escape = true;
            } else {
                r.reset(mark);
                return Ok(None);
            }
        }
        Some(c) if is_identifier_start(c) => {
            r.bump();
            name.push(c);
        }
        _ => return Ok(None),
    }

    loop {
        match r.peek() {
            Some('\\') => {
                let mark = r.mark();
                r.bump();
                if r.peek() == Some('u') {
                    name.push(unicode_identifier_escape(r)?);
                    had_escape = true;
                } else {
                    r.reset(mark);
                    break;
                }
            }
            Some(c) if is_identifier_part(c) => {
                r.bump();
                name.push(c);
            }
            _ => break,
        }
    }

    Ok(Some((name, had_escape)))
}

/// Decode `uXXXX` / `u{…}` at the cursor (the `\` is already consumed)
fn unicode_identifier_escape(r: &mut Reader) -> Result<char, SyntaxError> {
    let start = r.current_pos();
    if r.peek() != Some('u') {
        return Err(r.error_here(
            start,
            vec!["\"u\"".to_string()],
            "only \\u escapes are valid in identifiers",
        ));
    }
    r.bump();
    if r.eat_char('{') {
        let mut value: u32 = 0;
        let mut digits = 0;
        while let Some(d) = r.peek().and_then(|c| c.to_digit(16)) {
            r.bump();
            value = value.saturating_mul(16).saturating_add(d);
            digits += 1;
        }
        if digits == 0 || !r.eat_char('}') {
            return Err(r.error_here(
                start,
                vec!["hexadecimal digits and \"}\"".to_string()],
                "malformed \\u{…} escape",
            ));
        }
        char::from_u32(value).ok_or_else(|| {
            r.error_here(
                start,
                vec!["valid code point".to_string()],
                "escape does not denote a code point",
            )
        })
    } else {
        hex_escape(r, start, 4)
    }
}

/// Try to parse a non-negative decimal integer
pub(crate) fn integer(r: &mut Reader) -> Option<u64> {
    let mut value: u64 = 0;
    let mut any = false;
    while let Some(d) = r.peek().and_then(|c| c.to_digit(10)) {
        r.bump();
        value = value.saturating_mul(10).saturating_add(u64::from(d));
        any = true;
    }
    any.then_some(value)
}

/// Try to parse a balanced `{ … }` code block, returning the inner text
/// exactly as written
///
/// Braces inside string literals and comments do not count toward balance,
/// so user code like `{ return "}"; }` survives intact.
pub(crate) fn code_block(r: &mut Reader) -> Result<Option<Code>, SyntaxError> {
    if r.peek() != Some('{') {
        return Ok(None);
    }

    let open = r.current_pos();
    r.bump();

    let inner_start = r.current_pos();
    let mut depth: u32 = 0;

    loop {
        match r.peek() {
            None => {
                return Err(r.error_here(
                    open,
                    vec!["\"}\"".to_string()],
                    "unterminated code block",
                ));
            }
            Some('{') => {
                r.bump();
                depth += 1;
            }
            Some('}') => {
                let before = r.current_pos();
                r.bump();
                if depth == 0 {
                    let text = r.slice(inner_start.offset, before.offset).to_string();
                    let location = Location::new(r.source(), inner_start, before);
                    return Ok(Some(Code { text, location }));
                }
                depth -= 1;
            }
            Some(q @ ('"' | '\'' | '`')) => {
                r.bump();
                skip_embedded_string(r, open, q)?;
            }
            Some('/') if r.peek_at(1) == Some('/') => {
                while !matches!(r.peek(), None | Some('\n')) {
                    r.bump();
                }
            }
            Some('/') if r.peek_at(1) == Some('*') => {
                r.bump();
                r.bump();
                loop {
                    match r.peek() {
                        None => {
                            return Err(r.error_here(
                                open,
                                vec!["\"*/\"".to_string()],
                                "unterminated comment in code block",
                            ));
                        }
                        Some('*') if r.peek_at(1) == Some('/') => {
                            r.bump();
                            r.bump();
                            break;
                        }
                        _ => {
                            r.bump();
                        }
                    }
                }
            }
            _ => {
                r.bump();
            }
        }
    }
}

fn skip_embedded_string(
    r: &mut Reader,
    open: super::ast::Pos,
    quote: char,
) -> Result<(), SyntaxError> {
    loop {
        match r.peek() {
            None => {
                return Err(r.error_here(
                    open,
                    vec!["\"}\"".to_string()],
                    "unterminated string in code block",
                ));
            }
            Some('\\') => {
                r.bump();
                r.bump();
            }
            Some(c) => {
                r.bump();
                if c == quote {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(input: &str) -> Reader {
        Reader::new(input, None)
    }

    #[test]
    fn string_literals() {
        let mut r = reader("\"a\\nb\" rest");
        assert_eq!(string_literal(&mut r).unwrap(), Some("a\nb".to_string()));

        let mut r = reader("'x'");
        assert_eq!(string_literal(&mut r).unwrap(), Some("x".to_string()));

        let mut r = reader("x");
        assert_eq!(string_literal(&mut r).unwrap(), None);

        let mut r = reader("\"oops");
        assert!(string_literal(&mut r).is_err());
    }

    #[test]
    fn unicode_escapes() {
        let mut r = reader("\"\\u0041\\u{1F600}\"");
        assert_eq!(
            string_literal(&mut r).unwrap(),
            Some("A\u{1F600}".to_string())
        );
    }

    #[test]
    fn classes() {
        let mut r = reader("[a-z0]");
        let (parts, inverted) = character_class(&mut r).unwrap().unwrap();
        assert!(!inverted);
        assert_eq!(
            parts,
            vec![ClassPart::Range('a', 'z'), ClassPart::Single('0')]
        );

        let mut r = reader("[^\\n-]");
        let (parts, inverted) = character_class(&mut r).unwrap().unwrap();
        assert!(inverted);
        assert_eq!(
            parts,
            vec![ClassPart::Single('\n'), ClassPart::Single('-')]
        );
    }

    #[test]
    fn invalid_range_is_rejected() {
        let mut r = reader("[b-a]");
        let err = character_class(&mut r).unwrap_err();
        assert!(err.message().contains("well-ordered range"));
    }

    #[test]
    fn property_escape() {
        let mut r = reader("[\\p{L}\\P{N}]");
        let (parts, _) = character_class(&mut r).unwrap().unwrap();
        assert_eq!(
            parts,
            vec![
                ClassPart::Property {
                    name: "L".to_string(),
                    negated: false
                },
                ClassPart::Property {
                    name: "N".to_string(),
                    negated: true
                },
            ]
        );
    }

    #[test]
    fn identifiers_with_escapes() {
        let mut r = reader("plain rest");
        assert_eq!(
            identifier(&mut r).unwrap(),
            Some(("plain".to_string(), false))
        );

        let mut r = reader("\\u0069f");
        assert_eq!(identifier(&mut r).unwrap(), Some(("if".to_string(), true)));

        let mut r = reader("9nope");
        assert_eq!(identifier(&mut r).unwrap(), None);
    }

    #[test]
    fn code_blocks_balance_braces() {
        let mut r = reader("{ return { a: \"}\" }; } tail");
        let code = code_block(&mut r).unwrap().unwrap();
        assert_eq!(code.text, " return { a: \"}\" }; ");
    }

    #[test]
    fn code_block_comments() {
        let mut r = reader("{ // }\n return 1; }");
        let code = code_block(&mut r).unwrap().unwrap();
        assert_eq!(code.text, " // }\n return 1; ");
    }

    #[test]
    fn integers() {
        let mut r = reader("42x");
        assert_eq!(integer(&mut r), Some(42));
        let mut r = reader("x");
        assert_eq!(integer(&mut r), None);
    }
}
