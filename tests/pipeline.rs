//! End-to-end checks of the whole pipeline: grammar text through analysis
//! and bytecode generation into the executing parser.

use peggy::runtime::CollectingTracer;
use peggy::{
    generate, CompileError, Options, Output, OutputKind, ParseError, ParseOptions, ParsedValue,
    Parser, TraceEventKind,
};

const ARITHMETIC: &str = r#"
Expression
  = head:Term tail:(_ ("+" / "-") _ Term)* { return evalTail(head, tail); }

Term
  = head:Factor tail:(_ ("*" / "/") _ Factor)* { return evalTail(head, tail); }

Factor
  = "(" _ Expression _ ")"
  / Integer

Integer "integer"
  = [0-9]+ { return parseInt(text(), 10); }

_ = [ \t\n\r]*
"#;

fn compile(grammar: &str, configure: impl FnOnce(&mut Options)) -> Parser {
    let mut options = Options::default();
    configure(&mut options);
    match generate(grammar, options) {
        Ok(Output::Parser(parser)) => parser,
        Ok(_) => panic!("expected a parser output"),
        Err(err) => panic!("grammar should compile: {}", err),
    }
}

#[test]
fn arithmetic_recognition() {
    let parser = compile(ARITHMETIC, |_| {});

    // The structural result mirrors the grammar shape; what matters here is
    // that the full input is consumed
    assert!(parser.parse("2 * (3 + 4)").is_ok());
    assert!(parser.parse("12/6 - 4").is_ok());
    assert!(parser.parse("2 * (3 + )").is_err());
}

#[test]
fn arithmetic_failure_reports_integer_at_the_furthest_position() {
    let parser = compile(ARITHMETIC, |_| {});

    let err = parser.parse("2 +").unwrap_err();
    let failure = match err {
        ParseError::Failure(failure) => failure,
        other => panic!("expected a parse failure, got {}", other),
    };

    assert_eq!(failure.location().start.offset, 3);
    assert!(failure
        .expected()
        .iter()
        .any(|description| description == "integer"));
    assert_eq!(failure.found(), None);
    assert!(failure.message().ends_with("but end of input found."));
}

#[test]
fn single_literal_rule() {
    let parser = compile("start = 'a'", |_| {});

    assert_eq!(parser.parse("a").unwrap(), ParsedValue::Str("a".to_string()));

    let err = parser.parse("b").unwrap_err();
    assert!(err.to_string().contains("\"a\""));
}

#[test]
fn library_mode_returns_partial_progress() {
    let parser = compile("start = 'a'+", |_| {});

    let outcome = parser
        .parse_library("aab", ParseOptions::default())
        .unwrap();

    assert_eq!(
        outcome.result,
        Some(ParsedValue::Array(vec![
            ParsedValue::Str("a".to_string()),
            ParsedValue::Str("a".to_string()),
        ]))
    );
    assert!(!outcome.success);
    assert_eq!(outcome.curr_pos, 2);
    assert_eq!(outcome.max_fail_pos, 2);
    assert!(matches!(outcome.throw(), ParseError::Failure(_)));
}

#[test]
fn start_rule_selection_and_rejection() {
    let parser = compile("a = 'x'\nb = 'y'", |options| {
        options.allowed_start_rules = vec!["b".to_string()];
    });

    // The first allowed rule is the default
    assert!(parser.parse("y").is_ok());
    assert!(parser.parse("x").is_err());

    let err = parser
        .parse_with_options(
            "x",
            ParseOptions {
                start_rule: Some("a"),
                ..ParseOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ParseError::BadStartRule { name } if name == "a"));
}

#[test]
fn left_recursion_is_a_compile_error() {
    let err = generate("a = a 'x' / 'x'", Options::default()).unwrap_err();
    match err {
        CompileError::Semantic { problems } => {
            assert!(problems[0].message.contains("infinite recursion"));
        }
        other => panic!("expected a semantic error, got {}", other),
    }
}

#[test]
fn empty_string_repetition_is_a_compile_error() {
    let err = generate("a = ''*", Options::default()).unwrap_err();
    match err {
        CompileError::Semantic { problems } => {
            assert!(problems[0].message.contains("infinite loop"));
        }
        other => panic!("expected a semantic error, got {}", other),
    }
}

#[test]
fn bounded_repetition_stops_eagerly_and_enforces_the_minimum() {
    let parser = compile("start = 'a'|2..3|", |_| {});

    // Three items match and the fourth is left unconsumed
    let outcome = parser
        .parse_library("aaaa", ParseOptions::default())
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.curr_pos, 3);
    assert_eq!(
        outcome.result,
        Some(ParsedValue::Array(vec![
            ParsedValue::Str("a".to_string()),
            ParsedValue::Str("a".to_string()),
            ParsedValue::Str("a".to_string()),
        ]))
    );

    assert!(parser.parse("aaa").is_ok());
    assert!(parser.parse("a").is_err());
}

#[test]
fn delimited_repetition_never_commits_a_trailing_delimiter() {
    let parser = compile("start = [0-9]|1.., ','|", |_| {});

    assert_eq!(
        parser.parse("1,2,3").unwrap(),
        ParsedValue::Array(vec![
            ParsedValue::Str("1".to_string()),
            ParsedValue::Str("2".to_string()),
            ParsedValue::Str("3".to_string()),
        ])
    );

    let outcome = parser
        .parse_library("1,2,", ParseOptions::default())
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.curr_pos, 3);
}

#[test]
fn variable_boundaries_read_labels_at_parse_time() {
    let parser = compile("start = n:[0-9] 'a'|n|", |_| {});

    assert!(parser.parse("3aaa").is_ok());
    assert!(parser.parse("2aa").is_ok());
    assert!(parser.parse("3aa").is_err());
}

#[test]
fn plucks_select_the_sequence_value() {
    let parser = compile("start = '(' @[a-z] ')'", |_| {});
    assert_eq!(
        parser.parse("(k)").unwrap(),
        ParsedValue::Str("k".to_string())
    );

    let both = compile("start = @[a-z] '-' @[0-9]", |_| {});
    assert_eq!(
        both.parse("x-7").unwrap(),
        ParsedValue::Array(vec![
            ParsedValue::Str("x".to_string()),
            ParsedValue::Str("7".to_string()),
        ])
    );
}

#[test]
fn text_yields_the_matched_substring() {
    let parser = compile("start = $([a-z]+ [0-9]+)", |_| {});
    assert_eq!(
        parser.parse("abc42").unwrap(),
        ParsedValue::Str("abc42".to_string())
    );
}

#[test]
fn lookaheads_consume_nothing() {
    let parser = compile("start = &'a' .", |_| {});
    match parser.parse("a").unwrap() {
        ParsedValue::Array(items) => {
            assert_eq!(items[0], ParsedValue::Null);
            assert_eq!(items[1], ParsedValue::Str("a".to_string()));
        }
        other => panic!("expected a sequence result, got {:?}", other),
    }

    let negative = compile("start = !'b' .", |_| {});
    assert!(negative.parse("a").is_ok());
    assert!(negative.parse("b").is_err());
}

#[test]
fn semantic_predicates_gate_nothing_in_direct_execution() {
    // Predicate code is carried to emitted parsers, not evaluated here
    let parser = compile("start = &{ return options.enabled; } 'a'", |_| {});
    assert!(parser.parse("a").is_ok());
}

#[test]
fn ordered_choice_commits_to_the_first_match() {
    let parser = compile("start = a / b\na = 'x'\nb = 'x'", |options| {
        options.trace = true;
    });

    let mut tracer = CollectingTracer::default();
    parser
        .parse_with_options(
            "x",
            ParseOptions {
                tracer: Some(&mut tracer),
                ..ParseOptions::default()
            },
        )
        .unwrap();

    assert!(tracer
        .events
        .iter()
        .any(|e| e.rule == "a" && e.kind == TraceEventKind::RuleMatch));
    assert!(
        !tracer.events.iter().any(|e| e.rule == "b"),
        "the second alternative must never be attempted"
    );
}

#[test]
fn tracing_reports_enter_match_and_fail_with_locations() {
    let parser = compile("start = 'ab'\n", |options| {
        options.trace = true;
    });

    let mut tracer = CollectingTracer::default();
    parser
        .parse_with_options(
            "ab",
            ParseOptions {
                tracer: Some(&mut tracer),
                ..ParseOptions::default()
            },
        )
        .unwrap();

    assert_eq!(tracer.events.len(), 2);
    assert_eq!(tracer.events[0].kind, TraceEventKind::RuleEnter);
    assert_eq!(tracer.events[1].kind, TraceEventKind::RuleMatch);
    assert_eq!(tracer.events[1].location.start.offset, 0);
    assert_eq!(tracer.events[1].location.end.offset, 2);
    assert!(tracer.events[1].result.is_some());
}

#[test]
fn memoization_is_observationally_transparent() {
    let inputs = ["2 * (3 + 4)", "1+2+3", "((7))", "2 +", "", "x"];

    let plain = compile(ARITHMETIC, |_| {});
    let cached = compile(ARITHMETIC, |options| options.cache = true);

    for input in inputs {
        let a = plain.parse(input);
        let b = cached.parse(input);
        match (a, b) {
            (Ok(left), Ok(right)) => assert_eq!(left, right, "for {:?}", input),
            (Err(ParseError::Failure(left)), Err(ParseError::Failure(right))) => {
                assert_eq!(left.message(), right.message(), "for {:?}", input);
                assert_eq!(
                    left.location().start.offset,
                    right.location().start.offset,
                    "for {:?}",
                    input
                );
            }
            (left, right) => panic!("diverging outcomes for {:?}: {:?} vs {:?}", input, left, right),
        }
    }
}

#[test]
fn case_insensitive_literals_and_classes() {
    let parser = compile("start = 'ab'i [c-e]i", |_| {});
    match parser.parse("AbD").unwrap() {
        ParsedValue::Array(items) => {
            // The matched text keeps the input's case
            assert_eq!(items[0], ParsedValue::Str("Ab".to_string()));
            assert_eq!(items[1], ParsedValue::Str("D".to_string()));
        }
        other => panic!("expected a sequence result, got {:?}", other),
    }
}

#[test]
fn emitted_source_carries_actions_verbatim() {
    let output = generate(
        ARITHMETIC,
        Options {
            output: OutputKind::Source,
            ..Options::default()
        },
    )
    .expect("grammar should compile");

    let source = output.into_source().expect("requested source text");
    assert!(source.contains("return evalTail(head, tail);"));
    assert!(source.contains("function peg$parseExpression() {"));
    assert!(source.contains("peg$otherExpectation(\"integer\")"));
    assert!(source.contains("Expected "));
}

#[test]
fn fragments_compile_into_one_grammar() {
    let fragments = [
        peggy::SourceFragment::new(Some("main.peggy"), "start = item+"),
        peggy::SourceFragment::new(Some("items.peggy"), "item = [a-z]"),
    ];

    let output = peggy::generate_from_fragments(&fragments, Options::default())
        .expect("fragments should compile");
    let parser = output.into_parser().expect("requested a parser");
    assert!(parser.parse("abc").is_ok());
}

#[test]
fn consumed_prefix_matches_positions() {
    let parser = compile("start = 'ab' 'cd'?", |_| {});

    let outcome = parser
        .parse_library("abX", ParseOptions::default())
        .unwrap();
    assert_eq!(outcome.curr_pos, 2);
    assert!(!outcome.success);
}
