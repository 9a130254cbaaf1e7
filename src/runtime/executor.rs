//! The bytecode interpreter behind [`Parser`](super::Parser).
//!
//! Execution state lives in a [`Machine`] allocated fresh for every parse:
//! the current position, the value stack, the silent-failure counter, the
//! furthest-failure record and the optional memoization table. Separate
//! parses therefore never share state.

use super::errors::{ParseError, ParseFailure};
use super::tracer::{DefaultTracer, TraceEvent, TraceEventKind, Tracer};
use super::{ParsedValue, Parser};
use crate::compiler::ast::{ClassPart, Location, Pos};
use crate::compiler::bytecode::{BoundaryRef, ClassDesc, Insn, Program};
use crate::compiler::utils::sort_expected;
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

/// Recorded instead of a pool index when the top level expects end of input
const END_OF_INPUT: usize = usize::MAX;

/// A character class compiled for execution
///
/// Plain characters and ranges are tested directly; `\p{…}` property parts
/// are folded into one compiled regular expression.
#[derive(Debug)]
pub(crate) struct CompiledClass {
    ranges: Vec<(char, char)>,
    properties: Option<Regex>,
    inverted: bool,
    ignore_case: bool,
}

impl CompiledClass {
    pub(crate) fn compile(desc: &ClassDesc) -> Result<Self, regex::Error> {
        let mut ranges = Vec::new();
        let mut property_pattern = String::new();

        for part in &desc.parts {
            match part {
                ClassPart::Single(c) => ranges.push((*c, *c)),
                ClassPart::Range(lo, hi) => ranges.push((*lo, *hi)),
                ClassPart::Property { name, negated } => {
                    property_pattern.push('\\');
                    property_pattern.push(if *negated { 'P' } else { 'p' });
                    property_pattern.push('{');
                    property_pattern.push_str(name);
                    property_pattern.push('}');
                }
            }
        }

        let properties = if property_pattern.is_empty() {
            None
        } else {
            let flags = if desc.ignore_case { "(?i)" } else { "" };
            Some(Regex::new(&format!("{}[{}]", flags, property_pattern))?)
        };

        Ok(Self {
            ranges,
            properties,
            inverted: desc.inverted,
            ignore_case: desc.ignore_case,
        })
    }

    fn in_ranges(&self, c: char) -> bool {
        self.ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c))
    }

    pub(crate) fn matches(&self, c: char) -> bool {
        let mut hit = self.in_ranges(c);

        if !hit && self.ignore_case {
            hit = c.to_lowercase().any(|v| self.in_ranges(v))
                || c.to_uppercase().any(|v| self.in_ranges(v));
        }

        if !hit {
            if let Some(re) = &self.properties {
                hit = re.is_match(c.encode_utf8(&mut [0u8; 4]));
            }
        }

        hit != self.inverted
    }
}

/// One slot of the value stack
#[derive(Debug, Clone)]
enum Slot {
    Failed,
    Pos(usize),
    Value(ParsedValue),
}

impl Slot {
    fn is_failed(&self) -> bool {
        matches!(self, Slot::Failed)
    }

    fn into_value(self) -> ParsedValue {
        match self {
            Slot::Value(v) => v,
            other => unreachable!("expected a value slot, found {:?}", other),
        }
    }

    fn into_pos(self) -> usize {
        match self {
            Slot::Pos(p) => p,
            other => unreachable!("expected a position slot, found {:?}", other),
        }
    }
}

/// The overall result of one machine run
pub(crate) struct Outcome {
    pub value: Option<ParsedValue>,
    pub curr_pos: usize,
    pub success: bool,
    pub max_fail_pos: usize,
    pub max_fail_expected: Vec<String>,
    pub failure: ParseFailure,
}

/// Run one parse from the given start rule
pub(crate) fn run(
    parser: &Parser,
    input: &str,
    start_rule: usize,
    source: Option<&str>,
    tracer: Option<&mut dyn Tracer>,
) -> Result<Outcome, ParseError> {
    let mut machine = Machine {
        program: parser.program(),
        classes: parser.classes(),
        input,
        pos: 0,
        stack: Vec::new(),
        silent: 0,
        max_fail_pos: 0,
        max_fail_expected: Vec::new(),
        cache: parser.cache_enabled().then(HashMap::new),
        trace: parser.trace_enabled(),
        tracer,
        default_tracer: DefaultTracer::default(),
        source: source.map(Rc::from),
        line_starts: None,
    };

    let slot = machine.call_rule(start_rule)?;

    let (value, success) = match slot {
        Slot::Value(value) => {
            let complete = machine.pos == input.len();
            if !complete {
                // A successful prefix match still fails the parse
                machine.fail(END_OF_INPUT);
            }
            (Some(value), complete)
        }
        _ => (None, false),
    };

    let max_fail_expected = machine.expected_descriptions();
    let failure = machine.build_failure();

    Ok(Outcome {
        value,
        curr_pos: machine.pos,
        success,
        max_fail_pos: machine.max_fail_pos,
        max_fail_expected,
        failure,
    })
}

struct Machine<'r, 't> {
    program: &'r Program,
    classes: &'r [CompiledClass],
    input: &'r str,
    pos: usize,
    stack: Vec<Slot>,
    silent: u32,
    max_fail_pos: usize,
    max_fail_expected: Vec<usize>,
    /// Per-parse memoization keyed by (rule, position)
    cache: Option<HashMap<(usize, usize), (usize, Option<ParsedValue>)>>,
    trace: bool,
    tracer: Option<&'t mut dyn Tracer>,
    default_tracer: DefaultTracer,
    source: Option<Rc<str>>,
    line_starts: Option<Vec<usize>>,
}

impl Machine<'_, '_> {
    fn call_rule(&mut self, index: usize) -> Result<Slot, ParseError> {
        let program = self.program;
        let rule = &program.rules[index];
        let start = self.pos;

        self.trace_event(TraceEventKind::RuleEnter, &rule.name, start, start, None);

        if let Some(cache) = &mut self.cache {
            if let Some((next, value)) = cache.get(&(index, start)).cloned() {
                self.pos = next;
                let slot = match value {
                    Some(value) => Slot::Value(value),
                    None => Slot::Failed,
                };
                self.trace_exit(&rule.name, start, &slot);
                return Ok(slot);
            }
        }

        self.exec_block(&rule.code)?;
        let slot = match self.stack.pop() {
            Some(slot) => slot,
            None => unreachable!("rule body left the stack empty"),
        };

        if let Some(cache) = &mut self.cache {
            let value = match &slot {
                Slot::Value(value) => Some(value.clone()),
                _ => None,
            };
            cache.insert((index, start), (self.pos, value));
        }

        self.trace_exit(&rule.name, start, &slot);
        Ok(slot)
    }

    fn exec_block(&mut self, code: &[Insn]) -> Result<(), ParseError> {
        for insn in code {
            match insn {
                Insn::PushNull => self.stack.push(Slot::Value(ParsedValue::Null)),
                Insn::PushFailed => self.stack.push(Slot::Failed),
                Insn::PushEmptyArray => {
                    self.stack.push(Slot::Value(ParsedValue::Array(vec![])));
                }
                Insn::PushEmptyString => {
                    self.stack.push(Slot::Value(ParsedValue::Str(String::new())));
                }
                Insn::PushCurrPos => self.stack.push(Slot::Pos(self.pos)),

                Insn::Pop => {
                    self.stack.pop();
                }
                Insn::PopN(n) => {
                    let len = self.stack.len() - n;
                    self.stack.truncate(len);
                }
                Insn::Nip => {
                    let top = self.stack.pop();
                    self.stack.pop();
                    if let Some(top) = top {
                        self.stack.push(top);
                    }
                }
                Insn::PopCurrPos => {
                    let saved = self.stack.pop();
                    if let Some(saved) = saved {
                        self.pos = saved.into_pos();
                    }
                }

                Insn::WrapN(n) => {
                    let at = self.stack.len() - n;
                    let values = self
                        .stack
                        .split_off(at)
                        .into_iter()
                        .map(Slot::into_value)
                        .collect();
                    self.stack.push(Slot::Value(ParsedValue::Array(values)));
                }
                Insn::PluckN { count, picks } => {
                    let at = self.stack.len() - count;
                    let mut values: Vec<ParsedValue> = self
                        .stack
                        .split_off(at)
                        .into_iter()
                        .map(Slot::into_value)
                        .collect();
                    let value = if picks.len() == 1 {
                        values.swap_remove(picks[0])
                    } else {
                        ParsedValue::Array(
                            picks
                                .iter()
                                .map(|&i| std::mem::replace(&mut values[i], ParsedValue::Null))
                                .collect(),
                        )
                    };
                    self.stack.push(Slot::Value(value));
                }
                Insn::TextFromSaved => {
                    let start = match self.stack.pop() {
                        Some(slot) => slot.into_pos(),
                        None => unreachable!("text needs a saved position"),
                    };
                    self.stack.push(Slot::Value(ParsedValue::Str(
                        self.input[start..self.pos].to_string(),
                    )));
                }

                Insn::MatchAny { expectation } => match self.input[self.pos..].chars().next() {
                    Some(c) => {
                        self.pos += c.len_utf8();
                        self.stack.push(Slot::Value(ParsedValue::Str(c.to_string())));
                    }
                    None => {
                        self.fail(*expectation);
                        self.stack.push(Slot::Failed);
                    }
                },

                Insn::MatchLiteral {
                    literal,
                    ignore_case,
                    expectation,
                } => {
                    let text = &self.program.literals[*literal];
                    let matched_len = if *ignore_case {
                        let n = text.chars().count();
                        let candidate: String =
                            self.input[self.pos..].chars().take(n).collect();
                        if candidate.chars().count() == n
                            && candidate.to_lowercase() == text.to_lowercase()
                        {
                            Some(candidate.len())
                        } else {
                            None
                        }
                    } else if self.input[self.pos..].starts_with(text.as_str()) {
                        Some(text.len())
                    } else {
                        None
                    };

                    match matched_len {
                        Some(len) => {
                            let matched = self.input[self.pos..self.pos + len].to_string();
                            self.pos += len;
                            self.stack.push(Slot::Value(ParsedValue::Str(matched)));
                        }
                        None => {
                            self.fail(*expectation);
                            self.stack.push(Slot::Failed);
                        }
                    }
                }

                Insn::MatchClass { class, expectation } => {
                    match self.input[self.pos..].chars().next() {
                        Some(c) if self.classes[*class].matches(c) => {
                            self.pos += c.len_utf8();
                            self.stack.push(Slot::Value(ParsedValue::Str(c.to_string())));
                        }
                        _ => {
                            self.fail(*expectation);
                            self.stack.push(Slot::Failed);
                        }
                    }
                }

                Insn::Fail { expectation } => {
                    self.fail(*expectation);
                    self.stack.push(Slot::Failed);
                }

                Insn::CallRule { rule } => {
                    let slot = self.call_rule(*rule)?;
                    self.stack.push(slot);
                }

                // Imported parsers are a link-time concern of emitted code;
                // the interpreter reports the delegated rule as expected
                Insn::CallLibrary { expectation, .. } => {
                    self.fail(*expectation);
                    self.stack.push(Slot::Failed);
                }

                Insn::CallAction {
                    discard, function, ..
                } => {
                    let at = self.stack.len() - discard;
                    let mut group = self.stack.split_off(at);
                    let _saved = group.remove(0);
                    let mut results: Vec<ParsedValue> =
                        group.into_iter().map(Slot::into_value).collect();

                    // The action body is opaque text; its structural stand-in
                    // is the matched value itself
                    debug_assert!(!self.program.functions[*function].predicate);
                    let value = if results.len() == 1 {
                        results.pop().unwrap_or(ParsedValue::Null)
                    } else {
                        ParsedValue::Array(results)
                    };
                    self.stack.push(Slot::Value(value));
                }

                // Predicate code is never evaluated here; the gate resolves
                // to a match either way
                Insn::CallPredicate { .. } => {
                    self.stack.push(Slot::Value(ParsedValue::Null));
                }

                Insn::SilentFailsOn => self.silent += 1,
                Insn::SilentFailsOff => self.silent = self.silent.saturating_sub(1),

                Insn::IfError { then, otherwise } => {
                    if self.top_failed() {
                        self.exec_block(then)?;
                    } else {
                        self.exec_block(otherwise)?;
                    }
                }
                Insn::IfNotError { then, otherwise } => {
                    if self.top_failed() {
                        self.exec_block(otherwise)?;
                    } else {
                        self.exec_block(then)?;
                    }
                }

                Insn::RepeatStar { element, guard } => {
                    self.repeat_greedy(element, *guard, false)?;
                }
                Insn::RepeatPlus { element, guard } => {
                    self.repeat_greedy(element, *guard, true)?;
                }
                Insn::RepeatRange {
                    element,
                    delimiter,
                    min,
                    max,
                    guard,
                } => {
                    self.repeat_range(element, delimiter.as_deref(), min, max, *guard)?;
                }
            }
        }

        Ok(())
    }

    /// `*` and `+`: collect matches until the element fails
    fn repeat_greedy(
        &mut self,
        element: &[Insn],
        guard: bool,
        require_one: bool,
    ) -> Result<(), ParseError> {
        let entry_pos = self.pos;
        self.stack.push(Slot::Value(ParsedValue::Array(vec![])));
        let mut matched = 0usize;

        loop {
            let before = self.pos;
            self.exec_block(element)?;

            if self.top_failed() {
                self.stack.pop();
                break;
            }

            if guard && self.pos == before {
                // A zero-width iteration would never terminate; the whole
                // repetition fails instead
                self.stack.pop();
                self.stack.pop();
                self.pos = entry_pos;
                self.stack.push(Slot::Failed);
                return Ok(());
            }

            let value = match self.stack.pop() {
                Some(slot) => slot.into_value(),
                None => unreachable!("repetition element left the stack empty"),
            };
            match self.stack.last_mut() {
                Some(Slot::Value(ParsedValue::Array(items))) => items.push(value),
                _ => unreachable!("repetition accumulator missing"),
            }
            matched += 1;
        }

        if require_one && matched == 0 {
            self.stack.pop();
            self.stack.push(Slot::Failed);
        }

        Ok(())
    }

    /// `|min..max|` with an optional delimiter between items
    fn repeat_range(
        &mut self,
        element: &[Insn],
        delimiter: Option<&[Insn]>,
        min: &BoundaryRef,
        max: &BoundaryRef,
        guard: bool,
    ) -> Result<(), ParseError> {
        let entry_pos = self.pos;
        let min = self.eval_boundary(min, false)?.unwrap_or(0);
        let max = self.eval_boundary(max, true)?;

        self.stack.push(Slot::Value(ParsedValue::Array(vec![])));
        let mut count: u64 = 0;

        loop {
            if max == Some(count) {
                break;
            }

            // The delimiter is rolled back when no further item follows it
            let iteration_start = self.pos;
            if count > 0 {
                if let Some(delimiter) = delimiter {
                    self.exec_block(delimiter)?;
                    if self.top_failed() {
                        self.stack.pop();
                        break;
                    }
                    self.stack.pop();
                }
            }

            self.exec_block(element)?;
            if self.top_failed() {
                self.stack.pop();
                self.pos = iteration_start;
                break;
            }

            if guard && self.pos == iteration_start {
                self.stack.pop();
                self.stack.pop();
                self.pos = entry_pos;
                self.stack.push(Slot::Failed);
                return Ok(());
            }

            let value = match self.stack.pop() {
                Some(slot) => slot.into_value(),
                None => unreachable!("repetition element left the stack empty"),
            };
            match self.stack.last_mut() {
                Some(Slot::Value(ParsedValue::Array(items))) => items.push(value),
                _ => unreachable!("repetition accumulator missing"),
            }
            count += 1;
        }

        if count < min {
            self.stack.pop();
            self.pos = entry_pos;
            self.stack.push(Slot::Failed);
        }

        Ok(())
    }

    fn eval_boundary(
        &mut self,
        boundary: &BoundaryRef,
        upper: bool,
    ) -> Result<Option<u64>, ParseError> {
        match boundary {
            BoundaryRef::Constant(value) => Ok(*value),
            BoundaryRef::SlotFromTop(offset) => {
                let index = self.stack.len() - 1 - offset;
                match &self.stack[index] {
                    Slot::Value(ParsedValue::Str(text)) => {
                        text.trim().parse::<u64>().map(Some).map_err(|_| {
                            ParseError::Boundary {
                                message: format!(
                                    "Repetition boundary value {:?} is not a number",
                                    text
                                ),
                            }
                        })
                    }
                    Slot::Value(ParsedValue::Null) => Ok(if upper { None } else { Some(0) }),
                    _ => Err(ParseError::Boundary {
                        message: "Repetition boundary label does not hold a number".to_string(),
                    }),
                }
            }
            // Code boundaries are evaluated by the host of an emitted
            // parser; here they stay unconstrained
            BoundaryRef::Function(_) => Ok(if upper { None } else { Some(0) }),
        }
    }

    fn top_failed(&self) -> bool {
        matches!(self.stack.last(), Some(slot) if slot.is_failed())
    }

    /// Record an expectation at the current position, unless inside a
    /// lookahead or before the furthest failure seen so far
    fn fail(&mut self, expectation: usize) {
        if self.silent > 0 || self.pos < self.max_fail_pos {
            return;
        }
        if self.pos > self.max_fail_pos {
            self.max_fail_pos = self.pos;
            self.max_fail_expected.clear();
        }
        self.max_fail_expected.push(expectation);
    }

    fn expected_descriptions(&self) -> Vec<String> {
        sort_expected(
            self.max_fail_expected
                .iter()
                .map(|&i| {
                    if i == END_OF_INPUT {
                        "end of input".to_string()
                    } else {
                        self.program.expectations[i].describe()
                    }
                })
                .collect(),
        )
    }

    fn build_failure(&mut self) -> ParseFailure {
        let expected = self.expected_descriptions();
        let found = self.input[self.max_fail_pos..].chars().next();

        let start = self.pos_at(self.max_fail_pos);
        let end = match found {
            Some(c) => self.pos_at(self.max_fail_pos + c.len_utf8()),
            None => start,
        };

        ParseFailure::new(
            Location::new(self.source.clone(), start, end),
            expected,
            found.map(|c| c.to_string()),
        )
    }

    fn pos_at(&mut self, offset: usize) -> Pos {
        if self.line_starts.is_none() {
            let mut starts = vec![0];
            for (i, b) in self.input.bytes().enumerate() {
                if b == b'\n' {
                    starts.push(i + 1);
                }
            }
            self.line_starts = Some(starts);
        }

        let starts = self.line_starts.as_ref().expect("built above");
        let line = starts.partition_point(|&s| s <= offset) - 1;
        let column = self.input[starts[line]..offset].chars().count() + 1;
        Pos::new(offset, line + 1, column)
    }

    fn trace_event(
        &mut self,
        kind: TraceEventKind,
        rule: &str,
        start: usize,
        end: usize,
        result: Option<&ParsedValue>,
    ) {
        if !self.trace {
            return;
        }

        let location = Location::new(self.source.clone(), self.pos_at(start), self.pos_at(end));
        let event = TraceEvent {
            kind,
            rule: rule.to_string(),
            location,
            result: result.cloned(),
        };

        match &mut self.tracer {
            Some(tracer) => tracer.trace(&event),
            None => self.default_tracer.trace(&event),
        }
    }

    fn trace_exit(&mut self, rule: &str, start: usize, slot: &Slot) {
        match slot {
            Slot::Value(value) => {
                let end = self.pos;
                let value = value.clone();
                self.trace_event(TraceEventKind::RuleMatch, rule, start, end, Some(&value));
            }
            _ => self.trace_event(TraceEventKind::RuleFail, rule, start, start, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::Expectation;

    #[test]
    fn compiled_class_ranges() {
        let class = CompiledClass::compile(&ClassDesc {
            parts: vec![ClassPart::Range('a', 'z'), ClassPart::Single('_')],
            inverted: false,
            ignore_case: false,
            unicode: false,
        })
        .unwrap();

        assert!(class.matches('m'));
        assert!(class.matches('_'));
        assert!(!class.matches('A'));
    }

    #[test]
    fn compiled_class_inverted_and_case_insensitive() {
        let class = CompiledClass::compile(&ClassDesc {
            parts: vec![ClassPart::Range('a', 'f')],
            inverted: false,
            ignore_case: true,
            unicode: false,
        })
        .unwrap();
        assert!(class.matches('C'));
        assert!(!class.matches('g'));

        let inverted = CompiledClass::compile(&ClassDesc {
            parts: vec![ClassPart::Single('x')],
            inverted: true,
            ignore_case: false,
            unicode: false,
        })
        .unwrap();
        assert!(inverted.matches('y'));
        assert!(!inverted.matches('x'));
    }

    #[test]
    fn compiled_class_unicode_property() {
        let class = CompiledClass::compile(&ClassDesc {
            parts: vec![ClassPart::Property {
                name: "L".to_string(),
                negated: false,
            }],
            inverted: false,
            ignore_case: false,
            unicode: true,
        })
        .unwrap();

        assert!(class.matches('é'));
        assert!(class.matches('x'));
        assert!(!class.matches('3'));
    }

    #[test]
    fn expectation_pool_descriptions_stay_stable() {
        let expectations = [
            Expectation::Literal {
                text: "b".to_string(),
                ignore_case: false,
            },
            Expectation::Literal {
                text: "a".to_string(),
                ignore_case: false,
            },
        ];
        let described = sort_expected(expectations.iter().map(|e| e.describe()).collect());
        assert_eq!(described, vec!["\"a\"", "\"b\""]);
    }
}
