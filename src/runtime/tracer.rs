//! Tracing hooks for rule entry and exit.

use super::ParsedValue;
use crate::compiler::ast::Location;

/// What happened to a rule invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventKind {
    RuleEnter,
    RuleMatch,
    RuleFail,
}

impl TraceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleEnter => "rule.enter",
            Self::RuleMatch => "rule.match",
            Self::RuleFail => "rule.fail",
        }
    }
}

/// One tracing event; `result` is only present for `rule.match`
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    pub rule: String,
    pub location: Location,
    pub result: Option<ParsedValue>,
}

/// Receives every tracing event of a parse
pub trait Tracer {
    fn trace(&mut self, event: &TraceEvent);
}

/// Prints one indented human-readable line per event
#[derive(Debug, Default)]
pub struct DefaultTracer {
    depth: usize,
}

impl Tracer for DefaultTracer {
    fn trace(&mut self, event: &TraceEvent) {
        if event.kind == TraceEventKind::RuleFail && self.depth > 0 {
            self.depth -= 1;
        }
        if event.kind == TraceEventKind::RuleMatch && self.depth > 0 {
            self.depth -= 1;
        }

        println!(
            "{}:{}-{}:{} {:10} {}{}",
            event.location.start.line,
            event.location.start.column,
            event.location.end.line,
            event.location.end.column,
            event.kind.as_str(),
            "  ".repeat(self.depth),
            event.rule,
        );

        if event.kind == TraceEventKind::RuleEnter {
            self.depth += 1;
        }
    }
}

/// Collects events for later inspection; mainly useful in tests
#[derive(Debug, Default)]
pub struct CollectingTracer {
    pub events: Vec<TraceEvent>,
}

impl Tracer for CollectingTracer {
    fn trace(&mut self, event: &TraceEvent) {
        self.events.push(event.clone());
    }
}
