//! Static analysis passes.
//!
//! Passes run in a fixed order; later passes may rely on the invariants the
//! earlier ones established. Each pass records its findings in the
//! [`Session`](super::session::Session), and the pipeline stops as soon as
//! a pass has recorded an error.

mod bounds;
mod labels;
mod loops;
mod refs;

pub use loops::{compute_nullability, expression_nullable, match_result_of};

use super::ast::Grammar;
use super::session::Session;
use super::Options;
use std::rc::Rc;

/// A single analysis pass
#[derive(Clone)]
pub struct Pass {
    pub name: &'static str,
    pub run: PassFn,
}

pub type PassFn = Rc<dyn Fn(&mut Grammar, &Options, &mut Session)>;

impl Pass {
    pub fn new(
        name: &'static str,
        run: impl Fn(&mut Grammar, &Options, &mut Session) + 'static,
    ) -> Self {
        Self {
            name,
            run: Rc::new(run),
        }
    }
}

/// The pass lists plugins may extend: well-formedness checks first, then
/// annotating rewrites
pub struct Stages {
    pub check: Vec<Pass>,
    pub transform: Vec<Pass>,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            check: vec![
                Pass::new("report-undefined-rules", refs::report_undefined_rules),
                Pass::new("report-duplicate-rules", refs::report_duplicate_rules),
                Pass::new("report-duplicate-imports", refs::report_duplicate_imports),
                Pass::new("report-infinite-loops", loops::report_infinite_loops),
                Pass::new("report-infinite-recursion", loops::report_infinite_recursion),
                Pass::new("report-incorrect-plucks", labels::report_incorrect_plucks),
                Pass::new("report-duplicate-labels", labels::report_duplicate_labels),
                Pass::new("report-unused-rules", bounds::report_unused_rules),
                Pass::new("check-allowed-start-rules", bounds::check_allowed_start_rules),
                Pass::new("report-reserved-words", labels::report_reserved_words),
                Pass::new(
                    "validate-repetition-boundaries",
                    bounds::validate_repetition_boundaries,
                ),
            ],
            transform: vec![Pass::new(
                "inference-match-result",
                loops::inference_match_result,
            )],
        }
    }
}
