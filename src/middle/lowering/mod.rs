//! Lowering of analyzed programs into the restricted tree the XIL compiler
//! accepts. Control flow normalization runs first, then the peephole
//! optimizer; each is repeated until a pass makes no rewrites.

use tracing::{debug, trace, trace_span, warn};

use crate::{
    config::Config,
    frontend::ast::{Item, Program},
    middle::{optimization::peephole::peephole, ty::TypeArena},
};

use self::control_flow::lower_control_flow;

pub mod control_flow;

/// Rewrites performed per stage, summed over all items
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoweringReport {
    pub control_flow: usize,
    pub peephole: usize,
}

pub fn lower_program(program: &mut Program, types: &TypeArena, config: &Config) -> LoweringReport {
    let Program { items, scopes, .. } = program;
    let scopes = &*scopes;
    let limit = config.max_lowering_iterations;

    let mut report = LoweringReport::default();

    for item in items.iter_mut() {
        match item {
            Item::Function(function) => {
                let _span = trace_span!("lower", function = function.name.value()).entered();

                report.control_flow += run_to_fixpoint(limit, || {
                    lower_control_flow(&mut function.body, &mut function.next_label_id, types, scopes)
                });
                report.peephole += run_to_fixpoint(limit, || peephole(&mut function.body, types));
            }
            Item::Global(global) => {
                // Globals contain no loops, only array initializers to expand
                let mut next_label_id = 0;

                report.control_flow += run_to_fixpoint(limit, || {
                    lower_control_flow(&mut global.statement, &mut next_label_id, types, scopes)
                });
            }
        }
    }

    debug!(?report, "lowered program");

    report
}

/// Repeats `pass` until it reports no rewrites. Returns the total rewrites.
pub fn run_to_fixpoint(limit: usize, mut pass: impl FnMut() -> usize) -> usize {
    let mut total = 0;

    for iteration in 0..limit {
        let rewrites = pass();
        trace!(iteration, rewrites, "lowering pass");

        if rewrites == 0 {
            return total;
        }

        total += rewrites;
    }

    warn!(limit, "lowering stopped before reaching a fixpoint");

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixpoint_stops_at_the_first_quiet_pass() {
        let mut scores = vec![3, 1, 0, 5].into_iter();
        let mut calls = 0;

        let total = run_to_fixpoint(10, || {
            calls += 1;
            scores.next().unwrap_or(0)
        });

        assert_eq!(total, 4);
        assert_eq!(calls, 3);
    }

    #[test]
    fn fixpoint_respects_the_iteration_limit() {
        let mut calls = 0;

        let total = run_to_fixpoint(4, || {
            calls += 1;
            1
        });

        assert_eq!(total, 4);
        assert_eq!(calls, 4);
    }
}
