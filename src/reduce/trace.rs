use itertools::Itertools;

use crate::sample::trace::{LassoTrace, LtlTask, State};

use super::ReductionStats;

/// Smallest `l` dividing `states.len()` such that the sequence is `l`-periodic.
pub fn minimal_period(states: &[State]) -> usize {
    let n = states.len();
    (1..=n)
        .filter(|l| n % l == 0)
        .find(|&l| (l..n).all(|i| states[i] == states[i % l]))
        .unwrap_or(n)
}

/// Canonical representation of the infinite word a trace denotes: the loop is
/// cut down to its minimal period, then states are rotated from the end of the
/// prefix into the loop for as long as they coincide with the loop's tail.
pub fn reduce_trace(trace: &LassoTrace) -> LassoTrace {
    let mut prefix = trace.prefix().to_vec();
    let mut lasso = trace.lasso().to_vec();
    if lasso.is_empty() {
        return LassoTrace::new(prefix, lasso);
    }
    lasso.truncate(minimal_period(&lasso));
    while prefix.last().is_some() && prefix.last() == lasso.last() {
        prefix.pop();
        lasso.rotate_right(1);
    }
    LassoTrace::new(prefix, lasso)
}

/// Reduces every trace and drops duplicates within each polarity.
pub fn reduce_task(task: &LtlTask) -> (LtlTask, ReductionStats) {
    let reduce_all = |traces: &[LassoTrace]| -> Vec<LassoTrace> {
        traces.iter().map(reduce_trace).unique().collect()
    };
    let reduced = LtlTask {
        positives: reduce_all(&task.positives),
        negatives: reduce_all(&task.negatives),
        ..task.clone()
    };
    let stats = ReductionStats::new(
        (task.positives.len(), task.negatives.len()),
        (reduced.positives.len(), reduced.negatives.len()),
    );
    (reduced, stats)
}

/// True when some reduced trace is labelled both positive and negative.
pub fn is_contradictory(reduced: &LtlTask) -> bool {
    reduced.positives.iter().any(|p| reduced.negatives.contains(p))
}
