//! LTL over lasso traces. Formulas are evaluated at `(example, time)`
//! points; the trace data becomes the fact relations `value`, `succ` and
//! `reach`.

use std::collections::{BTreeSet, HashMap};

use super::{Encoding, Logic, Point, Sample, Semantics, Sharing, Skeleton};
use crate::error::{Error, Result};
use crate::formula::{Formula, Operator, LTL_OPERATORS};
use crate::problem::{AtomId, Constraint, ProblemBuilder, RelId, Role};
use crate::sample::trace::{LassoTrace, LtlTask};
use crate::solver::Valuation;

const LITERAL: &str = "Lit";
const TIME: &str = "Time";
const EXAMPLE: &str = "Example";

pub struct LtlLogic {
    task: LtlTask,
}

impl LtlLogic {
    pub fn new(task: LtlTask) -> Self {
        LtlLogic { task }
    }

    pub fn task(&self) -> &LtlTask {
        &self.task
    }

    fn traces(&self) -> impl Iterator<Item = &LassoTrace> {
        self.task.positives.iter().chain(&self.task.negatives)
    }
}

/// Atoms of one sort in declaration order.
fn atoms(b: &ProblemBuilder, sort: &str) -> Vec<AtomId> {
    b.universe().of_sort(sort).collect()
}

/// Temporal semantics for one encoding.
struct LtlSemantics<'a> {
    literals: Vec<AtomId>,
    times: Vec<AtomId>,
    traces: HashMap<AtomId, &'a LassoTrace>,
    label: RelId,
    value: RelId,
    succ: RelId,
    reach: RelId,
}

impl Semantics for LtlSemantics<'_> {
    fn body(
        &self,
        b: &ProblemBuilder,
        s: &Skeleton,
        n: usize,
        op: &'static Operator,
        point: &[AtomId],
    ) -> Result<Constraint> {
        let (ex, t) = (point[0], point[1]);
        let times = &self.times;
        let at = |t2: AtomId| -> Point { vec![ex, t2] };
        let body = match op.name {
            "Literal" => Constraint::or(self.literals.iter().map(|&lit| {
                Constraint::and([b.member(self.label, &[s.nodes[n], lit]), b.member(self.value, &[ex, t, lit])])
            })),
            "Next" => Constraint::or(
                times
                    .iter()
                    .map(|&t2| Constraint::and([b.member(self.succ, &[ex, t, t2]), s.lval(b, n, &at(t2))])),
            ),
            "Eventually" => Constraint::or(
                times
                    .iter()
                    .map(|&t2| Constraint::and([b.member(self.reach, &[ex, t, t2]), s.lval(b, n, &at(t2))])),
            ),
            "Globally" => Constraint::and(
                times
                    .iter()
                    .map(|&t2| Constraint::implies(b.member(self.reach, &[ex, t, t2]), s.lval(b, n, &at(t2)))),
            ),
            "Until" => {
                let trace = self
                    .traces
                    .get(&ex)
                    .ok_or_else(|| Error::MalformedProblem("point outside the examples".into()))?;
                let i = times
                    .iter()
                    .position(|x| *x == t)
                    .ok_or_else(|| Error::MalformedProblem("point outside the time axis".into()))?;
                // the left operand is only required strictly between i and j
                Constraint::or(trace.forward(i).into_iter().map(|j| {
                    Constraint::and(
                        std::iter::once(s.rval(b, n, &at(times[j])))
                            .chain(trace.path(i, j).into_iter().skip(1).map(|k| s.lval(b, n, &at(times[k])))),
                    )
                }))
            }
            other => {
                return Err(Error::MalformedProblem(format!(
                    "no LTL semantics for operator {other}"
                )))
            }
        };
        Ok(body)
    }
}

impl Logic for LtlLogic {
    fn name(&self) -> &'static str {
        "LTL"
    }

    fn operators(&self) -> &'static [Operator] {
        &LTL_OPERATORS
    }

    fn excluded(&self) -> &BTreeSet<String> {
        &self.task.excluded
    }

    fn sharing(&self) -> Sharing {
        Sharing::Dag
    }

    fn max_nodes(&self) -> usize {
        self.task.max_nodes
    }

    fn vocabulary_size(&self) -> usize {
        self.task.literals.len()
    }

    fn custom_constraints(&self) -> Option<&str> {
        self.task.custom_constraints.as_deref()
    }

    fn declare(&self, b: &mut ProblemBuilder, _bound: usize) -> Result<(Vec<Point>, Vec<Sample>)> {
        let literals: Vec<AtomId> = self
            .task
            .literals
            .iter()
            .map(|name| b.atom(format!("lit_{name}"), name.as_str(), LITERAL))
            .collect();
        let horizon = self.traces().map(LassoTrace::len).max().unwrap_or(0);
        let times: Vec<AtomId> = (0..horizon).map(|t| b.atom(format!("t{t}"), format!("t{t}"), TIME)).collect();

        let value = b.relation("value", 3, Role::Fact);
        let succ = b.relation("succ", 3, Role::Fact);
        let reach = b.relation("reach", 3, Role::Fact);

        let mut points = vec![];
        let mut samples = vec![];
        let polarities = self
            .task
            .positives
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("+{i}"), true, t))
            .chain(self.task.negatives.iter().enumerate().map(|(i, t)| (format!("-{i}"), false, t)));
        for (index, (surface, positive, trace)) in polarities.enumerate() {
            let ex = b.atom(format!("ex{index}"), surface, EXAMPLE);
            for t in 0..trace.len() {
                for (l, lit) in literals.iter().enumerate() {
                    if trace.state(t).get(l) {
                        b.include(value, vec![ex, times[t], *lit]);
                    }
                }
                if let Some(next) = trace.successor(t) {
                    b.include(succ, vec![ex, times[t], times[next]]);
                }
                for later in trace.forward(t) {
                    b.include(reach, vec![ex, times[t], times[later]]);
                }
                points.push(vec![ex, times[t]]);
            }
            samples.push(Sample {
                root: vec![ex, times[0]],
                positive,
            });
        }
        Ok((points, samples))
    }

    fn well_formed(&self, b: &mut ProblemBuilder, s: &Skeleton) -> Result<()> {
        let literals = atoms(b, LITERAL);
        let label = b.relation("label", 2, Role::Primary);
        for &n in &s.nodes {
            for &lit in &literals {
                b.allow(label, vec![n, lit]);
            }
        }
        for n in 0..s.bound {
            let labels: Vec<Constraint> = literals.iter().map(|l| b.member(label, &[s.nodes[n], *l])).collect();
            let is_literal = s.is(b, n, "Literal");
            b.assert(Constraint::implies(is_literal.clone(), Constraint::exactly(1, labels.clone())));
            b.assert(Constraint::implies(
                Constraint::not(is_literal),
                Constraint::and(labels.into_iter().map(Constraint::not)),
            ));
            // one node per literal; parents share it
            for m in n + 1..s.bound {
                for &lit in &literals {
                    let twice = Constraint::and([
                        b.member(label, &[s.nodes[n], lit]),
                        b.member(label, &[s.nodes[m], lit]),
                    ]);
                    b.assert(Constraint::not(twice));
                }
            }
        }
        Ok(())
    }

    fn semantics<'a>(&'a self, b: &ProblemBuilder) -> Result<Box<dyn Semantics + 'a>> {
        let examples = atoms(b, EXAMPLE);
        // examples are declared in trace order
        let traces = self.traces().collect::<Vec<_>>();
        if traces.len() != examples.len() {
            return Err(Error::MalformedProblem("example atoms do not match the traces".into()));
        }
        Ok(Box::new(LtlSemantics {
            literals: atoms(b, LITERAL),
            times: atoms(b, TIME),
            traces: examples.into_iter().zip(traces).collect(),
            label: b.relation_id("label")?,
            value: b.relation_id("value")?,
            succ: b.relation_id("succ")?,
            reach: b.relation_id("reach")?,
        }))
    }

    fn decode_leaf(&self, encoding: &Encoding, model: &dyn Valuation, node: AtomId) -> Result<Formula> {
        let label = encoding.relation("label")?;
        let universe = encoding.problem.universe();
        model
            .tuples(label)
            .into_iter()
            .find(|t| t[0] == node)
            .map(|t| Formula::Literal(universe.surface(t[1]).to_string()))
            .ok_or_else(|| Error::Decode(format!("literal node {} has no label", universe.label(node))))
    }

    fn decode_binder(&self, _: &Encoding, _: &dyn Valuation, node: AtomId) -> Result<(String, String)> {
        Err(Error::Decode(format!("LTL node #{node} cannot be a quantifier")))
    }

    fn separates(&self, formula: &Formula) -> bool {
        let literals = &self.task.literals;
        self.task.positives.iter().all(|t| formula.holds_on_trace(t, literals))
            && !self.task.negatives.iter().any(|t| formula.holds_on_trace(t, literals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::sample::trace::State;

    fn task() -> LtlTask {
        let trace = |rows: &[[bool; 2]], start| {
            LassoTrace::from_states(rows.iter().map(|r| State::new(r.to_vec())).collect(), start).unwrap()
        };
        LtlTask::new(
            LtlTask::default_literals(2),
            vec![trace(&[[true, false], [false, true]], Some(1))],
            vec![trace(&[[false, false]], None)],
            4,
        )
        .with_excluded(["Until"])
    }

    #[test]
    fn trace_facts_follow_the_lasso() {
        let encoding = encode(&LtlLogic::new(task()), 3).unwrap();
        let problem = &encoding.problem;
        let universe = problem.universe();
        let reach = problem.relation(problem.relation_id("reach").unwrap());
        let id = |label: &str| universe.id(label).unwrap();
        assert!(reach.lower.contains(&vec![id("ex0"), id("t1"), id("t1")]));
        assert!(!reach.lower.contains(&vec![id("ex0"), id("t1"), id("t0")]));
        let succ = problem.relation(problem.relation_id("succ").unwrap());
        assert!(succ.lower.contains(&vec![id("ex0"), id("t1"), id("t1")]));
        assert!(!succ.upper.iter().any(|t| t[0] == id("ex1")));
        assert_eq!(universe.surface(id("ex1")), "-0");
    }

    #[test]
    fn excluded_operators_are_not_declared() {
        let encoding = encode(&LtlLogic::new(task()), 3).unwrap();
        assert!(encoding.skeleton.kind_atom("Until").is_none());
        assert!(encoding.skeleton.kind_atom("Globally").is_some());
        assert!(encoding.problem.universe().id("Until").is_none());
    }
}
