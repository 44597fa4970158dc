//! The contract between the search and a bounded model finder.

use std::rc::Rc;
use std::time::Duration;

use itertools::Itertools;

use crate::error::Result;
use crate::problem::{AtomId, Constraint, Problem, RelId, Role, Tuple};

pub mod z3;

pub use self::z3::Z3Solver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverOptions {
    /// Per-check limit; `None` lets the backend run unbounded.
    pub timeout: Option<Duration>,
    /// Prefer models with the fewest objective terms set.
    pub minimize: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            timeout: None,
            minimize: true,
        }
    }
}

/// Read access to a satisfying assignment.
pub trait Valuation {
    fn problem(&self) -> &Problem;

    /// Membership of `tuple` in relation `rel` under this assignment.
    fn contains(&self, rel: RelId, tuple: &[AtomId]) -> bool;

    fn tuples(&self, rel: RelId) -> Vec<Tuple> {
        self.problem()
            .relation(rel)
            .upper
            .iter()
            .filter(|t| self.contains(rel, t))
            .cloned()
            .collect()
    }

    fn eval(&self, constraint: &Constraint) -> bool {
        constraint.eval(&|rel, tuple| self.contains(rel, tuple))
    }

    /// Every non-fact relation with the tuples it holds, one relation a line.
    fn dump(&self) -> String {
        let problem = self.problem();
        let universe = problem.universe();
        problem
            .relations()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.role != Role::Fact)
            .map(|(id, r)| {
                let tuples = self
                    .tuples(id)
                    .iter()
                    .map(|t| format!("({})", t.iter().map(|a| universe.label(*a)).join(" ")))
                    .join(" ");
                format!("{} = {{{tuples}}}", r.name)
            })
            .join("\n")
    }
}

/// A model handed out by a [`ModelFinder`] that can be exchanged for the
/// next one.
pub trait Instance: Valuation + Sized {
    /// Blocks the current assignment of every `Primary` relation and asks the
    /// backend again. `None` once the problem has no further models.
    fn next(self) -> Result<Option<Self>>;
}

pub trait ModelFinder {
    type Instance<'a>: Instance
    where
        Self: 'a;

    /// `Ok(None)` means the problem is unsatisfiable within its bounds.
    fn solve(&self, problem: Rc<Problem>) -> Result<Option<Self::Instance<'_>>>;
}
