//! The search controller: iterative deepening over the node bound.
//!
//! Every bound gets a fresh encoding. The first satisfiable bound yields a
//! [`Solution`], which can be exchanged for further separators at the same
//! bound and, once those run out, at larger ones.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::decode::decode;
use crate::encode::{encode, Encoding, FolLogic, Logic, LtlLogic};
use crate::error::Result;
use crate::formula::Formula;
use crate::reduce::{self, ReductionStats};
use crate::sample::{FolTask, LtlTask};
use crate::solver::{Instance, ModelFinder};

/// A validated-on-build learning task of either logic.
#[derive(Debug, Clone)]
pub enum Task {
    Ltl(LtlTask),
    Fol(FolTask),
}

impl Task {
    pub fn max_nodes(&self) -> usize {
        match self {
            Task::Ltl(t) => t.max_nodes,
            Task::Fol(t) => t.max_nodes,
        }
    }

    pub fn example_counts(&self) -> (usize, usize) {
        match self {
            Task::Ltl(t) => (t.positives.len(), t.negatives.len()),
            Task::Fol(t) => (t.positives.len(), t.negatives.len()),
        }
    }
}

impl From<LtlTask> for Task {
    fn from(task: LtlTask) -> Self {
        Task::Ltl(task)
    }
}

impl From<FolTask> for Task {
    fn from(task: FolTask) -> Self {
        Task::Fol(task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Searching,
    Found,
    Escalating,
    Exhausted,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where to start and how far to jump between bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnOptions {
    /// `None` derives the start from the vocabulary size.
    pub start: Option<usize>,
    pub step: usize,
}

impl Default for LearnOptions {
    fn default() -> Self {
        LearnOptions { start: None, step: 1 }
    }
}

/// The bound the search starts from when none is given.
pub fn initial_bound(max_nodes: usize, vocabulary: usize) -> usize {
    (max_nodes.saturating_sub(vocabulary) / 2).clamp(3, 6)
}

/// `start, start + step, …` up to `max`, always ending at `max`.
pub fn bound_sequence(start: usize, step: usize, max: usize) -> Vec<usize> {
    if start > max {
        return vec![max];
    }
    let mut bounds: Vec<usize> = (start..=max).step_by(step.max(1)).collect();
    if bounds.last() != Some(&max) {
        bounds.push(max);
    }
    bounds
}

pub struct Learner<'s, F: ModelFinder + 's> {
    finder: &'s F,
    logic: Box<dyn Logic>,
    stats: ReductionStats,
    contradictory: bool,
    state: Cell<SearchState>,
}

/// Validates and reduces the task, then pairs it with a model finder.
pub fn build_learner<F: ModelFinder>(task: Task, finder: &F) -> Result<Learner<'_, F>> {
    let (logic, stats, contradictory): (Box<dyn Logic>, _, _) = match task {
        Task::Ltl(task) => {
            task.validate()?;
            let (reduced, stats) = reduce::trace::reduce_task(&task);
            let contradictory = reduce::trace::is_contradictory(&reduced);
            (Box::new(LtlLogic::new(reduced)), stats, contradictory)
        }
        Task::Fol(task) => {
            task.validate()?;
            let (reduced, stats) = reduce::structure::reduce_task(&task);
            let contradictory = reduce::structure::is_contradictory(&reduced);
            (Box::new(FolLogic::new(reduced)?), stats, contradictory)
        }
    };
    info!(
        "{} task: {}+{} examples reduced to {}+{} ({:.1}% fewer)",
        logic.name(),
        stats.original_positive_count,
        stats.original_negative_count,
        stats.reduced_positive_count,
        stats.reduced_negative_count,
        stats.reduction_percentage()
    );
    if contradictory {
        warn!("a positive and a negative example coincide after reduction; no separator exists");
    }
    Ok(Learner {
        finder,
        logic,
        stats,
        contradictory,
        state: Cell::new(SearchState::Idle),
    })
}

impl<'s, F: ModelFinder + 's> Learner<'s, F> {
    pub fn logic(&self) -> &dyn Logic {
        self.logic.as_ref()
    }

    pub fn stats(&self) -> &ReductionStats {
        &self.stats
    }

    pub fn is_contradictory(&self) -> bool {
        self.contradictory
    }

    pub fn max_nodes(&self) -> usize {
        self.logic.max_nodes()
    }

    pub fn state(&self) -> SearchState {
        self.state.get()
    }

    fn transition(&self, next: SearchState) {
        let previous = self.state.replace(next);
        if previous != next {
            debug!("search state {previous} -> {next}");
        }
    }

    /// The problem for one bound, without solving it.
    pub fn encode(&self, bound: usize) -> Result<Encoding> {
        encode(self.logic.as_ref(), bound)
    }

    pub fn learn(&self, start: Option<usize>, step: usize) -> Result<Option<Solution<'_, 's, F>>> {
        if self.contradictory {
            self.transition(SearchState::Exhausted);
            return Ok(None);
        }
        let max = self.max_nodes();
        let start = start.unwrap_or_else(|| initial_bound(max, self.logic.vocabulary_size()));
        self.search(bound_sequence(start, step, max), step, HashSet::new())
    }

    pub fn learn_with(&self, options: &LearnOptions) -> Result<Option<Solution<'_, 's, F>>> {
        self.learn(options.start, options.step)
    }

    fn search(
        &self,
        bounds: Vec<usize>,
        step: usize,
        mut seen: HashSet<String>,
    ) -> Result<Option<Solution<'_, 's, F>>> {
        for bound in bounds {
            self.transition(SearchState::Searching);
            info!("searching for a separator with at most {bound} nodes");
            let encoding = Rc::new(self.encode(bound)?);
            let first = self.finder.solve(encoding.problem.clone())?;
            if let Some((instance, formula)) = self.first_unseen(&encoding, first, &mut seen)? {
                self.transition(SearchState::Found);
                info!("found {} at bound {bound}", formula.render());
                return Ok(Some(Solution {
                    learner: self,
                    bound,
                    step,
                    encoding,
                    instance,
                    formula,
                    seen,
                }));
            }
            self.transition(SearchState::Escalating);
        }
        self.transition(SearchState::Exhausted);
        info!("no separator within {} nodes", self.max_nodes());
        Ok(None)
    }

    /// Walks the model chain until a formula not produced before shows up.
    fn first_unseen(
        &self,
        encoding: &Encoding,
        mut candidate: Option<F::Instance<'s>>,
        seen: &mut HashSet<String>,
    ) -> Result<Option<(F::Instance<'s>, Rc<Formula>)>> {
        while let Some(instance) = candidate {
            let formula = decode(self.logic.as_ref(), encoding, &instance)?;
            if seen.insert(formula.prefix()) {
                return Ok(Some((instance, formula)));
            }
            debug!("skipping repeated separator {}", formula.prefix());
            candidate = instance.next()?;
        }
        Ok(None)
    }
}

/// A separator together with the model it was read from.
pub struct Solution<'a, 's, F: ModelFinder + 's> {
    learner: &'a Learner<'s, F>,
    bound: usize,
    step: usize,
    encoding: Rc<Encoding>,
    instance: F::Instance<'s>,
    formula: Rc<Formula>,
    /// Prefix renderings already handed out in this chain.
    seen: HashSet<String>,
}

impl<'a, 's, F: ModelFinder + 's> Solution<'a, 's, F> {
    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn formula(&self) -> &Rc<Formula> {
        &self.formula
    }

    pub fn render(&self) -> String {
        self.formula.render()
    }

    pub fn prefix(&self) -> String {
        self.formula.prefix()
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn instance(&self) -> &F::Instance<'s> {
        &self.instance
    }

    /// Checks the formula against the reduced examples without the solver.
    pub fn is_consistent(&self) -> bool {
        self.learner.logic.separates(&self.formula)
    }

    /// Another separator: first at this bound, then at larger ones.
    pub fn next(self) -> Result<Option<Self>> {
        let Solution {
            learner,
            bound,
            step,
            encoding,
            instance,
            mut seen,
            ..
        } = self;
        let candidate = instance.next()?;
        if let Some((instance, formula)) = learner.first_unseen(&encoding, candidate, &mut seen)? {
            return Ok(Some(Solution {
                learner,
                bound,
                step,
                encoding,
                instance,
                formula,
                seen,
            }));
        }
        let max = learner.max_nodes();
        if bound >= max {
            learner.transition(SearchState::Exhausted);
            return Ok(None);
        }
        learner.transition(SearchState::Escalating);
        learner.search(bound_sequence(bound + step.max(1), step, max), step, seen)
    }
}

impl<'s, F: ModelFinder + 's> fmt::Display for Solution<'_, 's, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sample::{LassoTrace, State};
    use crate::solver::{SolverOptions, Z3Solver};

    #[test]
    fn bounds_step_up_to_the_maximum() {
        assert_eq!(bound_sequence(3, 1, 5), vec![3, 4, 5]);
        assert_eq!(bound_sequence(3, 2, 6), vec![3, 5, 6]);
        assert_eq!(bound_sequence(3, 0, 4), vec![3, 4]);
        assert_eq!(bound_sequence(7, 1, 5), vec![5]);
    }

    #[test]
    fn initial_bound_is_clamped() {
        assert_eq!(initial_bound(10, 2), 4);
        assert_eq!(initial_bound(4, 2), 3);
        assert_eq!(initial_bound(30, 1), 6);
        assert_eq!(initial_bound(2, 5), 3);
    }

    fn trace(bits: &[bool]) -> LassoTrace {
        LassoTrace::from_states(bits.iter().map(|b| State::new(vec![*b])).collect(), Some(0)).unwrap()
    }

    #[test]
    fn contradictory_tasks_stop_before_solving() {
        let finder = Z3Solver::initialize(&SolverOptions::default());
        // [1,1] reduces to [1]
        let task = LtlTask::new(LtlTask::default_literals(1), vec![trace(&[true, true])], vec![trace(&[true])], 4);
        let learner = build_learner(task.into(), &finder).unwrap();
        assert!(learner.is_contradictory());
        assert!(learner.learn(None, 1).unwrap().is_none());
        assert_eq!(learner.state(), SearchState::Exhausted);
    }

    #[test]
    fn invalid_tasks_are_rejected() {
        let finder = Z3Solver::initialize(&SolverOptions::default());
        let task = LtlTask::new(vec![], vec![trace(&[true])], vec![], 4);
        assert!(matches!(build_learner(task.into(), &finder), Err(Error::InvalidTask(_))));
    }
}
