//! Lasso traces and LTL learning tasks.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::error::{invalid, Result};
use crate::formula::{lookup, LTL_OPERATORS};

/// One valuation of the task's literals, indexed like `LtlTask::literals`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State(Vec<bool>);

impl State {
    pub fn new(values: Vec<bool>) -> Self {
        State(values)
    }

    pub fn get(&self, literal: usize) -> bool {
        self.0.get(literal).copied().unwrap_or(false)
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &[bool] {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|v| u8::from(*v)).join(","))
    }
}

/// A finite prefix followed by a loop that repeats forever. An empty loop is
/// a plain finite trace whose last index has no successor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LassoTrace {
    prefix: Vec<State>,
    lasso: Vec<State>,
}

impl LassoTrace {
    pub fn new(prefix: Vec<State>, lasso: Vec<State>) -> Self {
        LassoTrace { prefix, lasso }
    }

    /// Splits `states` at `loop_start`; `None` keeps every state in the prefix.
    pub fn from_states(mut states: Vec<State>, loop_start: Option<usize>) -> Result<Self> {
        match loop_start {
            Some(start) if start >= states.len() => Err(invalid(format!(
                "loop start {start} is outside a trace of length {}",
                states.len()
            ))),
            Some(start) => {
                let lasso = states.split_off(start);
                Ok(LassoTrace::new(states, lasso))
            }
            None => Ok(LassoTrace::new(states, vec![])),
        }
    }

    pub fn prefix(&self) -> &[State] {
        &self.prefix
    }

    pub fn lasso(&self) -> &[State] {
        &self.lasso
    }

    pub fn len(&self) -> usize {
        self.prefix.len() + self.lasso.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finite(&self) -> bool {
        self.lasso.is_empty()
    }

    pub fn loop_start(&self) -> Option<usize> {
        (!self.lasso.is_empty()).then_some(self.prefix.len())
    }

    pub fn state(&self, i: usize) -> &State {
        if i < self.prefix.len() {
            &self.prefix[i]
        } else {
            &self.lasso[(i - self.prefix.len()) % self.lasso.len()]
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.prefix.iter().chain(self.lasso.iter())
    }

    pub fn successor(&self, i: usize) -> Option<usize> {
        if i + 1 < self.len() {
            Some(i + 1)
        } else {
            self.loop_start()
        }
    }

    /// Every index reachable from `i` (itself included), in the order the
    /// infinite unrolling visits them first.
    pub fn forward(&self, i: usize) -> Vec<usize> {
        match self.loop_start() {
            Some(start) if i > start => (i..self.len()).chain(start..i).collect(),
            _ => (i..self.len()).collect(),
        }
    }

    /// The indices visited when walking forward from `i` until `j` is first
    /// reached, `i` included and `j` excluded.
    pub fn path(&self, i: usize, j: usize) -> Vec<usize> {
        self.forward(i).into_iter().take_while(|k| *k != j).collect()
    }
}

impl fmt::Display for LassoTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.states().join(";"))?;
        if let Some(start) = self.loop_start() {
            write!(f, "::{start}")?;
        }
        Ok(())
    }
}

/// An LTL learning task. Built once by a front end, read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LtlTask {
    pub literals: Vec<String>,
    pub positives: Vec<LassoTrace>,
    pub negatives: Vec<LassoTrace>,
    /// Canonical operator names that must not appear in the result.
    pub excluded: BTreeSet<String>,
    pub max_nodes: usize,
    /// SMT-LIB 2 text appended verbatim to every encoding.
    pub custom_constraints: Option<String>,
    /// Expected answers listed by the task file, if any.
    pub expected: Vec<String>,
}

impl LtlTask {
    pub fn new(
        literals: Vec<String>,
        positives: Vec<LassoTrace>,
        negatives: Vec<LassoTrace>,
        max_nodes: usize,
    ) -> Self {
        LtlTask {
            literals,
            positives,
            negatives,
            excluded: BTreeSet::new(),
            max_nodes,
            custom_constraints: None,
            expected: vec![],
        }
    }

    /// Literals named `x0 .. x{width-1}`, the trace-file convention.
    pub fn default_literals(width: usize) -> Vec<String> {
        (0..width).map(|i| format!("x{i}")).collect()
    }

    pub fn with_excluded<'a>(mut self, operators: impl IntoIterator<Item = &'a str>) -> Self {
        self.excluded.extend(operators.into_iter().map(str::to_string));
        self
    }

    pub fn with_custom_constraints(mut self, fragment: impl Into<String>) -> Self {
        self.custom_constraints = Some(fragment.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.literals.is_empty() {
            return Err(invalid("the task declares no literals"));
        }
        if self.literals.iter().unique().count() != self.literals.len() {
            return Err(invalid("literal names must be distinct"));
        }
        if self.max_nodes == 0 {
            return Err(invalid("the node bound must be positive"));
        }
        for name in &self.excluded {
            match lookup(&LTL_OPERATORS, name) {
                Some(op) if op.name == name && !op.is_leaf() => {}
                _ => return Err(invalid(format!("unknown LTL operator '{name}'"))),
            }
        }
        let width = self.literals.len();
        for (polarity, trace) in self
            .positives
            .iter()
            .map(|t| ("positive", t))
            .chain(self.negatives.iter().map(|t| ("negative", t)))
        {
            if trace.is_empty() {
                return Err(invalid(format!("empty {polarity} trace")));
            }
            if let Some(state) = trace.states().find(|s| s.width() != width) {
                return Err(invalid(format!(
                    "{polarity} trace {trace} has a state of width {} but the task has {width} literals",
                    state.width()
                )));
            }
        }
        Ok(())
    }
}
