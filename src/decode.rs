//! Reads the formula out of a model, starting at the root node. Nodes with
//! several parents are decoded once and shared.

use std::collections::HashMap;
use std::rc::Rc;

use crate::encode::{Encoding, Logic};
use crate::error::{Error, Result};
use crate::formula::{Arity, Formula};
use crate::problem::{AtomId, RelId, Tuple};
use crate::solver::Valuation;

pub fn decode(logic: &dyn Logic, encoding: &Encoding, model: &dyn Valuation) -> Result<Rc<Formula>> {
    let skeleton = &encoding.skeleton;
    let root = *skeleton
        .nodes
        .first()
        .ok_or_else(|| Error::Decode("the encoding has no nodes".into()))?;
    let mut decoder = Decoder {
        logic,
        encoding,
        model,
        kinds: model.tuples(skeleton.kind),
        lefts: model.tuples(skeleton.left),
        rights: model.tuples(skeleton.right),
        memo: HashMap::new(),
    };
    decoder.node(root)
}

struct Decoder<'a> {
    logic: &'a dyn Logic,
    encoding: &'a Encoding,
    model: &'a dyn Valuation,
    kinds: Vec<Tuple>,
    lefts: Vec<Tuple>,
    rights: Vec<Tuple>,
    memo: HashMap<AtomId, Rc<Formula>>,
}

impl Decoder<'_> {
    fn node(&mut self, node: AtomId) -> Result<Rc<Formula>> {
        if let Some(formula) = self.memo.get(&node) {
            return Ok(formula.clone());
        }
        let skeleton = &self.encoding.skeleton;
        let kind = successor(&self.kinds, node).ok_or_else(|| self.missing(node, skeleton.kind))?;
        let op = skeleton
            .kinds
            .iter()
            .find(|(_, atom)| *atom == kind)
            .map(|(op, _)| *op)
            .ok_or_else(|| Error::Decode(format!("unknown kind atom #{kind}")))?;

        let formula = match op.arity {
            Arity::Leaf => self.logic.decode_leaf(self.encoding, self.model, node)?,
            Arity::Unary => Formula::Unary {
                op,
                child: self.left(node)?,
            },
            Arity::Binary => Formula::Binary {
                op,
                left: self.left(node)?,
                right: self.right(node)?,
            },
            Arity::Binder => {
                let (var, sort) = self.logic.decode_binder(self.encoding, self.model, node)?;
                Formula::Quantified {
                    op,
                    var,
                    sort,
                    body: self.left(node)?,
                }
            }
        };
        let formula = Rc::new(formula);
        self.memo.insert(node, formula.clone());
        Ok(formula)
    }

    fn left(&mut self, node: AtomId) -> Result<Rc<Formula>> {
        let child = successor(&self.lefts, node).ok_or_else(|| self.missing(node, self.encoding.skeleton.left))?;
        self.node(child)
    }

    fn right(&mut self, node: AtomId) -> Result<Rc<Formula>> {
        let child = successor(&self.rights, node).ok_or_else(|| self.missing(node, self.encoding.skeleton.right))?;
        self.node(child)
    }

    fn missing(&self, node: AtomId, rel: RelId) -> Error {
        let problem = &self.encoding.problem;
        Error::Decode(format!(
            "node {} has no {} tuple",
            problem.universe().label(node),
            problem.relation(rel).name
        ))
    }
}

/// Second column of the first pair starting at `node`.
fn successor(pairs: &[Tuple], node: AtomId) -> Option<AtomId> {
    pairs.iter().find(|t| t[0] == node).map(|t| t[1])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::encode::{encode, LtlLogic};
    use crate::problem::Problem;
    use crate::sample::trace::{LassoTrace, LtlTask, State};

    /// A hand-written assignment.
    struct Fixed {
        problem: Rc<Problem>,
        set: HashSet<(RelId, Tuple)>,
    }

    impl Fixed {
        fn new(encoding: &Encoding, facts: &[(&str, &[&str])]) -> Self {
            let problem = encoding.problem.clone();
            let set = facts
                .iter()
                .map(|(rel, labels)| {
                    let rel = problem.relation_id(rel).unwrap();
                    let tuple = labels.iter().map(|l| problem.universe().id(l).unwrap()).collect();
                    (rel, tuple)
                })
                .collect();
            Fixed { problem, set }
        }
    }

    impl Valuation for Fixed {
        fn problem(&self) -> &Problem {
            &self.problem
        }

        fn contains(&self, rel: RelId, tuple: &[AtomId]) -> bool {
            self.problem.relation(rel).lower.contains(tuple) || self.set.contains(&(rel, tuple.to_vec()))
        }
    }

    fn logic() -> LtlLogic {
        let trace = LassoTrace::from_states(vec![State::new(vec![true, false])], Some(0)).unwrap();
        LtlLogic::new(LtlTask::new(LtlTask::default_literals(2), vec![trace.clone()], vec![trace], 4))
    }

    #[test]
    fn decodes_shared_children_once() {
        let logic = logic();
        let encoding = encode(&logic, 3).unwrap();
        let model = Fixed::new(
            &encoding,
            &[
                ("kind", &["n0", "Until"]),
                ("left", &["n0", "n1"]),
                ("right", &["n0", "n2"]),
                ("kind", &["n1", "Globally"]),
                ("left", &["n1", "n2"]),
                ("kind", &["n2", "Literal"]),
                ("label", &["n2", "lit_x1"]),
            ],
        );
        let formula = decode(&logic, &encoding, &model).unwrap();
        assert_eq!(formula.prefix(), "Until(Globally(x1),x1)");
        let Formula::Binary { left, right, .. } = formula.as_ref() else {
            panic!("expected a binary root");
        };
        let Formula::Unary { child, .. } = left.as_ref() else {
            panic!("expected a unary left child");
        };
        assert!(Rc::ptr_eq(child, right));
    }

    #[test]
    fn reports_missing_children() {
        let logic = logic();
        let encoding = encode(&logic, 3).unwrap();
        let model = Fixed::new(&encoding, &[("kind", &["n0", "Next"])]);
        assert!(matches!(decode(&logic, &encoding, &model), Err(Error::Decode(_))));
    }
}
