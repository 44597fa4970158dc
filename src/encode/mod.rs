//! Compiles a learning task and a node bound into a [`Problem`] whose models
//! are exactly the formulas of at most that many nodes that separate the
//! examples.
//!
//! The shape of the formula DAG and the propositional connectives are shared
//! between logics; everything that depends on what a leaf is or where a
//! formula is evaluated lives behind the [`Logic`] trait.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::debug;

use crate::error::{Error, Result};
use crate::formula::{Arity, Formula, Operator};
use crate::problem::{AtomId, Constraint, Problem, ProblemBuilder, RelId, Role, Tuple};
use crate::solver::Valuation;

pub mod fol;
pub mod ltl;

pub use fol::FolLogic;
pub use ltl::LtlLogic;

pub const NODE: &str = "Node";
pub const KIND: &str = "Kind";

/// How sub-formulas may be shared between parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Any number of parents; identical leaves are merged.
    Dag,
    /// Exactly one parent per non-root node.
    Tree,
}

/// A place where formulas are evaluated, such as `(example, time)` or
/// `(example, environment)`.
pub type Point = Tuple;

/// An example as the encoder sees it: where the root is evaluated and which
/// way it has to come out.
#[derive(Debug, Clone)]
pub struct Sample {
    pub root: Point,
    pub positive: bool,
}

/// The formula-shaped part of every encoding.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub bound: usize,
    pub nodes: Vec<AtomId>,
    /// Declared operator kinds with their atoms; excluded kinds are absent.
    pub kinds: Vec<(&'static Operator, AtomId)>,
    pub kind: RelId,
    pub left: RelId,
    pub right: RelId,
    pub used: RelId,
    pub holds: RelId,
    pub lval: RelId,
    pub rval: RelId,
}

impl Skeleton {
    pub fn kind_atom(&self, name: &str) -> Option<AtomId> {
        self.kinds.iter().find(|(op, _)| op.name == name).map(|(_, a)| *a)
    }

    /// `kind(n, k)` for the named operator, `False` when it is excluded.
    pub fn is(&self, b: &ProblemBuilder, n: usize, name: &str) -> Constraint {
        match self.kind_atom(name) {
            Some(k) => b.member(self.kind, &[self.nodes[n], k]),
            None => Constraint::False,
        }
    }

    /// Some node kind of the given arity.
    pub fn has_arity(&self, b: &ProblemBuilder, n: usize, arity: Arity) -> Constraint {
        Constraint::or(
            self.kinds
                .iter()
                .filter(|(op, _)| op.arity == arity)
                .map(|(_, k)| b.member(self.kind, &[self.nodes[n], *k])),
        )
    }

    pub fn edge(&self, b: &ProblemBuilder, rel: RelId, parent: usize, child: usize) -> Constraint {
        b.member(rel, &[self.nodes[parent], self.nodes[child]])
    }

    /// `left(p, c) ∨ right(p, c)`.
    pub fn child(&self, b: &ProblemBuilder, parent: usize, child: usize) -> Constraint {
        Constraint::or([
            self.edge(b, self.left, parent, child),
            self.edge(b, self.right, parent, child),
        ])
    }

    fn at(&self, b: &ProblemBuilder, rel: RelId, n: usize, point: &[AtomId]) -> Constraint {
        let tuple: Tuple = std::iter::once(self.nodes[n]).chain(point.iter().copied()).collect();
        b.member(rel, &tuple)
    }

    pub fn holds(&self, b: &ProblemBuilder, n: usize, point: &[AtomId]) -> Constraint {
        self.at(b, self.holds, n, point)
    }

    /// Value of the left child of `n` at `point`.
    pub fn lval(&self, b: &ProblemBuilder, n: usize, point: &[AtomId]) -> Constraint {
        self.at(b, self.lval, n, point)
    }

    pub fn rval(&self, b: &ProblemBuilder, n: usize, point: &[AtomId]) -> Constraint {
        self.at(b, self.rval, n, point)
    }
}

pub trait Semantics {
    /// Right-hand side of `kind(n, op) → (holds(n, point) ⇔ …)` for the
    /// operators the skeleton does not handle itself.
    fn body(
        &self,
        b: &ProblemBuilder,
        skeleton: &Skeleton,
        n: usize,
        op: &'static Operator,
        point: &[AtomId],
    ) -> Result<Constraint>;
}

/// The logic-specific half of an encoding.
pub trait Logic {
    fn name(&self) -> &'static str;

    fn operators(&self) -> &'static [Operator];

    fn excluded(&self) -> &BTreeSet<String>;

    fn sharing(&self) -> Sharing;

    fn max_nodes(&self) -> usize;

    /// Literal count or sort count; drives the initial bound.
    fn vocabulary_size(&self) -> usize;

    fn custom_constraints(&self) -> Option<&str>;

    /// Declares the vocabulary and the examples, and returns every evaluation
    /// point together with the samples.
    fn declare(&self, b: &mut ProblemBuilder, bound: usize) -> Result<(Vec<Point>, Vec<Sample>)>;

    /// Structural constraints beyond the shared skeleton.
    fn well_formed(&self, b: &mut ProblemBuilder, skeleton: &Skeleton) -> Result<()>;

    /// Semantics of the logic's own operators, built once per encoding after
    /// [`Logic::declare`] and [`Logic::well_formed`].
    fn semantics<'a>(&'a self, b: &ProblemBuilder) -> Result<Box<dyn Semantics + 'a>>;

    fn decode_leaf(&self, encoding: &Encoding, model: &dyn Valuation, node: AtomId) -> Result<Formula>;

    /// Bound variable and sort of a quantifier node.
    fn decode_binder(
        &self,
        encoding: &Encoding,
        model: &dyn Valuation,
        node: AtomId,
    ) -> Result<(String, String)>;

    /// Reference check of a decoded formula against the examples.
    fn separates(&self, formula: &Formula) -> bool;
}

/// A built problem plus what the decoder needs to read its models.
#[derive(Debug)]
pub struct Encoding {
    pub problem: Rc<Problem>,
    pub skeleton: Skeleton,
}

impl Encoding {
    pub fn bound(&self) -> usize {
        self.skeleton.bound
    }

    pub fn relation(&self, name: &str) -> Result<RelId> {
        self.problem
            .relation_id(name)
            .ok_or_else(|| Error::Decode(format!("no relation named {name}")))
    }
}

fn negation(op: &Operator) -> bool {
    matches!(op.name, "Neg" | "Not")
}

pub fn encode(logic: &dyn Logic, bound: usize) -> Result<Encoding> {
    let mut b = ProblemBuilder::new();
    let (points, samples) = logic.declare(&mut b, bound)?;
    let point_arity = points.first().map_or(0, Vec::len);
    let skeleton = declare_skeleton(logic, &mut b, bound, point_arity);

    for n in 0..bound {
        for point in &points {
            b.allow(skeleton.holds, with_node(&skeleton, n, point));
            b.allow(skeleton.lval, with_node(&skeleton, n, point));
            b.allow(skeleton.rval, with_node(&skeleton, n, point));
        }
    }

    shape(logic, &mut b, &skeleton);
    logic.well_formed(&mut b, &skeleton)?;
    child_values(&mut b, &skeleton, &points);
    let semantics = logic.semantics(&b)?;

    for n in 0..bound {
        for &(op, _) in &skeleton.kinds {
            let is_op = skeleton.is(&b, n, op.name);
            if is_op.is_false() {
                continue;
            }
            for point in &points {
                let body = match op.name {
                    _ if negation(op) => Constraint::not(skeleton.lval(&b, n, point)),
                    "And" => Constraint::and([skeleton.lval(&b, n, point), skeleton.rval(&b, n, point)]),
                    "Or" => Constraint::or([skeleton.lval(&b, n, point), skeleton.rval(&b, n, point)]),
                    "Imply" | "Implies" => {
                        Constraint::implies(skeleton.lval(&b, n, point), skeleton.rval(&b, n, point))
                    }
                    _ => semantics.body(&b, &skeleton, n, op, point)?,
                };
                let holds = skeleton.holds(&b, n, point);
                b.assert(Constraint::implies(is_op.clone(), Constraint::iff(holds, body)));
            }
        }
    }

    for sample in &samples {
        let root = skeleton.holds(&b, 0, &sample.root);
        b.assert(if sample.positive { root } else { Constraint::not(root) });
    }

    let operators: Vec<Constraint> = (0..bound)
        .flat_map(|n| {
            skeleton
                .kinds
                .iter()
                .filter(|(op, _)| !op.is_leaf())
                .map(move |(_, k)| (n, *k))
        })
        .map(|(n, k)| b.member(skeleton.kind, &[skeleton.nodes[n], k]))
        .collect();
    b.minimize(operators);

    if let Some(fragment) = logic.custom_constraints() {
        b.raw(fragment);
    }

    let problem = b.build()?;
    debug!(
        "{} encoding at bound {bound}: {} atoms, {} free variables, {} constraints",
        logic.name(),
        problem.universe().len(),
        problem.free_var_count(),
        problem.constraints().len()
    );
    Ok(Encoding {
        problem: Rc::new(problem),
        skeleton,
    })
}

fn with_node(skeleton: &Skeleton, n: usize, point: &[AtomId]) -> Tuple {
    std::iter::once(skeleton.nodes[n]).chain(point.iter().copied()).collect()
}

fn declare_skeleton(
    logic: &dyn Logic,
    b: &mut ProblemBuilder,
    bound: usize,
    point_arity: usize,
) -> Skeleton {
    let nodes: Vec<AtomId> = (0..bound).map(|i| b.atom(format!("n{i}"), format!("n{i}"), NODE)).collect();
    let kinds: Vec<(&'static Operator, AtomId)> = logic
        .operators()
        .iter()
        .filter(|op| !logic.excluded().contains(op.name))
        .map(|op| (op, b.atom(op.name, op.name, KIND)))
        .collect();

    let kind = b.relation("kind", 2, Role::Primary);
    let left = b.relation("left", 2, Role::Primary);
    let right = b.relation("right", 2, Role::Primary);
    let used = b.relation("used", 1, Role::Derived);
    let holds = b.relation("holds", 1 + point_arity, Role::Derived);
    let lval = b.relation("lval", 1 + point_arity, Role::Derived);
    let rval = b.relation("rval", 1 + point_arity, Role::Derived);

    for (i, &n) in nodes.iter().enumerate() {
        for (_, k) in &kinds {
            b.allow(kind, vec![n, *k]);
        }
        // children always have a higher index, which rules out cycles
        for &c in &nodes[i + 1..] {
            b.allow(left, vec![n, c]);
            b.allow(right, vec![n, c]);
        }
        if i == 0 {
            b.include(used, vec![n]);
        } else {
            b.allow(used, vec![n]);
        }
    }

    Skeleton {
        bound,
        nodes,
        kinds,
        kind,
        left,
        right,
        used,
        holds,
        lval,
        rval,
    }
}

/// Node usage, one kind per used node, arities, sharing and degeneracy.
fn shape(logic: &dyn Logic, b: &mut ProblemBuilder, s: &Skeleton) {
    let bound = s.bound;
    for n in 0..bound {
        let used = b.member(s.used, &[s.nodes[n]]);
        if n + 1 < bound {
            let next = b.member(s.used, &[s.nodes[n + 1]]);
            b.assert(Constraint::implies(next, used.clone()));
        }

        let kinds: Vec<Constraint> = s.kinds.iter().map(|(_, k)| b.member(s.kind, &[s.nodes[n], *k])).collect();
        b.assert(Constraint::iff(used.clone(), Constraint::or(kinds.clone())));
        b.assert(Constraint::at_most(1, kinds));

        for c in n + 1..bound {
            b.assert(Constraint::implies(s.child(b, n, c), used.clone()));
        }

        if n > 0 {
            let parents: Vec<Constraint> = (0..n).map(|p| s.child(&*b, p, n)).collect();
            match logic.sharing() {
                Sharing::Dag => b.assert(Constraint::iff(used.clone(), Constraint::or(parents))),
                Sharing::Tree => {
                    b.assert(Constraint::iff(used.clone(), Constraint::or(parents.clone())));
                    b.assert(Constraint::at_most(1, parents));
                }
            }
        }

        let lefts: Vec<Constraint> = (n + 1..bound).map(|c| s.edge(&*b, s.left, n, c)).collect();
        let rights: Vec<Constraint> = (n + 1..bound).map(|c| s.edge(&*b, s.right, n, c)).collect();
        let one_child = Constraint::or([s.has_arity(b, n, Arity::Unary), s.has_arity(b, n, Arity::Binder)]);
        let two_children = s.has_arity(b, n, Arity::Binary);
        let no_children = Constraint::not(Constraint::or([one_child.clone(), two_children.clone()]));

        b.assert(Constraint::implies(
            Constraint::or([one_child.clone(), two_children.clone()]),
            Constraint::exactly(1, lefts.clone()),
        ));
        b.assert(Constraint::implies(
            two_children.clone(),
            Constraint::exactly(1, rights.clone()),
        ));
        b.assert(Constraint::implies(
            Constraint::not(two_children),
            Constraint::and(rights.iter().cloned().map(Constraint::not)),
        ));
        b.assert(Constraint::implies(
            no_children,
            Constraint::and(lefts.into_iter().map(Constraint::not)),
        ));

        for c in n + 1..bound {
            let both = Constraint::and([s.edge(b, s.left, n, c), s.edge(b, s.right, n, c)]);
            b.assert(Constraint::not(both));
        }

        // no double negation
        for &(op, _) in s.kinds.iter().filter(|(op, _)| negation(op)) {
            for c in n + 1..bound {
                let nested = Constraint::and([
                    s.is(b, n, op.name),
                    s.edge(b, s.left, n, c),
                    s.is(b, c, op.name),
                ]);
                b.assert(Constraint::not(nested));
            }
        }
    }
}

/// `left(n, c) → (lval(n, p) ⇔ holds(c, p))`, and the same on the right.
fn child_values(b: &mut ProblemBuilder, s: &Skeleton, points: &[Point]) {
    for n in 0..s.bound {
        for c in n + 1..s.bound {
            for point in points {
                let child = s.holds(b, c, point);
                let left = Constraint::implies(
                    s.edge(b, s.left, n, c),
                    Constraint::iff(s.lval(b, n, point), child.clone()),
                );
                let right = Constraint::implies(
                    s.edge(b, s.right, n, c),
                    Constraint::iff(s.rval(b, n, point), child),
                );
                b.assert(left);
                b.assert(right);
            }
        }
    }
}
