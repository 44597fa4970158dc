//! A typed, bounded relational problem in the Kodkod style: a universe of
//! atoms, relations bounded by lower and upper tuple sets, boolean constraints
//! over tuple membership and an optional objective.
//!
//! Encoders build problems through [`ProblemBuilder`]; solver backends consume
//! the validated [`Problem`]. Every tuple between a relation's lower and upper
//! bound is a free boolean, everything else is fixed, so membership tests on
//! fact relations fold away while the problem is being built.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use itertools::Itertools;

use crate::error::{Error, Result};

pub type AtomId = usize;
pub type RelId = usize;
pub type Tuple = Vec<AtomId>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Unique within the universe; used in solver variable names.
    pub label: String,
    /// The name the decoder shows to users.
    pub surface: String,
    pub sort: String,
}

/// Bidirectional atom table: id -> (label, surface, sort) and label -> id.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    atoms: Vec<Atom>,
    by_label: HashMap<String, AtomId>,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn id(&self, label: &str) -> Option<AtomId> {
        self.by_label.get(label).copied()
    }

    pub fn atom(&self, id: AtomId) -> &Atom {
        &self.atoms[id]
    }

    pub fn label(&self, id: AtomId) -> &str {
        &self.atoms[id].label
    }

    pub fn surface(&self, id: AtomId) -> &str {
        &self.atoms[id].surface
    }

    pub fn sort(&self, id: AtomId) -> &str {
        &self.atoms[id].sort
    }

    pub fn of_sort<'a>(&'a self, sort: &'a str) -> impl Iterator<Item = AtomId> + 'a {
        self.atoms
            .iter()
            .enumerate()
            .filter(move |(_, a)| a.sort == sort)
            .map(|(id, _)| id)
    }
}

/// What a relation stands for. Only `Primary` relations distinguish one
/// candidate from another; alternative models are enumerated over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Derived,
    Fact,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub arity: usize,
    pub role: Role,
    pub lower: BTreeSet<Tuple>,
    pub upper: BTreeSet<Tuple>,
}

impl Relation {
    pub fn is_exact(&self) -> bool {
        self.lower == self.upper
    }

    /// Tuples whose membership is left to the solver.
    pub fn free_tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.upper.difference(&self.lower)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    True,
    False,
    Member(RelId, Tuple),
    Not(Box<Constraint>),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Implies(Box<Constraint>, Box<Constraint>),
    Iff(Box<Constraint>, Box<Constraint>),
    AtMost(usize, Vec<Constraint>),
    Exactly(usize, Vec<Constraint>),
}

impl Constraint {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Constraint::True
        } else {
            Constraint::False
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Constraint::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Constraint::False)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(c: Constraint) -> Self {
        match c {
            Constraint::True => Constraint::False,
            Constraint::False => Constraint::True,
            Constraint::Not(inner) => *inner,
            c => Constraint::Not(Box::new(c)),
        }
    }

    pub fn and(parts: impl IntoIterator<Item = Constraint>) -> Self {
        let mut kept = vec![];
        for part in parts {
            match part {
                Constraint::True => {}
                Constraint::False => return Constraint::False,
                Constraint::And(inner) => kept.extend(inner),
                part => kept.push(part),
            }
        }
        match kept.len() {
            0 => Constraint::True,
            1 => kept.remove(0),
            _ => Constraint::And(kept),
        }
    }

    pub fn or(parts: impl IntoIterator<Item = Constraint>) -> Self {
        let mut kept = vec![];
        for part in parts {
            match part {
                Constraint::False => {}
                Constraint::True => return Constraint::True,
                Constraint::Or(inner) => kept.extend(inner),
                part => kept.push(part),
            }
        }
        match kept.len() {
            0 => Constraint::False,
            1 => kept.remove(0),
            _ => Constraint::Or(kept),
        }
    }

    pub fn implies(lhs: Constraint, rhs: Constraint) -> Self {
        match (lhs, rhs) {
            (Constraint::False, _) | (_, Constraint::True) => Constraint::True,
            (Constraint::True, rhs) => rhs,
            (lhs, Constraint::False) => Constraint::not(lhs),
            (lhs, rhs) => Constraint::Implies(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn iff(lhs: Constraint, rhs: Constraint) -> Self {
        match (lhs, rhs) {
            (Constraint::True, c) | (c, Constraint::True) => c,
            (Constraint::False, c) | (c, Constraint::False) => Constraint::not(c),
            (lhs, rhs) => Constraint::Iff(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn at_most(k: usize, terms: impl IntoIterator<Item = Constraint>) -> Self {
        let (fixed, open) = Self::split_counted(terms);
        if fixed > k {
            return Constraint::False;
        }
        let k = k - fixed;
        if open.len() <= k {
            Constraint::True
        } else if k == 0 {
            Constraint::and(open.into_iter().map(Constraint::not))
        } else {
            Constraint::AtMost(k, open)
        }
    }

    pub fn exactly(k: usize, terms: impl IntoIterator<Item = Constraint>) -> Self {
        let (fixed, open) = Self::split_counted(terms);
        if fixed > k || open.len() < k - fixed {
            return Constraint::False;
        }
        let k = k - fixed;
        if k == 0 {
            Constraint::and(open.into_iter().map(Constraint::not))
        } else if open.len() == k {
            Constraint::and(open)
        } else {
            Constraint::Exactly(k, open)
        }
    }

    /// Number of terms already known to be true, and the undecided rest.
    fn split_counted(terms: impl IntoIterator<Item = Constraint>) -> (usize, Vec<Constraint>) {
        let mut fixed = 0;
        let mut open = vec![];
        for term in terms {
            match term {
                Constraint::True => fixed += 1,
                Constraint::False => {}
                term => open.push(term),
            }
        }
        (fixed, open)
    }

    /// Evaluates the constraint given the truth of every membership.
    pub fn eval(&self, member: &impl Fn(RelId, &[AtomId]) -> bool) -> bool {
        let count = |terms: &[Constraint]| terms.iter().filter(|t| t.eval(member)).count();
        match self {
            Constraint::True => true,
            Constraint::False => false,
            Constraint::Member(rel, tuple) => member(*rel, tuple),
            Constraint::Not(c) => !c.eval(member),
            Constraint::And(cs) => cs.iter().all(|c| c.eval(member)),
            Constraint::Or(cs) => cs.iter().any(|c| c.eval(member)),
            Constraint::Implies(a, b) => !a.eval(member) || b.eval(member),
            Constraint::Iff(a, b) => a.eval(member) == b.eval(member),
            Constraint::AtMost(k, terms) => count(terms) <= *k,
            Constraint::Exactly(k, terms) => count(terms) == *k,
        }
    }

    fn visit_members(&self, f: &mut impl FnMut(RelId, &Tuple)) {
        match self {
            Constraint::True | Constraint::False => {}
            Constraint::Member(rel, tuple) => f(*rel, tuple),
            Constraint::Not(c) => c.visit_members(f),
            Constraint::Implies(a, b) | Constraint::Iff(a, b) => {
                a.visit_members(&mut *f);
                b.visit_members(f);
            }
            Constraint::And(cs)
            | Constraint::Or(cs)
            | Constraint::AtMost(_, cs)
            | Constraint::Exactly(_, cs) => {
                for c in cs {
                    c.visit_members(&mut *f);
                }
            }
        }
    }
}

/// Minimise the number of terms that are true.
#[derive(Debug, Clone, Default)]
pub struct Objective {
    pub terms: Vec<Constraint>,
}

#[derive(Debug, Clone)]
pub struct Problem {
    universe: Universe,
    relations: Vec<Relation>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
    fragments: Vec<String>,
}

impl Problem {
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, id: RelId) -> &Relation {
        &self.relations[id]
    }

    pub fn relation_id(&self, name: &str) -> Option<RelId> {
        self.relations.iter().position(|r| r.name == name)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    /// Raw SMT-LIB 2 text to be asserted alongside the constraints.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Solver-level name of a membership variable: `relation!label1!label2`.
    pub fn var_name(&self, rel: RelId, tuple: &[AtomId]) -> String {
        std::iter::once(self.relations[rel].name.as_str())
            .chain(tuple.iter().map(|a| self.universe.label(*a)))
            .join("!")
    }

    pub fn free_var_count(&self) -> usize {
        self.relations.iter().map(|r| r.free_tuples().count()).sum()
    }

    fn write_constraint(&self, f: &mut fmt::Formatter<'_>, c: &Constraint) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, head: &str, cs: &[Constraint]| -> fmt::Result {
            write!(f, "({head}")?;
            for c in cs {
                write!(f, " ")?;
                self.write_constraint(f, c)?;
            }
            write!(f, ")")
        };
        match c {
            Constraint::True => write!(f, "true"),
            Constraint::False => write!(f, "false"),
            Constraint::Member(rel, tuple) => write!(f, "{}", self.var_name(*rel, tuple)),
            Constraint::Not(c) => list(f, "not", std::slice::from_ref(c)),
            Constraint::And(cs) => list(f, "and", cs),
            Constraint::Or(cs) => list(f, "or", cs),
            Constraint::Implies(a, b) => list(f, "=>", &[(**a).clone(), (**b).clone()]),
            Constraint::Iff(a, b) => list(f, "=", &[(**a).clone(), (**b).clone()]),
            Constraint::AtMost(k, cs) => list(f, &format!("at-most {k}"), cs),
            Constraint::Exactly(k, cs) => list(f, &format!("exactly {k}"), cs),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; universe: {} atoms", self.universe.len())?;
        for (sort, atoms) in &self.universe.atoms.iter().chunk_by(|a| a.sort.as_str()) {
            writeln!(f, ";   {sort}: {}", atoms.map(|a| a.label.as_str()).join(" "))?;
        }
        for r in &self.relations {
            writeln!(
                f,
                "; relation {}/{} {:?} lower {} upper {}",
                r.name,
                r.arity,
                r.role,
                r.lower.len(),
                r.upper.len()
            )?;
        }
        for c in &self.constraints {
            self.write_constraint(f, c)?;
            writeln!(f)?;
        }
        if let Some(objective) = &self.objective {
            write!(f, "(minimize")?;
            for term in &objective.terms {
                write!(f, " ")?;
                self.write_constraint(f, term)?;
            }
            writeln!(f, ")")?;
        }
        for fragment in &self.fragments {
            writeln!(f, "{fragment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProblemBuilder {
    universe: Universe,
    relations: Vec<Relation>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
    fragments: Vec<String>,
    errors: Vec<String>,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Adds an atom. A repeated label is reported by [`ProblemBuilder::build`].
    pub fn atom(&mut self, label: impl Into<String>, surface: impl Into<String>, sort: &str) -> AtomId {
        let label = label.into();
        if let Some(id) = self.universe.id(&label) {
            self.errors.push(format!("atom label '{label}' declared twice"));
            return id;
        }
        let id = self.universe.atoms.len();
        self.universe.by_label.insert(label.clone(), id);
        self.universe.atoms.push(Atom {
            label,
            surface: surface.into(),
            sort: sort.to_string(),
        });
        id
    }

    pub fn relation(&mut self, name: &str, arity: usize, role: Role) -> RelId {
        if self.relations.iter().any(|r| r.name == name) {
            self.errors.push(format!("relation '{name}' declared twice"));
        }
        self.relations.push(Relation {
            name: name.to_string(),
            arity,
            role,
            lower: BTreeSet::new(),
            upper: BTreeSet::new(),
        });
        self.relations.len() - 1
    }

    pub fn relation_id(&self, name: &str) -> Result<RelId> {
        self.relations
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::MalformedProblem(format!("relation '{name}' is not declared")))
    }

    /// Lets the solver decide whether `tuple` belongs to `rel`.
    pub fn allow(&mut self, rel: RelId, tuple: Tuple) {
        self.relations[rel].upper.insert(tuple);
    }

    /// Puts `tuple` in `rel` unconditionally.
    pub fn include(&mut self, rel: RelId, tuple: Tuple) {
        let relation = &mut self.relations[rel];
        relation.upper.insert(tuple.clone());
        relation.lower.insert(tuple);
    }

    /// Membership test, folded to a constant when the bounds decide it.
    pub fn member(&self, rel: RelId, tuple: &[AtomId]) -> Constraint {
        let relation = &self.relations[rel];
        if relation.lower.contains(tuple) {
            Constraint::True
        } else if !relation.upper.contains(tuple) {
            Constraint::False
        } else {
            Constraint::Member(rel, tuple.to_vec())
        }
    }

    pub fn assert(&mut self, c: Constraint) {
        if !c.is_true() {
            self.constraints.push(c);
        }
    }

    pub fn minimize(&mut self, terms: impl IntoIterator<Item = Constraint>) {
        let terms = terms.into_iter().filter(|t| !t.is_false()).collect();
        self.objective = Some(Objective { terms });
    }

    pub fn raw(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    pub fn build(self) -> Result<Problem> {
        let malformed = |msg: String| Err(Error::MalformedProblem(msg));
        if let Some(err) = self.errors.first() {
            return malformed(err.clone());
        }
        if let Some(atom) = self
            .universe
            .atoms
            .iter()
            .find(|a| a.label.is_empty() || a.label.contains(['|', '!', ' ']))
        {
            return malformed(format!("atom label '{}' is not usable in variable names", atom.label));
        }
        let atoms = self.universe.len();
        for r in &self.relations {
            if let Some(t) = r.upper.iter().find(|t| t.len() != r.arity) {
                return malformed(format!("tuple of size {} in {}/{}", t.len(), r.name, r.arity));
            }
            if r.upper.iter().flatten().any(|a| *a >= atoms) {
                return malformed(format!("relation {} mentions an unknown atom", r.name));
            }
            if !r.lower.is_subset(&r.upper) {
                return malformed(format!("lower bound of {} exceeds its upper bound", r.name));
            }
            if r.role == Role::Fact && !r.is_exact() {
                return malformed(format!("fact relation {} is not exact", r.name));
            }
        }
        let mut bad = None;
        for c in self
            .constraints
            .iter()
            .chain(self.objective.iter().flat_map(|o| &o.terms))
        {
            c.visit_members(&mut |rel, tuple| {
                let ok = self
                    .relations
                    .get(rel)
                    .is_some_and(|r| r.upper.contains(tuple) && !r.lower.contains(tuple));
                if !ok && bad.is_none() {
                    bad = Some((rel, tuple.clone()));
                }
            });
        }
        if let Some((rel, tuple)) = bad {
            return malformed(format!("membership of {tuple:?} in relation #{rel} is not a free tuple"));
        }
        Ok(Problem {
            universe: self.universe,
            relations: self.relations,
            constraints: self.constraints,
            objective: self.objective,
            fragments: self.fragments,
        })
    }
}
