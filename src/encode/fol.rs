//! First-order logic over finite structures.
//!
//! Formulas are evaluated at `(example, environment)` points, where an
//! environment is a partial map from variables to elements. Environments are
//! enumerated up front and keyed by their mapping, so extending one with a
//! binding always lands on a single, well-defined environment.
//!
//! Atom arguments are variables, elements (constants) or function-term slots.
//! Slots are shared by every atom that mentions the same term and only point
//! at slots with a higher index, so terms are acyclic.

use std::collections::{BTreeSet, HashMap};
use std::iter;

use itertools::Itertools;

use super::{Encoding, Logic, Point, Sample, Semantics, Sharing, Skeleton};
use crate::error::{invalid, Error, Result};
use crate::formula::{Formula, Operator, Term, FOL_OPERATORS};
use crate::problem::{AtomId, Constraint, ProblemBuilder, RelId, Role, Universe};
use crate::sample::structure::{FolTask, Structure, TermPolicy};
use crate::solver::Valuation;

const SORT: &str = "Sort";
const RELATION: &str = "Relation";
const FUNCTION: &str = "Function";
const ELEMENT: &str = "Element";
const VAR: &str = "Var";
const ENV: &str = "Env";
const EXAMPLE: &str = "Example";
const SLOT: &str = "Slot";
const IDX: &str = "Idx";

/// Variable index -> element index.
type Mapping = Vec<Option<usize>>;

pub struct FolLogic {
    task: FolTask,
    /// Name and sort of every element, in order of first appearance.
    elements: Vec<(String, String)>,
    element_index: HashMap<String, usize>,
    /// Elements of each example, positives first.
    domains: Vec<BTreeSet<usize>>,
    envs: Vec<Mapping>,
    env_index: HashMap<Mapping, usize>,
    /// Environments whose range lies inside each example's domain.
    applicable: Vec<Vec<usize>>,
}

/// The atoms of one encoding, grouped by sort in declaration order.
struct Atoms {
    sorts: Vec<AtomId>,
    relations: Vec<AtomId>,
    functions: Vec<AtomId>,
    elements: Vec<AtomId>,
    vars: Vec<AtomId>,
    envs: Vec<AtomId>,
    examples: Vec<AtomId>,
    slots: Vec<AtomId>,
    idx: Vec<AtomId>,
}

impl Atoms {
    fn of(universe: &Universe) -> Self {
        let get = |sort: &str| universe.of_sort(sort).collect::<Vec<_>>();
        Atoms {
            sorts: get(SORT),
            relations: get(RELATION),
            functions: get(FUNCTION),
            elements: get(ELEMENT),
            vars: get(VAR),
            envs: get(ENV),
            examples: get(EXAMPLE),
            slots: get(SLOT),
            idx: get(IDX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermAtom {
    Var(usize),
    Element(usize),
    Slot(usize),
}

impl TermAtom {
    fn id(self, a: &Atoms) -> AtomId {
        match self {
            TermAtom::Var(i) => a.vars[i],
            TermAtom::Element(i) => a.elements[i],
            TermAtom::Slot(i) => a.slots[i],
        }
    }
}

impl FolLogic {
    pub fn new(task: FolTask) -> Result<Self> {
        let mut elements: Vec<(String, String)> = vec![];
        let mut element_index: HashMap<String, usize> = HashMap::new();
        let mut domains = vec![];
        for structure in task.positives.iter().chain(&task.negatives) {
            let mut domain = BTreeSet::new();
            for c in &structure.constants {
                let index = match element_index.get(&c.name) {
                    Some(&i) if elements[i].1 != c.sort => {
                        return Err(invalid(format!(
                            "element '{}' has sort {} in one example and {} in another",
                            c.name, elements[i].1, c.sort
                        )))
                    }
                    Some(&i) => i,
                    None => {
                        elements.push((c.name.clone(), c.sort.clone()));
                        element_index.insert(c.name.clone(), elements.len() - 1);
                        elements.len() - 1
                    }
                };
                domain.insert(index);
            }
            domains.push(domain);
        }

        let mut envs: Vec<Mapping> = vec![];
        let mut env_index = HashMap::new();
        let mut applicable = vec![];
        for domain in &domains {
            let choices: Vec<Option<usize>> = iter::once(None).chain(domain.iter().copied().map(Some)).collect();
            let mappings: Vec<Mapping> = if task.max_quantifiers == 0 {
                vec![vec![]]
            } else {
                (0..task.max_quantifiers)
                    .map(|_| choices.iter().copied())
                    .multi_cartesian_product()
                    .collect()
            };
            let mut mine = vec![];
            for mapping in mappings {
                let id = match env_index.get(&mapping) {
                    Some(&id) => id,
                    None => {
                        envs.push(mapping.clone());
                        env_index.insert(mapping, envs.len() - 1);
                        envs.len() - 1
                    }
                };
                mine.push(id);
            }
            applicable.push(mine);
        }

        Ok(FolLogic {
            task,
            elements,
            element_index,
            domains,
            envs,
            env_index,
            applicable,
        })
    }

    pub fn task(&self) -> &FolTask {
        &self.task
    }

    fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.task.positives.iter().chain(&self.task.negatives)
    }

    fn structure(&self, example: usize) -> Option<&Structure> {
        self.structures().nth(example)
    }

    fn empty_env(&self) -> Option<usize> {
        self.env_index.get(&vec![None; self.task.max_quantifiers]).copied()
    }

    /// The environment `env[var ↦ element]`.
    fn extend(&self, env: usize, var: usize, element: usize) -> Option<usize> {
        let mut mapping = self.envs[env].clone();
        mapping[var] = Some(element);
        self.env_index.get(&mapping).copied()
    }

    fn element_ids(&self, tuple: &[String]) -> Option<Vec<usize>> {
        tuple.iter().map(|name| self.element_index.get(name).copied()).collect()
    }

    fn max_relation_arity(&self) -> usize {
        self.task.relations.iter().map(|r| r.arity()).max().unwrap_or(0)
    }

    fn max_function_inputs(&self) -> usize {
        self.task.functions.iter().map(|f| f.arity() - 1).max().unwrap_or(0)
    }

    /// Terms an atom may take as arguments.
    fn arg_terms(&self, a: &Atoms) -> Vec<TermAtom> {
        let vars = (0..a.vars.len()).map(TermAtom::Var);
        match self.task.term_policy {
            TermPolicy::VariablesOnly => vars.collect(),
            TermPolicy::Any | TermPolicy::Uniform => vars
                .chain((0..a.elements.len()).map(TermAtom::Element))
                .chain((0..a.slots.len()).map(TermAtom::Slot))
                .collect(),
        }
    }

    /// Terms the arguments of function slot `slot` may point at.
    fn slot_terms(&self, a: &Atoms, slot: usize) -> Vec<TermAtom> {
        (0..a.vars.len())
            .map(TermAtom::Var)
            .chain((0..a.elements.len()).map(TermAtom::Element))
            .chain((slot + 1..a.slots.len()).map(TermAtom::Slot))
            .collect()
    }

    fn sort_atom(&self, a: &Atoms, sort: &str) -> Option<AtomId> {
        self.task.sorts.iter().position(|s| s.as_str() == sort).map(|i| a.sorts[i])
    }

    fn quantifier(b: &ProblemBuilder, s: &Skeleton, n: usize) -> Constraint {
        Constraint::or([s.is(b, n, "Forall"), s.is(b, n, "Exists")])
    }

    /// The term denotes element `e` in example `ex` under environment `env`.
    fn value(&self, b: &ProblemBuilder, a: &Atoms, term: TermAtom, ex: usize, env: usize, e: usize) -> Result<Constraint> {
        Ok(match term {
            TermAtom::Var(v) => b.member(b.relation_id("binding")?, &[a.envs[env], a.vars[v], a.elements[e]]),
            TermAtom::Element(c) if c == e => b.member(b.relation_id("domain")?, &[a.examples[ex], a.elements[e]]),
            TermAtom::Element(_) => Constraint::False,
            TermAtom::Slot(slot) => b.member(
                b.relation_id("tval")?,
                &[a.slots[slot], a.examples[ex], a.envs[env], a.elements[e]],
            ),
        })
    }

    /// Some argument at position `i` of `owner` (through `rel`) denotes `e`.
    #[allow(clippy::too_many_arguments)]
    fn argument_value(
        &self,
        b: &ProblemBuilder,
        a: &Atoms,
        rel: &str,
        owner: AtomId,
        terms: &[TermAtom],
        i: usize,
        ex: usize,
        env: usize,
        e: usize,
    ) -> Result<Constraint> {
        let rel = b.relation_id(rel)?;
        let mut options = vec![];
        for &t in terms {
            options.push(Constraint::and([
                b.member(rel, &[owner, a.idx[i], t.id(a)]),
                self.value(b, a, t, ex, env, e)?,
            ]));
        }
        Ok(Constraint::or(options))
    }

    /// The term has the given sort.
    fn has_sort(&self, b: &ProblemBuilder, a: &Atoms, s: &Skeleton, term: TermAtom, sort: &str) -> Result<Constraint> {
        let Some(sort_atom) = self.sort_atom(a, sort) else {
            return Ok(Constraint::False);
        };
        Ok(match term {
            TermAtom::Var(v) => {
                let bound_var = b.relation_id("bound_var")?;
                let qsort = b.relation_id("qsort")?;
                Constraint::or(s.nodes.iter().map(|&n| {
                    Constraint::and([b.member(bound_var, &[n, a.vars[v]]), b.member(qsort, &[n, sort_atom])])
                }))
            }
            TermAtom::Element(e) => b.member(b.relation_id("sort_of")?, &[a.elements[e], sort_atom]),
            TermAtom::Slot(slot) => {
                let tfunc = b.relation_id("tfunc")?;
                Constraint::or(
                    self.task
                        .functions
                        .iter()
                        .zip(&a.functions)
                        .filter(|(f, _)| f.signature.last().is_some_and(|r| r.as_str() == sort))
                        .map(|(_, &f)| b.member(tfunc, &[a.slots[slot], f])),
                )
            }
        })
    }

    /// Atom node `n` has variable `v` among its arguments, directly or
    /// inside a function term.
    fn mentions(&self, b: &ProblemBuilder, a: &Atoms, s: &Skeleton, n: usize, v: usize) -> Result<Constraint> {
        let arg = b.relation_id("arg")?;
        let tmentions = b.relation_id("tmentions")?;
        let mut options = vec![];
        for i in 0..self.max_relation_arity() {
            for t in self.arg_terms(a) {
                match t {
                    TermAtom::Var(w) if w == v => options.push(b.member(arg, &[s.nodes[n], a.idx[i], a.vars[v]])),
                    TermAtom::Slot(slot) => options.push(Constraint::and([
                        b.member(arg, &[s.nodes[n], a.idx[i], a.slots[slot]]),
                        b.member(tmentions, &[a.slots[slot], a.vars[v]]),
                    ])),
                    _ => {}
                }
            }
        }
        Ok(Constraint::or(options))
    }

    fn declare_structure(&self, b: &mut ProblemBuilder, s: &Skeleton, a: &Atoms) {
        let bound_var = b.relation("bound_var", 2, Role::Primary);
        let qsort = b.relation("qsort", 2, Role::Primary);
        let atom_rel = b.relation("atom_rel", 2, Role::Primary);
        let arg = b.relation("arg", 3, Role::Primary);
        let tfunc = b.relation("tfunc", 2, Role::Primary);
        let targ = b.relation("targ", 3, Role::Primary);
        let tused = b.relation("tused", 1, Role::Derived);
        let tmentions = b.relation("tmentions", 2, Role::Derived);
        let tval = b.relation("tval", 4, Role::Derived);
        let anc = b.relation("anc", 2, Role::Derived);

        let arg_terms = self.arg_terms(a);
        for (i, &n) in s.nodes.iter().enumerate() {
            a.vars.iter().for_each(|&v| b.allow(bound_var, vec![n, v]));
            a.sorts.iter().for_each(|&x| b.allow(qsort, vec![n, x]));
            a.relations.iter().for_each(|&r| b.allow(atom_rel, vec![n, r]));
            for &idx in &a.idx[..self.max_relation_arity()] {
                for t in &arg_terms {
                    b.allow(arg, vec![n, idx, t.id(a)]);
                }
            }
            for &c in &s.nodes[i + 1..] {
                b.allow(anc, vec![n, c]);
            }
        }
        for (si, &slot) in a.slots.iter().enumerate() {
            b.allow(tused, vec![slot]);
            a.functions.iter().for_each(|&f| b.allow(tfunc, vec![slot, f]));
            a.vars.iter().for_each(|&v| b.allow(tmentions, vec![slot, v]));
            for &idx in &a.idx[..self.max_function_inputs()] {
                for t in self.slot_terms(a, si) {
                    b.allow(targ, vec![slot, idx, t.id(a)]);
                }
            }
            for (k, envs) in self.applicable.iter().enumerate() {
                for &env in envs {
                    for &e in &self.domains[k] {
                        b.allow(tval, vec![slot, a.examples[k], a.envs[env], a.elements[e]]);
                    }
                }
            }
        }
    }

    fn quantifiers(&self, b: &mut ProblemBuilder, s: &Skeleton, a: &Atoms) -> Result<()> {
        let bound_var = b.relation_id("bound_var")?;
        let qsort = b.relation_id("qsort")?;
        for n in 0..s.bound {
            let q = Self::quantifier(b, s, n);
            for (rel, targets) in [(bound_var, &a.vars), (qsort, &a.sorts)] {
                let options: Vec<Constraint> = targets.iter().map(|&x| b.member(rel, &[s.nodes[n], x])).collect();
                b.assert(Constraint::implies(q.clone(), Constraint::exactly(1, options.clone())));
                b.assert(Constraint::implies(
                    Constraint::not(q.clone()),
                    Constraint::and(options.into_iter().map(Constraint::not)),
                ));
            }
        }

        for (k, &v) in a.vars.iter().enumerate() {
            let binders: Vec<Constraint> = s.nodes.iter().map(|&n| b.member(bound_var, &[n, v])).collect();
            b.assert(Constraint::at_most(1, binders));
            // variables are introduced in order, outermost first
            if k > 0 {
                for n in 0..s.bound {
                    let earlier = Constraint::or((0..n).map(|m| b.member(bound_var, &[s.nodes[m], a.vars[k - 1]])));
                    b.assert(Constraint::implies(b.member(bound_var, &[s.nodes[n], v]), earlier));
                }
            }
        }

        let all: Vec<Constraint> = (0..s.bound).map(|n| Self::quantifier(b, s, n)).collect();
        b.assert(Constraint::at_most(self.task.max_quantifiers, all));

        if self.task.prenex {
            for c in 1..s.bound {
                for p in 0..c {
                    let nested = Constraint::and([s.child(b, p, c), Self::quantifier(b, s, c)]);
                    b.assert(Constraint::implies(nested, Self::quantifier(b, s, p)));
                }
            }
        }
        Ok(())
    }

    fn ancestry(&self, b: &mut ProblemBuilder, s: &Skeleton) -> Result<()> {
        let anc = b.relation_id("anc")?;
        for c in 0..s.bound {
            for top in 0..c {
                let through = (top + 1..c).map(|p| {
                    Constraint::and([s.child(b, p, c), b.member(anc, &[s.nodes[top], s.nodes[p]])])
                });
                let via = Constraint::or(iter::once(s.child(b, top, c)).chain(through));
                b.assert(Constraint::iff(b.member(anc, &[s.nodes[top], s.nodes[c]]), via));
            }
        }
        Ok(())
    }

    fn atoms(&self, b: &mut ProblemBuilder, s: &Skeleton, a: &Atoms) -> Result<()> {
        let atom_rel = b.relation_id("atom_rel")?;
        let arg = b.relation_id("arg")?;
        let terms = self.arg_terms(a);
        let width = self.max_relation_arity();
        for n in 0..s.bound {
            let node = s.nodes[n];
            let is_atom = s.is(b, n, "Atom");
            let rels: Vec<Constraint> = a.relations.iter().map(|&r| b.member(atom_rel, &[node, r])).collect();
            b.assert(Constraint::implies(is_atom.clone(), Constraint::exactly(1, rels.clone())));
            b.assert(Constraint::implies(
                Constraint::not(is_atom.clone()),
                Constraint::and(rels.into_iter().map(Constraint::not)),
            ));
            let all_args: Vec<Constraint> = (0..width)
                .flat_map(|i| terms.iter().map(move |t| (i, *t)))
                .map(|(i, t)| b.member(arg, &[node, a.idx[i], t.id(a)]))
                .collect();
            b.assert(Constraint::implies(
                Constraint::not(is_atom),
                Constraint::and(all_args.into_iter().map(Constraint::not)),
            ));

            for (symbol, &r) in self.task.relations.iter().zip(&a.relations) {
                let chosen = b.member(atom_rel, &[node, r]);
                for i in 0..width {
                    let args: Vec<Constraint> = terms.iter().map(|t| b.member(arg, &[node, a.idx[i], t.id(a)])).collect();
                    if i < symbol.arity() {
                        b.assert(Constraint::implies(chosen.clone(), Constraint::exactly(1, args)));
                        for &t in &terms {
                            let here = Constraint::and([chosen.clone(), b.member(arg, &[node, a.idx[i], t.id(a)])]);
                            let typed = self.has_sort(b, a, s, t, &symbol.signature[i])?;
                            b.assert(Constraint::implies(here, typed));
                        }
                    } else {
                        b.assert(Constraint::implies(
                            chosen.clone(),
                            Constraint::and(args.into_iter().map(Constraint::not)),
                        ));
                    }
                }
            }

            if self.task.term_policy == TermPolicy::Uniform {
                let (vars, others): (Vec<TermAtom>, Vec<TermAtom>) =
                    terms.iter().copied().partition(|t| matches!(t, TermAtom::Var(_)));
                let any = |group: &[TermAtom]| {
                    Constraint::or(
                        (0..width)
                            .flat_map(|i| group.iter().map(move |t| (i, *t)))
                            .map(|(i, t)| b.member(arg, &[node, a.idx[i], t.id(a)])),
                    )
                };
                let mixed = Constraint::and([any(&vars), any(&others)]);
                b.assert(Constraint::not(mixed));
            }

            // no two atoms with the same relation and arguments
            for m in n + 1..s.bound {
                let other = s.nodes[m];
                let same_rel = Constraint::or(
                    a.relations
                        .iter()
                        .map(|&r| Constraint::and([b.member(atom_rel, &[node, r]), b.member(atom_rel, &[other, r])])),
                );
                let same_args = Constraint::and((0..width).flat_map(|i| terms.iter().map(move |t| (i, *t))).map(
                    |(i, t)| {
                        Constraint::iff(
                            b.member(arg, &[node, a.idx[i], t.id(a)]),
                            b.member(arg, &[other, a.idx[i], t.id(a)]),
                        )
                    },
                ));
                b.assert(Constraint::not(Constraint::and([same_rel, same_args])));
            }
        }
        Ok(())
    }

    fn function_terms(&self, b: &mut ProblemBuilder, s: &Skeleton, a: &Atoms) -> Result<()> {
        let arg = b.relation_id("arg")?;
        let tfunc = b.relation_id("tfunc")?;
        let targ = b.relation_id("targ")?;
        let tused = b.relation_id("tused")?;
        let tmentions = b.relation_id("tmentions")?;
        let tval = b.relation_id("tval")?;
        let inputs = self.max_function_inputs();

        for (si, &slot) in a.slots.iter().enumerate() {
            let terms = self.slot_terms(a, si);
            let used = b.member(tused, &[slot]);
            let from_atoms = s
                .nodes
                .iter()
                .flat_map(|&n| a.idx[..self.max_relation_arity()].iter().map(move |&i| (n, i)))
                .map(|(n, i)| b.member(arg, &[n, i, slot]));
            let from_slots = a.slots[..si]
                .iter()
                .flat_map(|&p| a.idx[..inputs].iter().map(move |&i| (p, i)))
                .map(|(p, i)| b.member(targ, &[p, i, slot]));
            let referenced = Constraint::or(from_atoms.chain(from_slots).collect::<Vec<_>>());
            b.assert(Constraint::iff(used.clone(), referenced));
            if let Some(&next) = a.slots.get(si + 1) {
                b.assert(Constraint::implies(b.member(tused, &[next]), used.clone()));
            }

            let funcs: Vec<Constraint> = a.functions.iter().map(|&f| b.member(tfunc, &[slot, f])).collect();
            b.assert(Constraint::implies(used.clone(), Constraint::exactly(1, funcs.clone())));
            b.assert(Constraint::implies(
                Constraint::not(used.clone()),
                Constraint::and(funcs.into_iter().map(Constraint::not)),
            ));
            let all_args: Vec<Constraint> = (0..inputs)
                .flat_map(|j| terms.iter().map(move |t| (j, *t)))
                .map(|(j, t)| b.member(targ, &[slot, a.idx[j], t.id(a)]))
                .collect();
            b.assert(Constraint::implies(
                Constraint::not(used),
                Constraint::and(all_args.into_iter().map(Constraint::not)),
            ));

            for (symbol, &f) in self.task.functions.iter().zip(&a.functions) {
                let chosen = b.member(tfunc, &[slot, f]);
                for j in 0..inputs {
                    let args: Vec<Constraint> = terms.iter().map(|t| b.member(targ, &[slot, a.idx[j], t.id(a)])).collect();
                    if j + 1 < symbol.arity() {
                        b.assert(Constraint::implies(chosen.clone(), Constraint::exactly(1, args)));
                        for &t in &terms {
                            let here = Constraint::and([chosen.clone(), b.member(targ, &[slot, a.idx[j], t.id(a)])]);
                            let typed = self.has_sort(b, a, s, t, &symbol.signature[j])?;
                            b.assert(Constraint::implies(here, typed));
                        }
                    } else {
                        b.assert(Constraint::implies(
                            chosen.clone(),
                            Constraint::and(args.into_iter().map(Constraint::not)),
                        ));
                    }
                }
            }

            for (v, &var) in a.vars.iter().enumerate() {
                let mut options = vec![];
                for j in 0..inputs {
                    for &t in &terms {
                        match t {
                            TermAtom::Var(w) if w == v => options.push(b.member(targ, &[slot, a.idx[j], var])),
                            TermAtom::Slot(inner) => options.push(Constraint::and([
                                b.member(targ, &[slot, a.idx[j], a.slots[inner]]),
                                b.member(tmentions, &[a.slots[inner], var]),
                            ])),
                            _ => {}
                        }
                    }
                }
                let mentions = b.member(tmentions, &[slot, var]);
                b.assert(Constraint::iff(mentions, Constraint::or(options)));
            }

            for (k, structure) in self.structures().enumerate() {
                for &env in &self.applicable[k] {
                    for &e in &self.domains[k] {
                        let mut options = vec![];
                        for (symbol, &f) in self.task.functions.iter().zip(&a.functions) {
                            let graph = structure.function_facts.get(&symbol.name).into_iter().flatten();
                            for tuple in graph {
                                let Some(ids) = self.element_ids(tuple) else { continue };
                                let (result, args) = ids.split_last().ok_or_else(|| invalid("empty function tuple"))?;
                                if *result != e {
                                    continue;
                                }
                                let mut parts = vec![b.member(tfunc, &[slot, f])];
                                for (j, &x) in args.iter().enumerate() {
                                    parts.push(self.argument_value(b, a, "targ", slot, &terms, j, k, env, x)?);
                                }
                                options.push(Constraint::and(parts));
                            }
                        }
                        let value = b.member(tval, &[slot, a.examples[k], a.envs[env], a.elements[e]]);
                        b.assert(Constraint::iff(value, Constraint::or(options)));
                    }
                }
            }
        }
        Ok(())
    }

    /// No free variables, and every quantifier's variable occurs below it.
    fn scoping(&self, b: &mut ProblemBuilder, s: &Skeleton, a: &Atoms) -> Result<()> {
        let anc = b.relation_id("anc")?;
        let bound_var = b.relation_id("bound_var")?;
        for (v, &var) in a.vars.iter().enumerate() {
            for n in 0..s.bound {
                let mentioned = self.mentions(b, a, s, n, v)?;
                let in_scope = Constraint::or(
                    (0..n).map(|top| Constraint::and([b.member(anc, &[s.nodes[top], s.nodes[n]]), b.member(bound_var, &[s.nodes[top], var])])),
                );
                b.assert(Constraint::implies(mentioned, in_scope));

                let mut below = vec![];
                for m in n + 1..s.bound {
                    below.push(Constraint::and([
                        b.member(anc, &[s.nodes[n], s.nodes[m]]),
                        self.mentions(b, a, s, m, v)?,
                    ]));
                }
                b.assert(Constraint::implies(b.member(bound_var, &[s.nodes[n], var]), Constraint::or(below)));
            }
        }
        Ok(())
    }

    fn walk_arguments(
        &self,
        encoding: &Encoding,
        model: &dyn Valuation,
        rel: &str,
        owner: AtomId,
    ) -> Result<Vec<Term>> {
        let rel = encoding.relation(rel)?;
        let first = encoding.relation("idx_first")?;
        let next = encoding.relation("idx_next")?;
        let args = model.tuples(rel);
        let successors = model.tuples(next);
        let mut idx = model.tuples(first).first().map(|t| t[0]);
        let mut terms = vec![];
        while let Some(i) = idx {
            let Some(arg) = args.iter().find(|t| t[0] == owner && t[1] == i) else {
                break;
            };
            terms.push(self.decode_term(encoding, model, arg[2])?);
            idx = successors.iter().find(|t| t[0] == i).map(|t| t[1]);
        }
        Ok(terms)
    }

    fn decode_term(&self, encoding: &Encoding, model: &dyn Valuation, atom: AtomId) -> Result<Term> {
        let universe = encoding.problem.universe();
        match universe.sort(atom) {
            VAR => Ok(Term::Var(universe.surface(atom).to_lowercase())),
            ELEMENT => Ok(Term::Const(universe.surface(atom).to_string())),
            SLOT => {
                let tfunc = encoding.relation("tfunc")?;
                let function = model
                    .tuples(tfunc)
                    .into_iter()
                    .find(|t| t[0] == atom)
                    .ok_or_else(|| Error::Decode(format!("term {} has no function", universe.label(atom))))?;
                Ok(Term::Func {
                    name: universe.surface(function[1]).to_string(),
                    args: self.walk_arguments(encoding, model, "targ", atom)?,
                })
            }
            other => Err(Error::Decode(format!("atom of sort {other} used as a term"))),
        }
    }
}

/// Operator semantics for one encoding, with the atom table computed once.
struct FolSemantics<'a> {
    logic: &'a FolLogic,
    atoms: Atoms,
    terms: Vec<TermAtom>,
    atom_rel: RelId,
    bound_var: RelId,
    qsort: RelId,
}

impl Semantics for FolSemantics<'_> {
    fn body(
        &self,
        b: &ProblemBuilder,
        s: &Skeleton,
        n: usize,
        op: &'static Operator,
        point: &[AtomId],
    ) -> Result<Constraint> {
        let a = &self.atoms;
        let (ex, env) = (point[0], point[1]);
        let k = a
            .examples
            .iter()
            .position(|x| *x == ex)
            .ok_or_else(|| Error::MalformedProblem("point outside the examples".into()))?;
        let env = a
            .envs
            .iter()
            .position(|x| *x == env)
            .ok_or_else(|| Error::MalformedProblem("point outside the environments".into()))?;
        let structure = self
            .logic
            .structure(k)
            .ok_or_else(|| Error::MalformedProblem("point outside the examples".into()))?;
        let node = s.nodes[n];

        match op.name {
            "Atom" => {
                let mut options = vec![];
                for (symbol, &r) in self.logic.task.relations.iter().zip(&a.relations) {
                    let chosen = b.member(self.atom_rel, &[node, r]);
                    if chosen.is_false() {
                        continue;
                    }
                    let mut tuples = vec![];
                    for tuple in structure.relation_facts.get(&symbol.name).into_iter().flatten() {
                        let Some(ids) = self.logic.element_ids(tuple) else { continue };
                        let mut args = vec![];
                        for (i, &e) in ids.iter().enumerate() {
                            args.push(self.logic.argument_value(b, a, "arg", node, &self.terms, i, k, env, e)?);
                        }
                        tuples.push(Constraint::and(args));
                    }
                    options.push(Constraint::and([chosen, Constraint::or(tuples)]));
                }
                Ok(Constraint::or(options))
            }
            "Forall" | "Exists" => {
                let mut cases = vec![];
                for v in 0..a.vars.len() {
                    for (sort, &sort_atom) in self.logic.task.sorts.iter().zip(&a.sorts) {
                        let mut bodies = vec![];
                        for &e in self.logic.domains[k].iter().filter(|e| &self.logic.elements[**e].1 == sort) {
                            let extended = self
                                .logic
                                .extend(env, v, e)
                                .ok_or_else(|| Error::MalformedProblem("environment not enumerated".into()))?;
                            bodies.push(s.lval(b, n, &[ex, a.envs[extended]]));
                        }
                        let body = if op.name == "Forall" {
                            Constraint::and(bodies)
                        } else {
                            Constraint::or(bodies)
                        };
                        let binds = Constraint::and([b.member(self.bound_var, &[node, a.vars[v]]), b.member(self.qsort, &[node, sort_atom])]);
                        cases.push(Constraint::implies(binds, body));
                    }
                }
                Ok(Constraint::and(cases))
            }
            other => Err(Error::MalformedProblem(format!("no FOL semantics for operator {other}"))),
        }
    }
}

impl Logic for FolLogic {
    fn name(&self) -> &'static str {
        "FOL"
    }

    fn operators(&self) -> &'static [Operator] {
        &FOL_OPERATORS
    }

    fn excluded(&self) -> &BTreeSet<String> {
        &self.task.excluded
    }

    fn sharing(&self) -> Sharing {
        Sharing::Tree
    }

    fn max_nodes(&self) -> usize {
        self.task.max_nodes
    }

    fn vocabulary_size(&self) -> usize {
        self.task.sorts.len()
    }

    fn custom_constraints(&self) -> Option<&str> {
        self.task.custom_constraints.as_deref()
    }

    fn declare(&self, b: &mut ProblemBuilder, bound: usize) -> Result<(Vec<Point>, Vec<Sample>)> {
        let task = &self.task;
        let sorts: Vec<AtomId> = task.sorts.iter().map(|s| b.atom(format!("sort_{s}"), s.as_str(), SORT)).collect();
        for r in &task.relations {
            b.atom(format!("rel_{}", r.name), r.name.as_str(), RELATION);
        }
        for f in &task.functions {
            b.atom(format!("fun_{}", f.name), f.name.as_str(), FUNCTION);
        }
        let elements: Vec<AtomId> = self
            .elements
            .iter()
            .map(|(name, _)| b.atom(format!("el_{name}"), name.as_str(), ELEMENT))
            .collect();
        let vars: Vec<AtomId> = (0..task.max_quantifiers).map(|i| b.atom(format!("V{i}"), format!("V{i}"), VAR)).collect();
        let envs: Vec<AtomId> = self
            .envs
            .iter()
            .enumerate()
            .map(|(i, mapping)| {
                let surface = mapping
                    .iter()
                    .enumerate()
                    .filter_map(|(v, e)| e.map(|e| format!("V{v}={}", self.elements[e].0)))
                    .join(",");
                b.atom(format!("env{i}"), format!("{{{surface}}}"), ENV)
            })
            .collect();
        let positives = task.positives.len();
        let examples: Vec<AtomId> = (0..positives + task.negatives.len())
            .map(|k| {
                let surface = if k < positives { format!("+{k}") } else { format!("-{}", k - positives) };
                b.atom(format!("ex{k}"), surface, EXAMPLE)
            })
            .collect();
        let uses_functions = !task.functions.is_empty() && task.term_policy != TermPolicy::VariablesOnly;
        if uses_functions {
            for i in 0..bound {
                b.atom(format!("T{i}"), format!("T{i}"), SLOT);
            }
        }
        let width = self.max_relation_arity().max(self.max_function_inputs());
        let idx: Vec<AtomId> = (0..width).map(|i| b.atom(format!("I{i}"), format!("I{i}"), IDX)).collect();

        let idx_first = b.relation("idx_first", 1, Role::Fact);
        let idx_next = b.relation("idx_next", 2, Role::Fact);
        if let Some(&first) = idx.first() {
            b.include(idx_first, vec![first]);
        }
        for (i, j) in idx.iter().tuple_windows() {
            b.include(idx_next, vec![*i, *j]);
        }

        let sort_of = b.relation("sort_of", 2, Role::Fact);
        for ((_, sort), &el) in self.elements.iter().zip(&elements) {
            let s = task
                .sorts
                .iter()
                .position(|x| x == sort)
                .ok_or_else(|| invalid(format!("undeclared sort {sort}")))?;
            b.include(sort_of, vec![el, sorts[s]]);
        }
        let binding = b.relation("binding", 3, Role::Fact);
        for (mapping, &env) in self.envs.iter().zip(&envs) {
            for (v, e) in mapping.iter().enumerate() {
                if let Some(e) = e {
                    b.include(binding, vec![env, vars[v], elements[*e]]);
                }
            }
        }

        let domain = b.relation("domain", 2, Role::Fact);
        let mut fact_relations = vec![];
        for r in &task.relations {
            fact_relations.push(b.relation(&format!("rel_{}", r.name), 1 + r.arity(), Role::Fact));
        }
        for f in &task.functions {
            fact_relations.push(b.relation(&format!("fun_{}", f.name), 1 + f.arity(), Role::Fact));
        }

        let empty = self.empty_env().ok_or_else(|| invalid("the task has no examples"))?;
        let mut points = vec![];
        let mut samples = vec![];
        for (k, structure) in self.structures().enumerate() {
            let ex = examples[k];
            for &e in &self.domains[k] {
                b.include(domain, vec![ex, elements[e]]);
            }
            let symbols = task
                .relations
                .iter()
                .map(|r| (&r.name, &structure.relation_facts))
                .chain(task.functions.iter().map(|f| (&f.name, &structure.function_facts)));
            for ((name, facts), &rel) in symbols.zip(&fact_relations) {
                for tuple in facts.get(name).into_iter().flatten() {
                    let ids = self
                        .element_ids(tuple)
                        .ok_or_else(|| invalid(format!("unknown element in {name}({})", tuple.join(","))))?;
                    b.include(rel, iter::once(ex).chain(ids.into_iter().map(|e| elements[e])).collect());
                }
            }
            for &env in &self.applicable[k] {
                points.push(vec![ex, envs[env]]);
            }
            samples.push(Sample {
                root: vec![ex, envs[empty]],
                positive: k < positives,
            });
        }
        Ok((points, samples))
    }

    fn well_formed(&self, b: &mut ProblemBuilder, s: &Skeleton) -> Result<()> {
        let a = Atoms::of(b.universe());
        self.declare_structure(b, s, &a);
        self.quantifiers(b, s, &a)?;
        self.ancestry(b, s)?;
        self.atoms(b, s, &a)?;
        self.function_terms(b, s, &a)?;
        self.scoping(b, s, &a)
    }

    fn semantics<'a>(&'a self, b: &ProblemBuilder) -> Result<Box<dyn Semantics + 'a>> {
        let atoms = Atoms::of(b.universe());
        Ok(Box::new(FolSemantics {
            logic: self,
            terms: self.arg_terms(&atoms),
            atoms,
            atom_rel: b.relation_id("atom_rel")?,
            bound_var: b.relation_id("bound_var")?,
            qsort: b.relation_id("qsort")?,
        }))
    }

    fn decode_leaf(&self, encoding: &Encoding, model: &dyn Valuation, node: AtomId) -> Result<Formula> {
        let universe = encoding.problem.universe();
        let atom_rel = encoding.relation("atom_rel")?;
        let relation = model
            .tuples(atom_rel)
            .into_iter()
            .find(|t| t[0] == node)
            .ok_or_else(|| Error::Decode(format!("atom node {} has no relation", universe.label(node))))?;
        Ok(Formula::Atom {
            relation: universe.surface(relation[1]).to_string(),
            terms: self.walk_arguments(encoding, model, "arg", node)?,
        })
    }

    fn decode_binder(&self, encoding: &Encoding, model: &dyn Valuation, node: AtomId) -> Result<(String, String)> {
        let universe = encoding.problem.universe();
        let pick = |name: &str| -> Result<AtomId> {
            let rel = encoding.relation(name)?;
            model
                .tuples(rel)
                .into_iter()
                .find(|t| t[0] == node)
                .map(|t| t[1])
                .ok_or_else(|| Error::Decode(format!("quantifier {} has no {name}", universe.label(node))))
        };
        let var = pick("bound_var")?;
        let sort = pick("qsort")?;
        Ok((universe.surface(var).to_lowercase(), universe.surface(sort).to_string()))
    }

    fn separates(&self, formula: &Formula) -> bool {
        self.task.positives.iter().all(|s| formula.holds_on_structure(s))
            && !self.task.negatives.iter().any(|s| formula.holds_on_structure(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::sample::structure::{Constant, Symbol};

    fn task() -> FolTask {
        let structure = |names: &[&str], edges: &[(&str, &str)]| Structure {
            constants: names.iter().map(|n| Constant::new(*n, "Node")).collect(),
            relation_facts: [(
                "edge".to_string(),
                edges.iter().map(|(x, y)| vec![x.to_string(), y.to_string()]).collect(),
            )]
            .into(),
            function_facts: Default::default(),
        };
        FolTask::new(
            vec!["Node".into()],
            vec![Symbol::new("edge", &["Node", "Node"])],
            vec![],
            vec![structure(&["node0", "node1"], &[("node0", "node1")])],
            vec![structure(&["node0"], &[])],
            4,
        )
        .with_max_quantifiers(2)
    }

    #[test]
    fn environments_are_keyed_by_mapping() {
        let logic = FolLogic::new(task()).unwrap();
        // {none, node0, node1}^2 for the positive; the negative adds nothing
        assert_eq!(logic.envs.len(), 9);
        assert_eq!(logic.applicable[0].len(), 9);
        assert_eq!(logic.applicable[1].len(), 4);
        let empty = logic.empty_env().unwrap();
        let one = logic.extend(empty, 0, 1).unwrap();
        assert_eq!(logic.envs[one], vec![Some(1), None]);
        assert_eq!(logic.extend(one, 0, 1), Some(one));
    }

    #[test]
    fn examples_become_exact_facts() {
        let encoding = encode(&FolLogic::new(task()).unwrap(), 3).unwrap();
        let problem = &encoding.problem;
        let universe = problem.universe();
        let id = |label: &str| universe.id(label).unwrap();
        let edge = problem.relation(problem.relation_id("rel_edge").unwrap());
        assert!(edge.is_exact());
        assert_eq!(
            edge.lower.iter().cloned().collect::<Vec<_>>(),
            vec![vec![id("ex0"), id("el_node0"), id("el_node1")]]
        );
        let domain = problem.relation(problem.relation_id("domain").unwrap());
        assert!(!domain.lower.contains(&vec![id("ex1"), id("el_node1")]));
        assert_eq!(universe.surface(id("env0")), "{}");
    }

    #[test]
    fn only_variables_are_arguments_by_default() {
        let encoding = encode(&FolLogic::new(task()).unwrap(), 3).unwrap();
        let problem = &encoding.problem;
        let arg = problem.relation(problem.relation_id("arg").unwrap());
        assert!(arg.upper.iter().all(|t| problem.universe().sort(t[2]) == VAR));
        assert!(problem.universe().of_sort(SLOT).next().is_none());
    }

    #[test]
    fn function_slots_only_point_forward() {
        let mut fol = task().with_term_policy(TermPolicy::Any).with_excluded(["Exists"]);
        fol.functions.push(Symbol::new("succ", &["Node", "Node"]));
        for structure in fol.positives.iter_mut().chain(fol.negatives.iter_mut()) {
            let first = structure.constants[0].name.clone();
            let graph = structure.constants.iter().map(|c| vec![c.name.clone(), first.clone()]).collect();
            structure.function_facts.insert("succ".into(), graph);
        }
        let encoding = encode(&FolLogic::new(fol).unwrap(), 3).unwrap();
        let problem = &encoding.problem;
        let universe = problem.universe();
        assert_eq!(universe.of_sort(SLOT).count(), 3);

        let targ = problem.relation(problem.relation_id("targ").unwrap());
        assert!(!targ.upper.is_empty());
        for t in targ.upper.iter().filter(|t| universe.sort(t[2]) == SLOT) {
            assert!(t[2] > t[0], "{} points back at {}", universe.label(t[0]), universe.label(t[2]));
        }
        let arg = problem.relation(problem.relation_id("arg").unwrap());
        assert!(arg.upper.iter().any(|t| universe.sort(t[2]) == ELEMENT));
        assert!(arg.upper.iter().any(|t| universe.sort(t[2]) == SLOT));
        assert!(problem.relation_id("tval").is_some());
        assert!(encoding.skeleton.kind_atom("Exists").is_none());
        assert!(encoding.skeleton.kind_atom("Forall").is_some());
    }

    #[test]
    fn a_task_without_examples_is_rejected() {
        let mut fol = task();
        fol.positives.clear();
        fol.negatives.clear();
        let err = encode(&FolLogic::new(fol).unwrap(), 3).unwrap_err();
        assert!(err.to_string().contains("no examples"), "{err}");
    }
}
