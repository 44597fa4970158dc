//! z3 backend. Each free tuple becomes a boolean constant named after
//! [`Problem::var_name`]; constraints are translated structurally and
//! cardinalities go through integer sums.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Once;

use log::{debug, info, trace};
use z3::ast::{Ast, Bool, Int};
use z3::{Config, Context, Model, Optimize, SatResult, Solver};

use super::{Instance, ModelFinder, SolverOptions, Valuation};
use crate::error::{Error, Result};
use crate::problem::{AtomId, Constraint, Problem, RelId, Role, Tuple};

static WARM_UP: Once = Once::new();

pub struct Z3Solver {
    context: Context,
    options: SolverOptions,
}

impl Z3Solver {
    /// Creates the backend. The first call in a process also runs a trivial
    /// query so that z3's one-time start-up cost is not charged to the first
    /// real bound; later calls skip it.
    pub fn initialize(options: &SolverOptions) -> Self {
        WARM_UP.call_once(|| {
            let context = Context::new(&Config::new());
            let solver = Solver::new(&context);
            solver.assert(&Bool::from_bool(&context, true));
            debug!("z3 warm-up: {:?}", solver.check());
        });
        let mut config = Config::new();
        config.set_model_generation(true);
        if let Some(timeout) = options.timeout {
            config.set_timeout_msec(timeout.as_millis() as u64);
        }
        Z3Solver {
            context: Context::new(&config),
            options: *options,
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }
}

impl ModelFinder for Z3Solver {
    type Instance<'a> = Z3Instance<'a>;

    fn solve(&self, problem: Rc<Problem>) -> Result<Option<Z3Instance<'_>>> {
        let ctx = &self.context;
        let backend = match problem.objective() {
            Some(_) if self.options.minimize => Backend::Optimizing(Optimize::new(ctx)),
            _ => Backend::Plain(Solver::new(ctx)),
        };

        let mut vars = BTreeMap::new();
        let mut primary = vec![];
        for (id, relation) in problem.relations().iter().enumerate() {
            for tuple in relation.free_tuples() {
                let var = Bool::new_const(ctx, problem.var_name(id, tuple));
                if relation.role == Role::Primary {
                    primary.push(var.clone());
                }
                vars.insert((id, tuple.clone()), var);
            }
        }
        info!(
            "z3: {} free variables ({} primary), {} constraints",
            vars.len(),
            primary.len(),
            problem.constraints().len()
        );

        let translator = Translator { ctx, vars: &vars };
        for constraint in problem.constraints() {
            backend.assert(&translator.bool(constraint));
        }
        if !problem.fragments().is_empty() {
            for assertion in parse_fragments(ctx, &problem)? {
                backend.assert(&assertion);
            }
        }
        if let (Backend::Optimizing(optimize), Some(objective)) = (&backend, problem.objective()) {
            let terms: Vec<Int> = objective.terms.iter().map(|t| translator.indicator(t)).collect();
            optimize.minimize(&translator.sum(&terms));
        }

        let instance = Z3Instance {
            problem,
            backend,
            vars,
            primary,
            values: HashMap::new(),
        };
        instance.check()
    }
}

enum Backend<'ctx> {
    Plain(Solver<'ctx>),
    Optimizing(Optimize<'ctx>),
}

impl<'ctx> Backend<'ctx> {
    fn assert(&self, b: &Bool<'ctx>) {
        match self {
            Backend::Plain(s) => s.assert(b),
            Backend::Optimizing(o) => o.assert(b),
        }
    }

    fn check(&self) -> SatResult {
        match self {
            Backend::Plain(s) => s.check(),
            Backend::Optimizing(o) => o.check(&[]),
        }
    }

    fn model(&self) -> Option<Model<'ctx>> {
        match self {
            Backend::Plain(s) => s.get_model(),
            Backend::Optimizing(o) => o.get_model(),
        }
    }

    fn reason_unknown(&self) -> Option<String> {
        match self {
            Backend::Plain(s) => s.get_reason_unknown(),
            Backend::Optimizing(o) => o.get_reason_unknown(),
        }
    }
}

struct Translator<'a, 'ctx> {
    ctx: &'ctx Context,
    vars: &'a BTreeMap<(RelId, Tuple), Bool<'ctx>>,
}

impl<'ctx> Translator<'_, 'ctx> {
    fn bool(&self, c: &Constraint) -> Bool<'ctx> {
        let all = |cs: &[Constraint]| cs.iter().map(|c| self.bool(c)).collect::<Vec<_>>();
        match c {
            Constraint::True => Bool::from_bool(self.ctx, true),
            Constraint::False => Bool::from_bool(self.ctx, false),
            Constraint::Member(rel, tuple) => match self.vars.get(&(*rel, tuple.clone())) {
                Some(var) => var.clone(),
                None => Bool::from_bool(self.ctx, false),
            },
            Constraint::Not(c) => self.bool(c).not(),
            Constraint::And(cs) => {
                let parts = all(cs);
                Bool::and(self.ctx, &parts.iter().collect::<Vec<_>>())
            }
            Constraint::Or(cs) => {
                let parts = all(cs);
                Bool::or(self.ctx, &parts.iter().collect::<Vec<_>>())
            }
            Constraint::Implies(a, b) => self.bool(a).implies(&self.bool(b)),
            Constraint::Iff(a, b) => self.bool(a).iff(&self.bool(b)),
            Constraint::AtMost(1, cs) => {
                let parts = all(cs);
                let pairs = (0..parts.len())
                    .flat_map(|i| (i + 1..parts.len()).map(move |j| (i, j)))
                    .map(|(i, j)| Bool::and(self.ctx, &[&parts[i], &parts[j]]).not())
                    .collect::<Vec<_>>();
                Bool::and(self.ctx, &pairs.iter().collect::<Vec<_>>())
            }
            Constraint::AtMost(k, cs) => {
                let terms: Vec<Int> = cs.iter().map(|c| self.indicator(c)).collect();
                self.sum(&terms).le(&Int::from_u64(self.ctx, *k as u64))
            }
            Constraint::Exactly(k, cs) => {
                let terms: Vec<Int> = cs.iter().map(|c| self.indicator(c)).collect();
                self.sum(&terms)._eq(&Int::from_u64(self.ctx, *k as u64))
            }
        }
    }

    /// 1 when `c` holds, 0 otherwise.
    fn indicator(&self, c: &Constraint) -> Int<'ctx> {
        self.bool(c)
            .ite(&Int::from_u64(self.ctx, 1), &Int::from_u64(self.ctx, 0))
    }

    fn sum(&self, terms: &[Int<'ctx>]) -> Int<'ctx> {
        if terms.is_empty() {
            Int::from_u64(self.ctx, 0)
        } else {
            Int::add(self.ctx, &terms.iter().collect::<Vec<_>>())
        }
    }
}

/// Parses the raw fragments against declarations of every tuple in every
/// upper bound. Tuples fixed by the bounds are pinned to their value so the
/// fragment may mention facts as well as choices.
fn parse_fragments<'ctx>(ctx: &'ctx Context, problem: &Problem) -> Result<Vec<Bool<'ctx>>> {
    let mut script = String::new();
    for (id, relation) in problem.relations().iter().enumerate() {
        for tuple in &relation.upper {
            let name = problem.var_name(id, tuple);
            let _ = writeln!(script, "(declare-const |{name}| Bool)");
            if relation.lower.contains(tuple) {
                let _ = writeln!(script, "(assert |{name}|)");
            }
        }
    }
    for fragment in problem.fragments() {
        script.push_str(fragment);
        script.push('\n');
    }
    trace!("z3 fragment script:\n{script}");
    let scratch = Solver::new(ctx);
    scratch.from_string(script);
    // `get_assertions` ties its result to the solver borrow; rebind each AST
    // to `ctx` (which owns it) so it can outlive `scratch`.
    let assertions: Vec<Bool<'ctx>> = scratch
        .get_assertions()
        .iter()
        .map(|a| unsafe { Bool::wrap(ctx, a.get_z3_ast()) })
        .collect();
    if assertions.is_empty() && problem.fragments().iter().any(|f| f.contains("assert")) {
        return Err(Error::Solver("the custom constraints could not be parsed".into()));
    }
    Ok(assertions)
}

pub struct Z3Instance<'ctx> {
    problem: Rc<Problem>,
    backend: Backend<'ctx>,
    /// Ordered by relation id, then tuple, so blocking clauses are built
    /// the same way on every run.
    vars: BTreeMap<(RelId, Tuple), Bool<'ctx>>,
    primary: Vec<Bool<'ctx>>,
    values: HashMap<(RelId, Tuple), bool>,
}

impl<'ctx> Z3Instance<'ctx> {
    fn check(mut self) -> Result<Option<Self>> {
        match self.backend.check() {
            SatResult::Unsat => Ok(None),
            SatResult::Unknown => {
                let reason = self.backend.reason_unknown().unwrap_or_default();
                if reason.contains("timeout") || reason.contains("canceled") {
                    Err(Error::Timeout)
                } else {
                    Err(Error::Solver(format!("z3 returned unknown: {reason}")))
                }
            }
            SatResult::Sat => {
                let model = self
                    .backend
                    .model()
                    .ok_or_else(|| Error::Solver("z3 reported sat without a model".into()))?;
                let mut values = HashMap::with_capacity(self.vars.len());
                for (key, var) in &self.vars {
                    let value = model
                        .eval(var, true)
                        .and_then(|v| v.as_bool())
                        .ok_or_else(|| {
                            Error::Solver(format!("no value for {}", self.problem.var_name(key.0, &key.1)))
                        })?;
                    values.insert(key.clone(), value);
                }
                self.values = values;
                Ok(Some(self))
            }
        }
    }
}

impl Valuation for Z3Instance<'_> {
    fn problem(&self) -> &Problem {
        &self.problem
    }

    fn contains(&self, rel: RelId, tuple: &[AtomId]) -> bool {
        let relation = self.problem.relation(rel);
        if relation.lower.contains(tuple) {
            return true;
        }
        self.values.get(&(rel, tuple.to_vec())).copied().unwrap_or(false)
    }
}

impl Instance for Z3Instance<'_> {
    fn next(self) -> Result<Option<Self>> {
        if self.primary.is_empty() {
            return Ok(None);
        }
        let ctx = self.primary[0].get_ctx();
        let differs = self
            .vars
            .iter()
            .filter(|((rel, _), _)| self.problem.relation(*rel).role == Role::Primary)
            .map(|(key, var)| {
                if self.values.get(key).copied().unwrap_or(false) {
                    var.not()
                } else {
                    var.clone()
                }
            })
            .collect::<Vec<_>>();
        self.backend
            .assert(&Bool::or(ctx, &differs.iter().collect::<Vec<_>>()));
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ProblemBuilder;

    /// Three choices, exactly one or two of them set depending on `k`.
    fn choose(k: usize, minimize: bool) -> (Rc<Problem>, RelId) {
        let mut b = ProblemBuilder::new();
        let atoms: Vec<_> = (0..3).map(|i| b.atom(format!("a{i}"), format!("A{i}"), "A")).collect();
        let pick = b.relation("pick", 1, Role::Primary);
        for a in &atoms {
            b.allow(pick, vec![*a]);
        }
        let terms: Vec<_> = atoms.iter().map(|a| b.member(pick, &[*a])).collect();
        b.assert(Constraint::or(terms.clone()));
        b.assert(Constraint::at_most(k, terms.clone()));
        if minimize {
            b.minimize(terms);
        }
        (Rc::new(b.build().unwrap()), pick)
    }

    #[test]
    fn enumerates_every_model_once() {
        let solver = Z3Solver::initialize(&SolverOptions::default());
        let (problem, pick) = choose(1, false);
        let mut seen = vec![];
        let mut next = solver.solve(problem).unwrap();
        while let Some(instance) = next {
            seen.push(instance.tuples(pick));
            next = instance.next().unwrap();
        }
        seen.sort();
        assert_eq!(seen, vec![vec![vec![0]], vec![vec![1]], vec![vec![2]]]);
    }

    #[test]
    fn enumeration_order_is_repeatable() {
        let run = || {
            let solver = Z3Solver::initialize(&SolverOptions::default());
            let (problem, pick) = choose(2, false);
            let mut order = vec![];
            let mut next = solver.solve(problem).unwrap();
            while let Some(instance) = next {
                order.push(instance.tuples(pick));
                next = instance.next().unwrap();
            }
            order
        };
        let first = run();
        assert_eq!(first.len(), 6);
        assert_eq!(first, run());
    }

    #[test]
    fn minimisation_prefers_fewer_members() {
        let solver = Z3Solver::initialize(&SolverOptions::default());
        let (problem, pick) = choose(2, true);
        let instance = solver.solve(problem).unwrap().unwrap();
        assert_eq!(instance.tuples(pick).len(), 1);
        assert!(instance.dump().starts_with("pick = {(a"));
    }

    #[test]
    fn fragments_constrain_the_choice() {
        let mut b = ProblemBuilder::new();
        let a = b.atom("a", "a", "A");
        let c = b.atom("c", "c", "A");
        let pick = b.relation("pick", 1, Role::Primary);
        b.allow(pick, vec![a]);
        b.allow(pick, vec![c]);
        b.assert(Constraint::exactly(1, [b.member(pick, &[a]), b.member(pick, &[c])]));
        b.raw("(assert (not |pick!a|))");
        let solver = Z3Solver::initialize(&SolverOptions::default());
        let instance = solver.solve(Rc::new(b.build().unwrap())).unwrap().unwrap();
        assert!(instance.contains(pick, &[c]));
        assert!(instance.next().unwrap().is_none());
    }

    #[test]
    fn unsatisfiable_problems_have_no_instance() {
        let mut b = ProblemBuilder::new();
        let a = b.atom("a", "a", "A");
        let pick = b.relation("pick", 1, Role::Primary);
        b.allow(pick, vec![a]);
        let member = b.member(pick, &[a]);
        b.assert(member.clone());
        b.assert(Constraint::not(member));
        let solver = Z3Solver::initialize(&SolverOptions::default());
        assert!(solver.solve(Rc::new(b.build().unwrap())).unwrap().is_none());
    }
}
