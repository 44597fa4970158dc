//! Decoded formulas, their two textual notations and a reference evaluator.
//!
//! The evaluator implements exactly the semantics the encoder emits, so a
//! decoded solution can be checked against the (reduced) examples without a
//! solver in the loop.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;

use crate::sample::structure::Structure;
use crate::sample::trace::LassoTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Leaf,
    Unary,
    Binary,
    /// Quantifier: one body plus a bound variable and its sort.
    Binder,
}

/// Operator-kind metadata. `name` doubles as the exclusion key and as the
/// label of the kind atom in the encoded problem.
#[derive(Debug, PartialEq, Eq)]
pub struct Operator {
    pub name: &'static str,
    pub glyph: &'static str,
    pub aliases: &'static [&'static str],
    pub arity: Arity,
}

impl Operator {
    const fn new(
        name: &'static str,
        glyph: &'static str,
        aliases: &'static [&'static str],
        arity: Arity,
    ) -> Self {
        Operator {
            name,
            glyph,
            aliases,
            arity,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.arity == Arity::Leaf
    }

    fn matches(&self, token: &str) -> bool {
        self.name == token || (!self.glyph.is_empty() && self.glyph == token) || self.aliases.contains(&token)
    }
}

pub static LTL_OPERATORS: [Operator; 9] = [
    Operator::new("Literal", "", &[], Arity::Leaf),
    Operator::new("Neg", "!", &["Not", "~", "¬"], Arity::Unary),
    Operator::new("Next", "X", &[], Arity::Unary),
    Operator::new("Eventually", "F", &["Finally"], Arity::Unary),
    Operator::new("Globally", "G", &[], Arity::Unary),
    Operator::new("And", "&", &["&&", "∧"], Arity::Binary),
    Operator::new("Or", "|", &["||", "∨"], Arity::Binary),
    Operator::new("Imply", "->", &["Implies", "=>", "→"], Arity::Binary),
    Operator::new("Until", "U", &[], Arity::Binary),
];

pub static FOL_OPERATORS: [Operator; 7] = [
    Operator::new("Atom", "", &[], Arity::Leaf),
    Operator::new("Not", "¬", &["!", "~", "Neg"], Arity::Unary),
    Operator::new("And", "∧", &["&", "&&"], Arity::Binary),
    Operator::new("Or", "∨", &["|", "||"], Arity::Binary),
    Operator::new("Implies", "→", &["->", "=>", "Imply"], Arity::Binary),
    Operator::new("Forall", "∀", &["forall", "A"], Arity::Binder),
    Operator::new("Exists", "∃", &["exists", "E"], Arity::Binder),
];

/// Resolves a name, glyph or alias against an operator table.
pub fn lookup(table: &'static [Operator], token: &str) -> Option<&'static Operator> {
    let token = token.trim();
    table.iter().find(|op| op.matches(token))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Const(String),
    Func { name: String, args: Vec<Term> },
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) | Term::Const(name) => write!(f, "{name}"),
            Term::Func { name, args } => write!(f, "{name}({})", args.iter().join(",")),
        }
    }
}

impl Term {
    fn eval(&self, structure: &Structure, env: &BTreeMap<String, String>) -> Option<String> {
        match self {
            Term::Var(var) => env.get(var).cloned(),
            Term::Const(name) => structure
                .constants
                .iter()
                .any(|c| &c.name == name)
                .then(|| name.clone()),
            Term::Func { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(structure, env))
                    .collect::<Option<Vec<_>>>()?;
                structure
                    .function_facts
                    .get(name)?
                    .iter()
                    .find(|tuple| tuple.len() == values.len() + 1 && tuple[..values.len()] == values[..])
                    .and_then(|tuple| tuple.last().cloned())
            }
        }
    }
}

/// A decoded formula. Sub-formulas shared in the model stay shared here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    Literal(String),
    Atom {
        relation: String,
        terms: Vec<Term>,
    },
    Unary {
        op: &'static Operator,
        child: Rc<Formula>,
    },
    Binary {
        op: &'static Operator,
        left: Rc<Formula>,
        right: Rc<Formula>,
    },
    Quantified {
        op: &'static Operator,
        var: String,
        sort: String,
        body: Rc<Formula>,
    },
}

fn atom_string(relation: &str, terms: &[Term]) -> String {
    if terms.is_empty() {
        relation.to_string()
    } else {
        format!("{relation}({})", terms.iter().join(","))
    }
}

impl Formula {
    /// Parenthesised infix notation with operator glyphs.
    pub fn render(&self) -> String {
        match self {
            Formula::Literal(name) => name.clone(),
            Formula::Atom { relation, terms } => atom_string(relation, terms),
            Formula::Unary { op, child } => {
                if op.glyph.chars().all(char::is_alphabetic) {
                    format!("{} {}", op.glyph, child.render())
                } else {
                    format!("{}{}", op.glyph, child.render())
                }
            }
            Formula::Binary { op, left, right } => {
                format!("({} {} {})", left.render(), op.glyph, right.render())
            }
            Formula::Quantified {
                op,
                var,
                sort,
                body,
            } => format!("{}{var}:{sort}. {}", op.glyph, body.render()),
        }
    }

    /// Canonical `Op(child[,child])` notation used for comparisons.
    pub fn prefix(&self) -> String {
        match self {
            Formula::Literal(name) => name.clone(),
            Formula::Atom { relation, terms } => atom_string(relation, terms),
            Formula::Unary { op, child } => format!("{}({})", op.name, child.prefix()),
            Formula::Binary { op, left, right } => {
                format!("{}({},{})", op.name, left.prefix(), right.prefix())
            }
            Formula::Quantified {
                op,
                var,
                sort,
                body,
            } => format!("{}({var}:{sort},{})", op.name, body.prefix()),
        }
    }

    /// Number of operator (non-leaf) occurrences in the tree unfolding.
    pub fn operator_count(&self) -> usize {
        match self {
            Formula::Literal(_) | Formula::Atom { .. } => 0,
            Formula::Unary { child, .. } => 1 + child.operator_count(),
            Formula::Binary { left, right, .. } => 1 + left.operator_count() + right.operator_count(),
            Formula::Quantified { body, .. } => 1 + body.operator_count(),
        }
    }

    pub fn contains_operator(&self, name: &str) -> bool {
        match self {
            Formula::Literal(_) | Formula::Atom { .. } => false,
            Formula::Unary { op, child } => op.name == name || child.contains_operator(name),
            Formula::Binary { op, left, right } => {
                op.name == name || left.contains_operator(name) || right.contains_operator(name)
            }
            Formula::Quantified { op, body, .. } => op.name == name || body.contains_operator(name),
        }
    }

    /// Truth at index 0 of the trace.
    pub fn holds_on_trace(&self, trace: &LassoTrace, literals: &[String]) -> bool {
        !trace.is_empty() && self.eval_trace(trace, literals, 0)
    }

    fn eval_trace(&self, trace: &LassoTrace, literals: &[String], i: usize) -> bool {
        match self {
            Formula::Literal(name) => literals
                .iter()
                .position(|lit| lit == name)
                .is_some_and(|idx| trace.state(i).get(idx)),
            Formula::Unary { op, child } => match op.name {
                "Neg" | "Not" => !child.eval_trace(trace, literals, i),
                "Next" => trace
                    .successor(i)
                    .is_some_and(|j| child.eval_trace(trace, literals, j)),
                "Eventually" => trace
                    .forward(i)
                    .into_iter()
                    .any(|j| child.eval_trace(trace, literals, j)),
                "Globally" => trace
                    .forward(i)
                    .into_iter()
                    .all(|j| child.eval_trace(trace, literals, j)),
                _ => false,
            },
            Formula::Binary { op, left, right } => match op.name {
                "And" => left.eval_trace(trace, literals, i) && right.eval_trace(trace, literals, i),
                "Or" => left.eval_trace(trace, literals, i) || right.eval_trace(trace, literals, i),
                "Imply" | "Implies" => {
                    !left.eval_trace(trace, literals, i) || right.eval_trace(trace, literals, i)
                }
                // left is only required strictly between i and j
                "Until" => trace.forward(i).into_iter().any(|j| {
                    right.eval_trace(trace, literals, j)
                        && trace
                            .path(i, j)
                            .into_iter()
                            .skip(1)
                            .all(|k| left.eval_trace(trace, literals, k))
                }),
                _ => false,
            },
            Formula::Atom { .. } | Formula::Quantified { .. } => false,
        }
    }

    /// Truth under the empty environment.
    pub fn holds_on_structure(&self, structure: &Structure) -> bool {
        self.eval_structure(structure, &BTreeMap::new())
    }

    fn eval_structure(&self, structure: &Structure, env: &BTreeMap<String, String>) -> bool {
        match self {
            Formula::Atom { relation, terms } => {
                let Some(values) = terms
                    .iter()
                    .map(|t| t.eval(structure, env))
                    .collect::<Option<Vec<_>>>()
                else {
                    return false;
                };
                structure
                    .relation_facts
                    .get(relation)
                    .is_some_and(|facts| facts.iter().any(|tuple| *tuple == values))
            }
            Formula::Unary { child, .. } => !child.eval_structure(structure, env),
            Formula::Binary { op, left, right } => {
                let l = left.eval_structure(structure, env);
                let r = right.eval_structure(structure, env);
                match op.name {
                    "And" => l && r,
                    "Or" => l || r,
                    _ => !l || r,
                }
            }
            Formula::Quantified {
                op,
                var,
                sort,
                body,
            } => {
                let mut witnesses = structure.constants.iter().filter(|c| &c.sort == sort).map(|c| {
                    let mut extended = env.clone();
                    extended.insert(var.clone(), c.name.clone());
                    body.eval_structure(structure, &extended)
                });
                if op.name == "Forall" {
                    witnesses.all(|b| b)
                } else {
                    witnesses.any(|b| b)
                }
            }
            Formula::Literal(_) => false,
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
