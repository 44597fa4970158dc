//! Finite relational structures and FOL learning tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;

use crate::error::{invalid, Result};
use crate::formula::{lookup, FOL_OPERATORS};

/// A relation or function symbol. For functions the signature lists the
/// argument sorts followed by the result sort.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub name: String,
    pub signature: Vec<String>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, signature: &[&str]) -> Self {
        Symbol {
            name: name.into(),
            signature: signature.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.signature.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant {
    pub name: String,
    pub sort: String,
}

impl Constant {
    pub fn new(name: impl Into<String>, sort: impl Into<String>) -> Self {
        Constant {
            name: name.into(),
            sort: sort.into(),
        }
    }
}

pub type Facts = BTreeMap<String, Vec<Vec<String>>>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Structure {
    pub constants: Vec<Constant>,
    /// relation name -> tuples of constant names
    pub relation_facts: Facts,
    /// function name -> graph tuples (arguments then result)
    pub function_facts: Facts,
}

impl Structure {
    pub fn sort_of(&self, constant: &str) -> Option<&str> {
        self.constants
            .iter()
            .find(|c| c.name == constant)
            .map(|c| c.sort.as_str())
    }

    /// Number of constants per sort.
    pub fn sort_counts(&self) -> BTreeMap<&str, usize> {
        self.constants.iter().map(|c| c.sort.as_str()).counts().into_iter().collect()
    }
}

/// Restricts which terms may appear as atom arguments. The default only
/// admits variables, so every atom talks about quantified elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TermPolicy {
    Any,
    /// Every atom uses only variables or only non-variable terms.
    Uniform,
    #[default]
    VariablesOnly,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolTask {
    pub sorts: Vec<String>,
    pub relations: Vec<Symbol>,
    pub functions: Vec<Symbol>,
    pub positives: Vec<Structure>,
    pub negatives: Vec<Structure>,
    pub max_nodes: usize,
    /// Cap on quantifier nodes; also the number of variables.
    pub max_quantifiers: usize,
    pub excluded: BTreeSet<String>,
    pub term_policy: TermPolicy,
    /// Quantifiers may only sit below other quantifiers.
    pub prenex: bool,
    pub custom_constraints: Option<String>,
}

impl FolTask {
    pub fn new(
        sorts: Vec<String>,
        relations: Vec<Symbol>,
        functions: Vec<Symbol>,
        positives: Vec<Structure>,
        negatives: Vec<Structure>,
        max_nodes: usize,
    ) -> Self {
        FolTask {
            sorts,
            relations,
            functions,
            positives,
            negatives,
            max_nodes,
            max_quantifiers: 3,
            excluded: BTreeSet::new(),
            term_policy: TermPolicy::default(),
            prenex: true,
            custom_constraints: None,
        }
    }

    pub fn with_excluded<'a>(mut self, operators: impl IntoIterator<Item = &'a str>) -> Self {
        self.excluded.extend(operators.into_iter().map(str::to_string));
        self
    }

    pub fn with_max_quantifiers(mut self, max_quantifiers: usize) -> Self {
        self.max_quantifiers = max_quantifiers;
        self
    }

    pub fn with_term_policy(mut self, policy: TermPolicy) -> Self {
        self.term_policy = policy;
        self
    }

    pub fn with_custom_constraints(mut self, fragment: impl Into<String>) -> Self {
        self.custom_constraints = Some(fragment.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sorts.is_empty() {
            return Err(invalid("the task declares no sorts"));
        }
        if self.relations.is_empty() {
            return Err(invalid("the task declares no relations"));
        }
        if self.max_nodes == 0 {
            return Err(invalid("the node bound must be positive"));
        }
        if self.positives.is_empty() && self.negatives.is_empty() {
            return Err(invalid("the task has no examples"));
        }
        for name in &self.excluded {
            match lookup(&FOL_OPERATORS, name) {
                Some(op) if op.name == name && !op.is_leaf() => {}
                _ => return Err(invalid(format!("unknown FOL operator '{name}'"))),
            }
        }
        let sorts: BTreeSet<&str> = self.sorts.iter().map(String::as_str).collect();
        let mut symbols = HashMap::new();
        for (kind, min_arity, symbol) in self
            .relations
            .iter()
            .map(|s| ("relation", 1, s))
            .chain(self.functions.iter().map(|s| ("function", 2, s)))
        {
            if symbol.arity() < min_arity {
                return Err(invalid(format!(
                    "{kind} '{}' has arity {} (minimum {min_arity})",
                    symbol.name,
                    symbol.arity()
                )));
            }
            if let Some(sort) = symbol.signature.iter().find(|s| !sorts.contains(s.as_str())) {
                return Err(invalid(format!(
                    "{kind} '{}' mentions undeclared sort '{sort}'",
                    symbol.name
                )));
            }
            if symbols.insert(symbol.name.as_str(), symbol).is_some() {
                return Err(invalid(format!("symbol '{}' declared twice", symbol.name)));
            }
        }
        for structure in self.positives.iter().chain(&self.negatives) {
            self.validate_structure(structure, &sorts)?;
        }
        Ok(())
    }

    fn validate_structure(&self, structure: &Structure, sorts: &BTreeSet<&str>) -> Result<()> {
        if let Some(c) = structure.constants.iter().find(|c| !sorts.contains(c.sort.as_str())) {
            return Err(invalid(format!(
                "constant '{}' has undeclared sort '{}'",
                c.name, c.sort
            )));
        }
        if structure.constants.iter().map(|c| &c.name).unique().count() != structure.constants.len() {
            return Err(invalid("constant names must be distinct within a structure"));
        }
        for (facts, table, kind) in [
            (&structure.relation_facts, &self.relations, "relation"),
            (&structure.function_facts, &self.functions, "function"),
        ] {
            for (name, tuples) in facts {
                let symbol = table
                    .iter()
                    .find(|s| &s.name == name)
                    .ok_or_else(|| invalid(format!("facts for unknown {kind} '{name}'")))?;
                for tuple in tuples {
                    check_tuple(structure, symbol, tuple)?;
                }
                if kind == "function" {
                    let inputs = tuples.iter().map(|t| &t[..t.len() - 1]);
                    if inputs.clone().unique().count() != tuples.iter().unique().count() {
                        return Err(invalid(format!(
                            "function '{name}' maps some argument tuple to two results"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_tuple(structure: &Structure, symbol: &Symbol, tuple: &[String]) -> Result<()> {
    if tuple.len() != symbol.arity() {
        return Err(invalid(format!(
            "tuple ({}) does not match the arity {} of '{}'",
            tuple.join(","),
            symbol.arity(),
            symbol.name
        )));
    }
    for (element, expected) in tuple.iter().zip(&symbol.signature) {
        match structure.sort_of(element) {
            Some(sort) if sort == expected => {}
            Some(sort) => {
                return Err(invalid(format!(
                    "'{element}' has sort {sort} but '{}' expects {expected}",
                    symbol.name
                )))
            }
            None => return Err(invalid(format!("unknown constant '{element}' in '{}' facts", symbol.name))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> Structure {
        Structure {
            constants: vec![Constant::new("a", "Node"), Constant::new("b", "Node")],
            relation_facts: [(
                "edge".to_string(),
                edges.iter().map(|(x, y)| vec![x.to_string(), y.to_string()]).collect(),
            )]
            .into(),
            function_facts: Facts::new(),
        }
    }

    fn task(positive: Structure) -> FolTask {
        FolTask::new(
            vec!["Node".into()],
            vec![Symbol::new("edge", &["Node", "Node"])],
            vec![],
            vec![positive],
            vec![],
            5,
        )
    }

    #[test]
    fn accepts_a_well_formed_task() {
        task(graph(&[("a", "b")])).validate().unwrap();
    }

    #[test]
    fn rejects_arity_and_constant_errors() {
        assert!(task(graph(&[("a", "c")])).validate().is_err());
        let mut bad = graph(&[]);
        bad.relation_facts.insert("edge".into(), vec![vec!["a".into()]]);
        assert!(task(bad).validate().is_err());

        let mut nullary = task(graph(&[]));
        nullary.relations.push(Symbol::new("p", &[]));
        assert!(nullary.validate().is_err());
    }

    #[test]
    fn rejects_functions_that_are_not_functional() {
        let mut t = task(graph(&[]));
        t.functions.push(Symbol::new("f", &["Node", "Node"]));
        t.positives[0]
            .function_facts
            .insert("f".into(), vec![vec!["a".into(), "a".into()], vec!["a".into(), "b".into()]]);
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_a_task_without_examples() {
        let mut t = task(graph(&[]));
        t.positives.clear();
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("no examples"), "{err}");
    }
}
