//! FOL tasks as S-expressions:
//!
//! ```text
//! (sort Node)
//! (relation edge Node Node)
//! (function next Node Node)
//! (model + ((a Node) (b Node)) (edge a b) (= (next a) b))
//! (model - ((c Node)))
//! ```
//!
//! `;` starts a comment that runs to the end of the line.

use log::warn;

use crate::sample::{Constant, FolTask, Structure, Symbol};

use super::{syntax, ParseError};

pub const DEFAULT_MAX_NODES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>, usize),
}

impl SExpr {
    fn atom(&self) -> Option<&str> {
        match self {
            SExpr::Atom(a) => Some(a),
            SExpr::List(..) => None,
        }
    }
}

fn tokenize(input: &str) -> Vec<(usize, String)> {
    let mut tokens = vec![];
    for (index, line) in input.lines().enumerate() {
        let line = line.split(';').next().unwrap_or_default();
        let mut atom = String::new();
        for c in line.chars() {
            if c == '(' || c == ')' || c.is_whitespace() {
                if !atom.is_empty() {
                    tokens.push((index + 1, std::mem::take(&mut atom)));
                }
                if !c.is_whitespace() {
                    tokens.push((index + 1, c.to_string()));
                }
            } else {
                atom.push(c);
            }
        }
        if !atom.is_empty() {
            tokens.push((index + 1, atom));
        }
    }
    tokens
}

fn read(tokens: &[(usize, String)]) -> Result<Vec<SExpr>, ParseError> {
    // stack of open lists with the line they started on
    let mut stack: Vec<(usize, Vec<SExpr>)> = vec![(0, vec![])];
    for (line, token) in tokens {
        match token.as_str() {
            "(" => stack.push((*line, vec![])),
            ")" => {
                if stack.len() == 1 {
                    return Err(syntax(*line, "unexpected )"));
                }
                if let Some((start, items)) = stack.pop() {
                    if let Some((_, parent)) = stack.last_mut() {
                        parent.push(SExpr::List(items, start));
                    }
                }
            }
            atom => {
                if let Some((_, current)) = stack.last_mut() {
                    current.push(SExpr::Atom(atom.to_string()));
                }
            }
        }
    }
    match stack.pop() {
        Some((_, top)) if stack.is_empty() => Ok(top),
        Some((line, _)) => Err(syntax(line, "unclosed (")),
        None => Ok(vec![]),
    }
}

fn atoms(items: &[SExpr], line: usize) -> Result<Vec<String>, ParseError> {
    items
        .iter()
        .map(|item| {
            item.atom()
                .map(str::to_string)
                .ok_or_else(|| syntax(line, "expected a name, found a list"))
        })
        .collect()
}

fn model(items: &[SExpr], line: usize) -> Result<Structure, ParseError> {
    let mut structure = Structure::default();
    for item in items {
        let SExpr::List(parts, line) = item else {
            return Err(syntax(line, "model contents must be lists"));
        };
        let line = *line;
        let is_constant_list = !parts.is_empty()
            && parts
                .iter()
                .all(|p| matches!(p, SExpr::List(inner, _) if inner.len() == 2));
        if is_constant_list {
            for part in parts {
                if let SExpr::List(pair, _) = part {
                    let names = atoms(pair, line)?;
                    structure.constants.push(Constant::new(names[0].clone(), names[1].clone()));
                }
            }
            continue;
        }
        match parts.split_first() {
            Some((SExpr::Atom(head), rest)) if head == "=" => {
                let [SExpr::List(call, _), SExpr::Atom(result)] = rest else {
                    return Err(syntax(line, "expected (= (f args…) result)"));
                };
                let mut tuple = atoms(call, line)?;
                if tuple.is_empty() {
                    return Err(syntax(line, "empty function application"));
                }
                let name = tuple.remove(0);
                tuple.push(result.clone());
                structure.function_facts.entry(name).or_default().push(tuple);
            }
            Some((SExpr::Atom(relation), rest)) => {
                let tuple = atoms(rest, line)?;
                structure.relation_facts.entry(relation.clone()).or_default().push(tuple);
            }
            _ => return Err(syntax(line, "expected a constant list or a fact")),
        }
    }
    Ok(structure)
}

pub fn parse(text: &str) -> Result<FolTask, ParseError> {
    let mut sorts = vec![];
    let mut relations = vec![];
    let mut functions = vec![];
    let mut positives = vec![];
    let mut negatives = vec![];
    for form in read(&tokenize(text))? {
        let SExpr::List(items, line) = form else {
            return Err(syntax(0, "top-level atoms are not allowed"));
        };
        let Some((head, rest)) = items.split_first() else {
            continue;
        };
        match head.atom() {
            Some("sort") => sorts.extend(atoms(rest, line)?),
            Some(kind @ ("relation" | "function")) => {
                let mut names = atoms(rest, line)?;
                if names.is_empty() {
                    return Err(syntax(line, format!("{kind} needs a name")));
                }
                let name = names.remove(0);
                let symbol = Symbol { name, signature: names };
                if kind == "relation" {
                    relations.push(symbol);
                } else {
                    functions.push(symbol);
                }
            }
            Some("model") => {
                let (polarity, contents) = rest
                    .split_first()
                    .ok_or_else(|| syntax(line, "model needs a polarity"))?;
                let structure = model(contents, line)?;
                match polarity.atom() {
                    Some("+") => positives.push(structure),
                    Some("-") => negatives.push(structure),
                    _ => return Err(syntax(line, "model polarity must be + or -")),
                }
            }
            other => warn!("line {line}: ignoring unknown form {other:?}"),
        }
    }
    Ok(FolTask::new(sorts, relations, functions, positives, negatives, DEFAULT_MAX_NODES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_models_and_functions() {
        let task = parse(
            "; a two-node graph\n\
             (sort Node)\n\
             (relation edge Node Node)\n\
             (function next Node Node)\n\
             (model +\n  ((a Node) (b Node))\n  (edge a b)\n  (edge b a)\n  (= (next a) b))\n\
             (model - ((c Node)))\n",
        )
        .unwrap();
        assert_eq!(task.sorts, vec!["Node"]);
        assert_eq!(task.functions, vec![Symbol::new("next", &["Node", "Node"])]);
        assert_eq!(task.max_nodes, DEFAULT_MAX_NODES);
        let positive = &task.positives[0];
        assert_eq!(positive.constants.len(), 2);
        assert_eq!(positive.relation_facts["edge"], vec![vec!["a", "b"], vec!["b", "a"]]);
        assert_eq!(positive.function_facts["next"], vec![vec!["a", "b"]]);
        assert_eq!(task.negatives[0].sort_of("c"), Some("Node"));
        task.validate().unwrap();
    }

    #[test]
    fn unbalanced_parentheses_are_errors() {
        assert!(matches!(parse("(sort Node"), Err(ParseError::Syntax { line: 1, .. })));
        assert!(matches!(parse("(sort Node))"), Err(ParseError::Syntax { .. })));
        assert!(parse("(model * ((a Node)))").is_err());
    }
}
