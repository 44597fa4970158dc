//! FOL tasks as JSON.

use serde::Deserialize;

use crate::sample::{Constant, Facts, FolTask, Structure, Symbol, TermPolicy};

use super::ParseError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonTask {
    sorts: Vec<String>,
    relations: Vec<JsonSymbol>,
    #[serde(default)]
    functions: Vec<JsonSymbol>,
    positive_examples: Vec<JsonExample>,
    negative_examples: Vec<JsonExample>,
    #[serde(default = "default_max_nodes")]
    max_nodes: usize,
    #[serde(default)]
    max_quantifiers: Option<usize>,
    #[serde(default)]
    excluded: Vec<String>,
    #[serde(default)]
    term_policy: Option<JsonTermPolicy>,
    #[serde(default)]
    prenex: Option<bool>,
    /// SMT-LIB assertions appended to every encoding.
    #[serde(default)]
    custom_constraints: Option<String>,
}

fn default_max_nodes() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct JsonSymbol {
    name: String,
    signature: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonExample {
    constants: Vec<JsonConstant>,
    #[serde(default)]
    relation_facts: Facts,
    #[serde(default)]
    function_facts: Facts,
}

#[derive(Debug, Deserialize)]
struct JsonConstant {
    name: String,
    sort: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum JsonTermPolicy {
    Any,
    Uniform,
    VariablesOnly,
}

impl From<JsonTermPolicy> for TermPolicy {
    fn from(policy: JsonTermPolicy) -> Self {
        match policy {
            JsonTermPolicy::Any => TermPolicy::Any,
            JsonTermPolicy::Uniform => TermPolicy::Uniform,
            JsonTermPolicy::VariablesOnly => TermPolicy::VariablesOnly,
        }
    }
}

impl From<JsonSymbol> for Symbol {
    fn from(symbol: JsonSymbol) -> Self {
        Symbol {
            name: symbol.name,
            signature: symbol.signature,
        }
    }
}

impl From<JsonExample> for Structure {
    fn from(example: JsonExample) -> Self {
        Structure {
            constants: example
                .constants
                .into_iter()
                .map(|c| Constant::new(c.name, c.sort))
                .collect(),
            relation_facts: example.relation_facts,
            function_facts: example.function_facts,
        }
    }
}

pub fn parse(text: &str) -> Result<FolTask, ParseError> {
    let json: JsonTask = serde_json::from_str(text)?;
    let mut task = FolTask::new(
        json.sorts,
        json.relations.into_iter().map(Symbol::from).collect(),
        json.functions.into_iter().map(Symbol::from).collect(),
        json.positive_examples.into_iter().map(Structure::from).collect(),
        json.negative_examples.into_iter().map(Structure::from).collect(),
        json.max_nodes,
    )
    .with_excluded(json.excluded.iter().map(String::as_str));
    if let Some(q) = json.max_quantifiers {
        task = task.with_max_quantifiers(q);
    }
    if let Some(policy) = json.term_policy {
        task = task.with_term_policy(policy.into());
    }
    if let Some(prenex) = json.prenex {
        task.prenex = prenex;
    }
    if let Some(fragment) = json.custom_constraints {
        task = task.with_custom_constraints(fragment);
    }
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"{
        "sorts": ["Node"],
        "relations": [{"name": "edge", "signature": ["Node", "Node"]}],
        "functions": [],
        "positiveExamples": [
            {
                "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
                "relationFacts": {"edge": [["a", "b"], ["b", "a"]]}
            }
        ],
        "negativeExamples": [
            {"constants": [{"name": "c", "sort": "Node"}], "relationFacts": {"edge": []}}
        ],
        "maxNodes": 5
    }"#;

    #[test]
    fn parses_the_documented_schema() {
        let task = parse(GRAPH).unwrap();
        assert_eq!(task.sorts, vec!["Node"]);
        assert_eq!(task.relations, vec![Symbol::new("edge", &["Node", "Node"])]);
        assert_eq!(task.positives.len(), 1);
        assert_eq!(task.positives[0].relation_facts["edge"].len(), 2);
        assert_eq!(task.negatives[0].constants, vec![Constant::new("c", "Node")]);
        assert_eq!(task.max_nodes, 5);
        assert_eq!(task.term_policy, TermPolicy::VariablesOnly);
        task.validate().unwrap();
    }

    #[test]
    fn optional_fields_default() {
        let task = parse(
            r#"{"sorts": ["S"], "relations": [{"name": "p", "signature": ["S"]}],
                "positiveExamples": [], "negativeExamples": [], "termPolicy": "uniform"}"#,
        )
        .unwrap();
        assert_eq!(task.max_nodes, 10);
        assert!(task.functions.is_empty());
        assert_eq!(task.term_policy, TermPolicy::Uniform);
        assert_eq!(task.custom_constraints, None);
    }

    #[test]
    fn custom_constraints_are_carried_verbatim() {
        let task = parse(
            r#"{"sorts": ["S"], "relations": [{"name": "p", "signature": ["S"]}],
                "positiveExamples": [], "negativeExamples": [],
                "customConstraints": "(assert (not |kind!n0!Not|))"}"#,
        )
        .unwrap();
        assert_eq!(task.custom_constraints.as_deref(), Some("(assert (not |kind!n0!Not|))"));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(parse("{\"sorts\": 1}"), Err(ParseError::Json(_))));
    }
}
