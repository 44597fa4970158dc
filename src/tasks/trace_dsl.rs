//! The trace DSL. Sections are separated by `---` lines:
//!
//! ```text
//! 1,0;0,1::1      positives, one lasso per line
//! ---
//! 0,0::0          negatives
//! ---
//! U,X             excluded operators (names or glyphs)
//! ---
//! 5               node bound, optionally bracketed
//! ---
//! G(x1)           expected formulas, one per line
//! ---
//! ...             SMT-LIB fragment, passed through verbatim
//! ```
//!
//! Only the first two sections are required. Without `::k` a trace is finite.

use crate::formula::{lookup, LTL_OPERATORS};
use crate::sample::{LassoTrace, LtlTask, State};

use super::{syntax, ParseError};

pub const DEFAULT_MAX_NODES: usize = 10;

type Section<'a> = Vec<(usize, &'a str)>;

fn sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = vec![vec![]];
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line == "---" {
            sections.push(vec![]);
        } else if !line.is_empty() {
            if let Some(section) = sections.last_mut() {
                section.push((index + 1, line));
            }
        }
    }
    sections
}

pub fn parse_state(line: usize, text: &str) -> Result<State, ParseError> {
    let values = text
        .split(',')
        .map(|v| match v.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(syntax(line, format!("state value '{other}' is not 0 or 1"))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(State::new(values))
}

pub fn parse_trace(line: usize, text: &str) -> Result<LassoTrace, ParseError> {
    let (states, loop_start) = match text.split_once("::") {
        Some((states, start)) => {
            let start = start
                .trim()
                .parse::<usize>()
                .map_err(|_| syntax(line, format!("bad loop start '{start}'")))?;
            (states, Some(start))
        }
        None => (text, None),
    };
    let states = states
        .split(';')
        .map(|s| parse_state(line, s))
        .collect::<Result<Vec<_>, _>>()?;
    LassoTrace::from_states(states, loop_start).map_err(|e| syntax(line, e.to_string()))
}

pub fn parse(text: &str) -> Result<LtlTask, ParseError> {
    let sections = sections(text);
    if sections.len() < 2 {
        return Err(syntax(1, "expected positives and negatives separated by ---"));
    }
    let traces = |section: &Section| -> Result<Vec<LassoTrace>, ParseError> {
        section.iter().map(|(line, t)| parse_trace(*line, t)).collect()
    };
    let positives = traces(&sections[0])?;
    let negatives = traces(&sections[1])?;
    let width = positives
        .iter()
        .chain(&negatives)
        .find_map(|t| t.states().next().map(State::width))
        .ok_or_else(|| syntax(1, "the task has no traces"))?;

    let mut excluded = vec![];
    for (line, text) in sections.get(2).into_iter().flatten() {
        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match lookup(&LTL_OPERATORS, token) {
                Some(op) if !op.is_leaf() => excluded.push(op.name),
                _ => return Err(syntax(*line, format!("unknown operator '{token}'"))),
            }
        }
    }

    let max_nodes = match sections.get(3).and_then(|s| s.first()) {
        Some((line, text)) => text
            .trim_matches(|c| c == '[' || c == ']')
            .trim()
            .parse::<usize>()
            .map_err(|_| syntax(*line, format!("bad node bound '{text}'")))?,
        None => DEFAULT_MAX_NODES,
    };

    let mut task = LtlTask::new(LtlTask::default_literals(width), positives, negatives, max_nodes)
        .with_excluded(excluded);
    task.expected = sections
        .get(4)
        .into_iter()
        .flatten()
        .map(|(_, f)| f.to_string())
        .collect();
    if let Some(custom) = sections.get(5).filter(|s| !s.is_empty()) {
        let fragment = custom.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n");
        task = task.with_custom_constraints(fragment);
    }
    Ok(task)
}
