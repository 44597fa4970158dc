//! Task-file front ends: the LTL trace DSL, FOL JSON and the FOL
//! S-expression DSL. Each produces a [`Task`] ready for the learner.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::driver::Task;

pub mod json;
pub mod sexpr;
pub mod trace_dsl;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("invalid JSON task: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported task file {0}")]
    UnknownFormat(PathBuf),
}

pub(crate) fn syntax(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.into(),
    }
}

/// Reads a task file, picking the front end by extension.
pub fn load_task(path: &Path) -> Result<Task, ParseError> {
    let text = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("loading task {}", path.display());
    match path.extension().and_then(|e| e.to_str()) {
        Some("trace") => Ok(Task::Ltl(trace_dsl::parse(&text)?)),
        Some("json") => Ok(Task::Fol(json::parse(&text)?)),
        Some("fol") if text.trim_start().starts_with('{') => Ok(Task::Fol(json::parse(&text)?)),
        Some("fol") => Ok(Task::Fol(sexpr::parse(&text)?)),
        _ => Err(ParseError::UnknownFormat(path.to_path_buf())),
    }
}

pub fn is_task_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("trace" | "json" | "fol"))
}

/// Every task file below `dir`, recursively, in path order.
pub fn find_tasks(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let io = |source| ParseError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = vec![];
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            found.extend(find_tasks(&path)?);
        } else if is_task_file(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// `numOfPositives,numOfNegatives,maxNumOfOP,numOfSorts,numOfRelations`.
/// LTL tasks report their literal count as the sort count and no relations.
pub fn csv_summary(task: &Task) -> String {
    let (positives, negatives) = task.example_counts();
    let (vocabulary, relations) = match task {
        Task::Ltl(t) => (t.literals.len(), 0),
        Task::Fol(t) => (t.sorts.len(), t.relations.len()),
    };
    format!("{positives},{negatives},{},{vocabulary},{relations}", task.max_nodes())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;

    #[test]
    fn dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("a.trace");
        let mut file = File::create(&trace).unwrap();
        writeln!(file, "1;1::0\n---\n0::0").unwrap();
        let fol = dir.path().join("nested").join("b.fol");
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(&fol, "(sort Node)\n(relation p Node)\n(model + ((a Node)) (p a))\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert!(matches!(load_task(&trace).unwrap(), Task::Ltl(_)));
        let task = load_task(&fol).unwrap();
        assert!(matches!(task, Task::Fol(_)));
        assert_eq!(csv_summary(&task), "1,0,8,1,1");
        assert_eq!(find_tasks(dir.path()).unwrap(), vec![trace, fol]);
        assert!(matches!(
            load_task(&dir.path().join("notes.txt")),
            Err(ParseError::UnknownFormat(_))
        ));
    }

    #[test]
    fn missing_files_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_task(&dir.path().join("missing.trace")),
            Err(ParseError::Io { .. })
        ));
    }
}
