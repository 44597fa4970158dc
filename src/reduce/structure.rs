use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;

use crate::sample::structure::{Constant, Facts, FolTask, Structure};

use super::ReductionStats;

/// Canonicalises structures by renaming constants to `<sort><index>` within
/// their sort and dropping duplicate facts, and collapses equivalent examples.
pub struct StructureReducer<'a> {
    positives: &'a [Structure],
    negatives: &'a [Structure],
}

impl<'a> StructureReducer<'a> {
    pub fn new(positives: &'a [Structure], negatives: &'a [Structure]) -> Self {
        StructureReducer {
            positives,
            negatives,
        }
    }

    pub fn reduce_samples(&self) -> (Vec<Structure>, Vec<Structure>) {
        (
            self.positives.iter().map(reduce_structure).collect(),
            self.negatives.iter().map(reduce_structure).collect(),
        )
    }

    /// Keeps the first representative of every equivalence class per polarity.
    pub fn remove_redundant_examples(&self) -> (Vec<Structure>, Vec<Structure>) {
        (dedup(self.positives), dedup(self.negatives))
    }

    pub fn reduction_stats(&self) -> ReductionStats {
        let (positives, negatives) = self.remove_redundant_examples();
        ReductionStats::new(
            (self.positives.len(), self.negatives.len()),
            (positives.len(), negatives.len()),
        )
    }
}

fn dedup(structures: &[Structure]) -> Vec<Structure> {
    let mut kept: Vec<Structure> = vec![];
    for reduced in structures.iter().map(reduce_structure) {
        if !kept.iter().any(|k| are_equivalent(k, &reduced)) {
            kept.push(reduced);
        }
    }
    kept
}

fn canonical_names(constants: &[Constant]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    let sorts = constants.iter().map(|c| c.sort.as_str()).unique();
    for sort in sorts {
        for (index, constant) in constants.iter().filter(|c| c.sort == sort).enumerate() {
            mapping.insert(
                constant.name.clone(),
                format!("{}{index}", sort.to_lowercase()),
            );
        }
    }
    mapping
}

fn rename_facts(facts: &Facts, mapping: &HashMap<String, String>) -> Facts {
    facts
        .iter()
        .filter(|(_, tuples)| !tuples.is_empty())
        .map(|(name, tuples)| {
            let renamed = tuples
                .iter()
                .map(|tuple| {
                    tuple
                        .iter()
                        .map(|c| mapping.get(c).cloned().unwrap_or_else(|| c.clone()))
                        .collect::<Vec<_>>()
                })
                .unique()
                .collect();
            (name.clone(), renamed)
        })
        .collect()
}

pub fn reduce_structure(structure: &Structure) -> Structure {
    let mapping = canonical_names(&structure.constants);
    let constants = structure
        .constants
        .iter()
        .map(|c| Constant::new(mapping.get(&c.name).cloned().unwrap_or_else(|| c.name.clone()), c.sort.clone()))
        .unique()
        .collect();
    Structure {
        constants,
        relation_facts: rename_facts(&structure.relation_facts, &mapping),
        function_facts: rename_facts(&structure.function_facts, &mapping),
    }
}

/// Same per-sort constant counts and the same fact sets after canonicalisation.
pub fn are_equivalent(a: &Structure, b: &Structure) -> bool {
    let (a, b) = (reduce_structure(a), reduce_structure(b));
    let fact_sets = |facts: &Facts| -> Vec<(String, BTreeSet<Vec<String>>)> {
        facts
            .iter()
            .map(|(name, tuples)| (name.clone(), tuples.iter().cloned().collect()))
            .collect()
    };
    a.sort_counts() == b.sort_counts()
        && fact_sets(&a.relation_facts) == fact_sets(&b.relation_facts)
        && fact_sets(&a.function_facts) == fact_sets(&b.function_facts)
}

pub fn reduce_task(task: &FolTask) -> (FolTask, ReductionStats) {
    let reducer = StructureReducer::new(&task.positives, &task.negatives);
    let (positives, negatives) = reducer.remove_redundant_examples();
    let stats = ReductionStats::new(
        (task.positives.len(), task.negatives.len()),
        (positives.len(), negatives.len()),
    );
    let reduced = FolTask {
        positives,
        negatives,
        ..task.clone()
    };
    (reduced, stats)
}

/// True when a positive and a negative example are equivalent.
pub fn is_contradictory(reduced: &FolTask) -> bool {
    reduced
        .positives
        .iter()
        .any(|p| reduced.negatives.iter().any(|n| are_equivalent(p, n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(names: &[&str], edges: &[(&str, &str)]) -> Structure {
        Structure {
            constants: names.iter().map(|n| Constant::new(*n, "Node")).collect(),
            relation_facts: [(
                "edge".to_string(),
                edges.iter().map(|(x, y)| vec![x.to_string(), y.to_string()]).collect(),
            )]
            .into(),
            function_facts: Facts::new(),
        }
    }

    #[test]
    fn constants_get_canonical_names_per_sort() {
        let mut s = structure(&["alice", "bob"], &[("alice", "bob"), ("alice", "bob")]);
        s.constants.push(Constant::new("home", "Place"));
        let reduced = reduce_structure(&s);
        let names: Vec<_> = reduced.constants.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["node0", "node1", "place0"]);
        assert_eq!(reduced.relation_facts["edge"], vec![vec!["node0", "node1"]]);
    }

    #[test]
    fn canonicalisation_is_idempotent() {
        let reduced = reduce_structure(&structure(&["c", "d"], &[("d", "c")]));
        assert_eq!(reduce_structure(&reduced), reduced);
    }

    #[test]
    fn renamed_copies_are_equivalent_and_collapse() {
        let a = structure(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let b = structure(&["x", "y"], &[("y", "x"), ("x", "y")]);
        let c = structure(&["x", "y"], &[("x", "y")]);
        assert!(are_equivalent(&a, &b));
        assert!(!are_equivalent(&a, &c));

        let positives = vec![a, b, c];
        let reducer = StructureReducer::new(&positives, &[]);
        let (kept, _) = reducer.remove_redundant_examples();
        assert_eq!(kept.len(), 2);
        let stats = reducer.reduction_stats();
        assert_eq!(stats.total_reduction, 1);
        assert!((stats.reduction_percentage() - 100.0 / 3.0).abs() < 1e-9);
    }
}
