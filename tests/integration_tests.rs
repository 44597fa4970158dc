mod snapshot_tests;

use separator::{
    build_learner, sample::LtlTask, tasks::trace_dsl, SearchState, SolverOptions, Task, Z3Solver,
};

/// Negatives chosen so that `Globally(x1)` is the only one-operator
/// separator; see `LASSO` for the documented pair.
pub const GLOBALLY: &str = "\
1,1;1,1;0,1::0
---
1,1;0,0::0
0,0;0,0;0,1::0
0,0;1,1::0
---
---
[4]
";

/// `Until(x0,x1)` is the only separator of at most three nodes. The second
/// positive needs `x0` strictly after index 0 but not at it.
pub const UNTIL: &str = "\
1,0;0,1::0
0,0;1,0;0,1;0,0
0,1;0,0::1
0,1;1,0;1,0;1,0::2
---
0,0::0
1,0;0,0;0,0;0,0::1
0,0;0,0;0,1;0,0::3
---
---
[4]
";

/// The lasso example as documented: `x1` alone already separates it, so
/// `Globally(x1)` is one answer among several.
const LASSO: &str = "\
1,1;1,1;0,1::0
---
0,0;0,0;0,1::0
---
---
[3]
";

pub fn ltl(text: &str) -> LtlTask {
    trace_dsl::parse(text).unwrap()
}

pub fn fol(json: &str) -> Task {
    separator::tasks::json::parse(json).unwrap().into()
}

pub fn graph_task() -> Task {
    separator::tasks::json::parse(
        r#"{
            "sorts": ["Node"],
            "relations": [{"name": "edge", "signature": ["Node", "Node"]}],
            "positiveExamples": [{
                "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
                "relationFacts": {"edge": [["a", "b"], ["b", "a"]]}
            }],
            "negativeExamples": [{
                "constants": [{"name": "c", "sort": "Node"}, {"name": "d", "sort": "Node"}],
                "relationFacts": {"edge": [["c", "d"]]}
            }],
            "maxNodes": 5
        }"#,
    )
    .unwrap()
    .into()
}

macro_rules! create_ltl_test {
    ($test_name:ident, $task:expr, $expected:literal) => {
        #[test]
        fn $test_name() {
            let finder = Z3Solver::initialize(&SolverOptions::default());
            let learner = build_learner(Task::Ltl($task), &finder).unwrap();
            let solution = learner.learn(None, 1).unwrap().expect("a separator");
            assert_eq!(solution.prefix(), $expected);
            assert!(solution.is_consistent());
            assert_eq!(learner.state(), SearchState::Found);
        }
    };
}

create_ltl_test!(test_globally, ltl(GLOBALLY), "Globally(x1)");
create_ltl_test!(test_until, ltl(UNTIL), "Until(x0,x1)");

#[test]
fn test_excluded_operators_never_appear() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(ltl(GLOBALLY).with_excluded(["Globally"]).into(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().unwrap();
    assert!(!solution.formula().contains_operator("Globally"));
    // a literal and its successor, such as x1 & X x1
    assert_eq!(solution.formula().operator_count(), 2);
    assert!(solution.is_consistent());
}

#[test]
fn test_escalates_to_the_maximum() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let mut task = ltl(UNTIL);
    task.max_nodes = 2;
    let learner = build_learner(task.clone().into(), &finder).unwrap();
    assert!(learner.learn(Some(2), 1).unwrap().is_none());
    assert_eq!(learner.state(), SearchState::Exhausted);

    task.max_nodes = 3;
    let learner = build_learner(task.into(), &finder).unwrap();
    let solution = learner.learn(Some(2), 1).unwrap().unwrap();
    assert_eq!(solution.bound(), 3);
    assert_eq!(solution.prefix(), "Until(x0,x1)");
}

#[test]
fn test_learning_is_deterministic() {
    let run = || {
        let finder = Z3Solver::initialize(&SolverOptions::default());
        let learner = build_learner(ltl(UNTIL).into(), &finder).unwrap();
        let solution = learner.learn(None, 1).unwrap().unwrap();
        (solution.bound(), solution.prefix())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_next_yields_a_different_separator() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(ltl(GLOBALLY).into(), &finder).unwrap();
    let first = learner.learn(None, 1).unwrap().unwrap();
    let first_prefix = first.prefix();
    let second = first.next().unwrap().expect("another separator");
    assert_ne!(second.prefix(), first_prefix);
    assert!(second.is_consistent());
}

#[test]
fn test_custom_constraints_restrict_the_root() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let task = ltl(GLOBALLY).with_custom_constraints("(assert (not |kind!n0!Globally|))");
    let learner = build_learner(task.into(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().unwrap();
    assert!(!solution.prefix().starts_with("Globally"));
    assert!(solution.is_consistent());
}

#[test]
fn test_fol_separator_quantifies() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(graph_task(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    let rendered = solution.render();
    assert!(rendered.contains('∀') || rendered.contains('∃'), "{rendered}");
    assert!(solution.formula().contains_operator("Forall") || solution.formula().contains_operator("Exists"));
    assert!(solution.is_consistent());
    assert_eq!(solution.bound(), 3);
}

#[test]
fn test_contradictory_task_is_not_found() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    // 1;1 and 1 are the same lasso once reduced
    let learner = build_learner(ltl("1;1::0\n---\n1::0\n").into(), &finder).unwrap();
    assert!(learner.learn(None, 1).unwrap().is_none());
}

#[test]
fn test_lasso_example_admits_globally() {
    let finder = Z3Solver::initialize(&SolverOptions {
        timeout: None,
        minimize: false,
    });
    let learner = build_learner(ltl(LASSO).into(), &finder).unwrap();
    let mut found = vec![];
    let mut next = learner.learn(None, 1).unwrap();
    while let Some(solution) = next {
        assert!(solution.is_consistent(), "{}", solution.prefix());
        found.push(solution.prefix());
        if solution.prefix() == "Globally(x1)" {
            break;
        }
        next = solution.next().unwrap();
    }
    assert!(found.iter().any(|p| p == "Globally(x1)"), "{found:?}");
}

#[test]
fn test_fol_unrelated_pair_is_separated_by_a_quantifier() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let task = fol(r#"{
        "sorts": ["Node"],
        "relations": [{"name": "edge", "signature": ["Node", "Node"]}],
        "positiveExamples": [{
            "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
            "relationFacts": {"edge": [["a", "b"], ["b", "a"]]}
        }],
        "negativeExamples": [{
            "constants": [{"name": "c", "sort": "Node"}, {"name": "d", "sort": "Node"}],
            "relationFacts": {}
        }],
        "maxNodes": 5
    }"#);
    let learner = build_learner(task, &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    let formula = solution.formula();
    assert!(formula.contains_operator("Forall") || formula.contains_operator("Exists"));
    assert!(solution.is_consistent());
}

/// Both structures have `p = {b}`; only `f(a)` differs, so a separator has
/// to apply `f`.
const FUNCTIONS: &str = r#"{
    "sorts": ["Node"],
    "relations": [{"name": "p", "signature": ["Node"]}],
    "functions": [{"name": "f", "signature": ["Node", "Node"]}],
    "positiveExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["b"]]},
        "functionFacts": {"f": [["a", "b"], ["b", "b"]]}
    }],
    "negativeExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["b"]]},
        "functionFacts": {"f": [["a", "a"], ["b", "b"]]}
    }],
    "maxNodes": 3,
    "termPolicy": "any"
CUSTOM}"#;

fn functions(custom: &str) -> Task {
    fol(&FUNCTIONS.replace("CUSTOM", custom))
}

#[test]
fn test_fol_function_terms_separate() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(functions(""), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert!(solution.prefix().contains("f("), "{}", solution.prefix());
    assert_eq!(solution.formula().operator_count(), 0);
    assert!(solution.is_consistent());
}

#[test]
fn test_fol_function_of_a_bound_variable() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let task = functions(r#", "customConstraints": "(assert |targ!T0!I0!V0|)""#);
    let learner = build_learner(task, &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert_eq!(solution.prefix(), "Forall(v0:Node,p(f(v0)))");
    assert!(solution.is_consistent());
}

const MARKED: &str = r#"{
    "sorts": ["Node"],
    "relations": [{"name": "p", "signature": ["Node"]}],
    "positiveExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["b"]]}
    }],
    "negativeExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["a"]]}
    }],
    "maxNodes": 3
POLICY}"#;

#[test]
fn test_fol_constants_need_a_term_policy() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    // the two structures are isomorphic once constants are out of reach
    let learner = build_learner(fol(&MARKED.replace("POLICY", "")), &finder).unwrap();
    assert!(learner.learn(None, 1).unwrap().is_none());

    let task = fol(&MARKED.replace("POLICY", r#", "termPolicy": "any""#));
    let learner = build_learner(task, &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert_eq!(solution.prefix(), "p(node1)");
    assert!(solution.is_consistent());
}

const TARGETED: &str = r#"{
    "sorts": ["Node"],
    "relations": [{"name": "r", "signature": ["Node", "Node"]}],
    "positiveExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"r": [["a", "b"]]}
    }],
    "negativeExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"r": [["a", "a"]]}
    }],
    "maxNodes": 3,
    "customConstraints": "(assert |arg!n1!I0!V0|) (assert |arg!n1!I1!el_node1|)",
    "termPolicy": "POLICY"
}"#;

#[test]
fn test_fol_uniform_policy_rejects_mixed_atoms() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(fol(&TARGETED.replace("POLICY", "any")), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert_eq!(solution.prefix(), "Exists(v0:Node,r(v0,node1))");
    assert!(solution.is_consistent());

    let learner = build_learner(fol(&TARGETED.replace("POLICY", "uniform")), &finder).unwrap();
    assert!(learner.learn(None, 1).unwrap().is_none());
}

const NEGATED: &str = r#"{
    "sorts": ["Node"],
    "relations": [{"name": "p", "signature": ["Node"]}],
    "positiveExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["a"]]}
    }],
    "negativeExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"p": [["a"], ["b"]]}
    }],
    "maxNodes": 3,
    "customConstraints": "(assert |kind!n0!Not|)",
    "prenex": PRENEX
}"#;

#[test]
fn test_fol_negated_quantifier_needs_non_prenex() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(fol(&NEGATED.replace("PRENEX", "true")), &finder).unwrap();
    assert!(learner.learn(None, 1).unwrap().is_none());

    let learner = build_learner(fol(&NEGATED.replace("PRENEX", "false")), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert_eq!(solution.prefix(), "Not(Forall(v0:Node,p(v0)))");
    assert!(solution.is_consistent());
}

#[test]
fn test_fol_excluded_exists_never_appears() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let Task::Fol(task) = graph_task() else {
        unreachable!("graph_task is a FOL task")
    };
    let learner = build_learner(task.with_excluded(["Exists"]).into(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("a separator");
    assert!(!solution.formula().contains_operator("Exists"));
    assert!(solution.formula().contains_operator("Forall"));
    assert!(solution.is_consistent());
}

#[test]
fn test_until_ignores_the_left_operand_at_the_start() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    // pins the formula to x0 U x1; x0 is false at index 0 of both traces
    let task = ltl("0,0;1,0;0,1::2\n---\n0,0;0,0;0,1::2\n---\n---\n[3]\n").with_custom_constraints(
        "(assert |kind!n0!Until|) (assert |left!n0!n1|) (assert |right!n0!n2|) \
         (assert |label!n1!lit_x0|) (assert |label!n2!lit_x1|)",
    );
    let learner = build_learner(task.into(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().expect("x0 U x1 separates");
    assert_eq!(solution.prefix(), "Until(x0,x1)");
    assert!(solution.is_consistent());
}
