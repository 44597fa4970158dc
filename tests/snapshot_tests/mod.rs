use separator::{build_learner, SolverOptions, Z3Solver};

use super::{ltl, GLOBALLY, UNTIL};

fn render(text: &str) -> String {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(ltl(text).into(), &finder).unwrap();
    let solution = learner.learn(None, 1).unwrap().unwrap();
    solution.render()
}

#[test]
fn globally_renders_with_glyphs() {
    insta::assert_snapshot!(render(GLOBALLY), @"G x1");
}

#[test]
fn until_renders_infix() {
    insta::assert_snapshot!(render(UNTIL), @"(x0 U x1)");
}

#[test]
fn encoded_vocabulary_is_listed_first() {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(ltl("1::0\n---\n0::0\n").into(), &finder).unwrap();
    let problem = learner.encode(2).unwrap().problem.to_string();
    let header = problem.lines().take(6).collect::<Vec<_>>().join("\n");
    insta::assert_snapshot!(header, @r"
    ; universe: 15 atoms
    ;   Lit: lit_x0
    ;   Time: t0
    ;   Example: ex0 ex1
    ;   Node: n0 n1
    ;   Kind: Literal Neg Next Eventually Globally And Or Imply Until
    ");
}
