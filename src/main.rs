use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use anyhow::bail;
use clap::Parser;
use log::{debug, error, info, warn};
use separator::{
    build_learner, logger, solver::Valuation, tasks, Error, SeparatorOptions, Task, Z3Solver,
};

const CSV_HEADER: &str =
    "filename,numOfPositives,numOfNegatives,maxNumOfOP,numOfSorts,numOfRelations,solvingTime,formula";

/// The bound `-m` prints the encoding for.
const MODEL_BOUND: usize = 8;

fn main() -> anyhow::Result<()> {
    let options = SeparatorOptions::parse();
    logger::init_logger(options.log_level, options.line_numbers);

    let paths = match (&options.filename, &options.traces) {
        (Some(file), _) => vec![file.clone()],
        (None, Some(dir)) => tasks::find_tasks(dir)?,
        (None, None) => bail!("please provide a task file (-f) or a folder of tasks (-t)"),
    };

    if options.model {
        for path in &paths {
            let task = tasks::load_task(path)?;
            let finder = Z3Solver::initialize(&options.solver_options());
            let learner = build_learner(task, &finder)?;
            println!("{}", learner.encode(MODEL_BOUND)?.problem);
        }
        return Ok(());
    }

    println!("{CSV_HEADER}");
    let mut stragglers = false;
    for path in &paths {
        stragglers |= !run_task(path, &options);
    }
    if stragglers {
        // timed-out workers are still inside the solver
        std::process::exit(0);
    }
    Ok(())
}

/// Runs one task on a worker thread and prints its CSV rows. Returns false
/// when the worker had to be abandoned.
fn run_task(path: &Path, options: &SeparatorOptions) -> bool {
    let task = match tasks::load_task(path) {
        Ok(task) => task,
        Err(e) => {
            error!("{}: {e}", path.display());
            return true;
        }
    };
    if let Task::Ltl(ltl) = &task {
        if !ltl.expected.is_empty() {
            info!("expected: {}", ltl.expected.join(" | "));
        }
    }
    let row = format!("{},{}", path.display(), tasks::csv_summary(&task));

    let (sender, receiver) = mpsc::channel();
    let worker_options = options.clone();
    let start = Instant::now();
    thread::spawn(move || {
        // the receiver is gone once the task timed out
        let _ = sender.send(learn(task, &worker_options));
    });
    let received = match options.timeout() {
        Some(limit) => receiver.recv_timeout(limit),
        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    let elapsed = start.elapsed().as_secs_f64();

    match received {
        Ok(Ok(formulas)) if formulas.is_empty() => println!("{row},{elapsed:.3},UNSAT"),
        Ok(Ok(formulas)) => {
            for formula in formulas {
                println!("{row},{elapsed:.3},\"{formula}\"");
            }
        }
        Ok(Err(Error::Timeout)) => println!("{row},{elapsed:.3},TIMEOUT"),
        Ok(Err(e)) => {
            error!("{}: {e}", path.display());
            println!("{row},{elapsed:.3},ERROR");
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} timed out after {elapsed:.1}s", path.display());
            println!("{row},{elapsed:.3},TIMEOUT");
            return false;
        }
        Err(RecvTimeoutError::Disconnected) => {
            error!("the worker for {} stopped without an answer", path.display());
            println!("{row},{elapsed:.3},ERROR");
        }
    }
    true
}

/// Up to `options.solutions` separators, rendered.
fn learn(task: Task, options: &SeparatorOptions) -> separator::Result<Vec<String>> {
    let finder = Z3Solver::initialize(&options.solver_options());
    let learner = build_learner(task, &finder)?;
    let mut rendered = vec![];
    let mut solution = learner.learn_with(&options.learn_options())?;
    while let Some(current) = solution {
        if !current.is_consistent() {
            warn!("{} does not separate the reduced examples", current.render());
        }
        debug!("model at bound {}:\n{}", current.bound(), current.instance().dump());
        rendered.push(current.render());
        if rendered.len() >= options.solutions {
            break;
        }
        solution = current.next()?;
    }
    Ok(rendered)
}
