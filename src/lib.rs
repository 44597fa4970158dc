use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub use driver::{build_learner, LearnOptions, Learner, SearchState, Solution, Task};
pub use error::{Error, Result};
pub use formula::Formula;
pub use solver::{SolverOptions, Z3Solver};

pub mod decode;
pub mod driver;
pub mod encode;
mod error;
pub mod formula;
pub mod logger;
pub mod problem;
pub mod reduce;
pub mod sample;
pub mod solver;
pub mod tasks;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Learns LTL and FOL formulas that separate positive from negative examples", long_about = None)]
pub struct SeparatorOptions {
    /// The file containing one task to run (.trace, .json or .fol).
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// A folder searched recursively for task files.
    #[arg(short = 't', long)]
    pub traces: Option<PathBuf>,

    /// Seconds allowed per task; 0 means no limit.
    #[arg(short = 'T', long, default_value_t = 0)]
    pub timeout: u64,

    /// Print the encoded problem at bound 8 instead of solving.
    #[arg(short = 'm', long, default_value_t = false)]
    pub model: bool,

    /// Accept any separator instead of a smallest one.
    #[arg(short = 'A', long, default_value_t = false)]
    pub find_any: bool,

    /// How many separators to enumerate per task.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub solutions: usize,

    /// First node bound to try; derived from the vocabulary when absent.
    #[arg(long)]
    pub start: Option<usize>,

    /// Increment between node bounds.
    #[arg(long, default_value_t = 1)]
    pub step: usize,

    #[arg(long, default_value_t = log::Level::Warn)]
    pub log_level: log::Level,

    /// Show source locations in log lines.
    #[arg(long, default_value_t = false)]
    pub line_numbers: bool,
}

impl Default for SeparatorOptions {
    fn default() -> Self {
        SeparatorOptions {
            filename: None,
            traces: None,
            timeout: 0,
            model: false,
            find_any: false,
            solutions: 1,
            start: None,
            step: 1,
            log_level: log::Level::Warn,
            line_numbers: false,
        }
    }
}

impl SeparatorOptions {
    pub fn from_filename(filename: impl Into<PathBuf>) -> Self {
        SeparatorOptions {
            filename: Some(filename.into()),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            timeout: self.timeout(),
            minimize: !self.find_any,
        }
    }

    pub fn learn_options(&self) -> LearnOptions {
        LearnOptions {
            start: self.start,
            step: self.step,
        }
    }
}
