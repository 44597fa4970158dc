//! Example model: the immutable inputs of a learning task.

pub mod structure;
pub mod trace;

pub use structure::{Constant, Facts, FolTask, Structure, Symbol, TermPolicy};
pub use trace::{LassoTrace, LtlTask, State};
