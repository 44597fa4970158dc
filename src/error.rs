use thiserror::Error;

/// Everything that can go wrong between receiving a task and handing back a
/// solution. Running out of bounds is not an error: the learner returns
/// `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum Error {
    /// The task itself is unusable (vocabulary, arities, sorts, examples).
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// The encoder produced a problem that failed static validation.
    #[error("malformed problem: {0}")]
    MalformedProblem(String),

    /// The backend failed or gave up for a reason other than a timeout.
    #[error("solver failure: {0}")]
    Solver(String),

    #[error("solver timed out")]
    Timeout,

    /// A model did not have the shape the encoding guarantees.
    #[error("could not decode model: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidTask(msg.into())
}
