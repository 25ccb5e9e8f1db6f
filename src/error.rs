use thiserror::Error;

/// Errors returned while collecting statistics or solving for a transform.
///
/// Dropped utterances (duplicate ids, ids without a speaker) are not errors;
/// they are counted in [`crate::ReadSummary`].
#[derive(Debug, Error)]
pub enum LdaError {
    #[error("dimension mismatch for {key}: expected {expected}, got {got}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("did not read any utterances")]
    NoUtterances,

    #[error("non-finite distance weight (distance {distance}, exponent {exponent})")]
    DegenerateWeight { distance: f64, exponent: i32 },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("npy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("npy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
}

pub type Result<T, E = LdaError> = std::result::Result<T, E>;
