use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraftError {
    /// Invalid argument passed to a builder operation
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Expression shape the eager-loading engine cannot rewrite
    #[error("Unsupported query shape: {0}")]
    UnsupportedShape(String),

    /// A mandatory native member could not be bound on a provider type
    #[error("Binding error: `{owner}` has no member `{member}`")]
    Binding { owner: String, member: String },

    /// No provider registered under the requested name
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Error executing a statement
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Error evaluating an expression against fetched rows
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Error converting a value between scalar kinds
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// An auxiliary eager-loading query failed
    #[error("Preamble {slot} failed: {source}")]
    Preamble {
        slot: usize,
        #[source]
        source: Box<GraftError>,
    },

    /// Execution was cancelled before every preamble completed
    #[error("Query execution cancelled")]
    Cancelled,

    /// No rows returned when at least one was expected
    #[error("No rows found")]
    NotFound,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rusqlite specific errors
    #[cfg(feature = "rusqlite")]
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

impl GraftError {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        GraftError::UnsupportedShape(message.into())
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        GraftError::Evaluation(message.into())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, GraftError>;
