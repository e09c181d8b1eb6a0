use thiserror::Error;

/// Error type for dispatch and aggregation operations.
///
/// "No data" is never an error: empty shards and all-absent partials are reported through
/// `None` (or `0` for count-distinct) by the individual functions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggError {
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Invalid arguments to {function}(): {reason}")]
    InvalidArguments { function: String, reason: String },

    /// A reduce function was handed a partial produced by a different map function.
    #[error("Unexpected partial for {function}: got {found}")]
    UnexpectedPartial {
        function: &'static str,
        found: &'static str,
    },

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl AggError {
    pub(crate) fn invalid_args(function: &str, reason: impl Into<String>) -> Self {
        AggError::InvalidArguments {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}
