use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
    /// A token ended up with no unmasked segment output. Always a
    /// segmentation or margin bug, never a data problem.
    #[error("token {token_index} is not covered by any unmasked segment output")]
    Coverage { token_index: usize },
    #[error("malformed model output: {message}")]
    ModelOutput { message: String },
}

impl RestoreError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn model_output(message: impl Into<String>) -> Self {
        Self::ModelOutput {
            message: message.into(),
        }
    }
}
