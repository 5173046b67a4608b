//! Error types for the Datasync CLI
//!
//! Messages are shown to operators as-is, so each one says what to check next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The server answered with an error payload
    #[error("Server rejected the request ({code}): {message}")]
    Api { code: String, message: String },

    /// Workflow, catalog or report does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server could not be reached at all
    #[error("Cannot reach the Datasync server at {url}: {source}. Check --server-url or DATASYNC_SERVER_URL.")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed after the connection was made
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Workflow input file is missing or unreadable
    #[error("Cannot read '{path}': {source}")]
    InputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Logging or other setup failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The watched workflow ended in the failed phase
    #[error("Workflow {0} failed")]
    WorkflowFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error
    ///
    /// 2 is left to clap for usage errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NotFound(_) => 4,
            CliError::Unreachable { .. } => 3,
            _ => 1,
        }
    }
}
