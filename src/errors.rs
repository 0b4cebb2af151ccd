/// Domain-specific error types for eventlens
///
/// The taxonomy mirrors how failures propagate through a run:
/// configuration and final-artifact errors are fatal, transport errors are
/// logged at the call site and contribute empty results, and data-level
/// gaps (missing mappings, unknown labels) never surface as errors at all.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error talking to {service}: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("Artifact I/O error: {0}")]
    Artifact(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        let service = if e.is_timeout() { "remote (timeout)" } else { "remote" };
        PipelineError::Transport {
            service,
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Artifact(e.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Artifact(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Artifact(e.to_string())
    }
}

impl PipelineError {
    /// Helper to tag a transport failure with the service it came from.
    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Transport {
            service,
            message: message.into(),
        }
    }
}
