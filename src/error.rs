//! Error taxonomy for the knowledge pipeline.
//!
//! Job-level failures surface as [`KnowledgeError`]. File-level problems
//! (unreadable or binary files) and failed embedding batches are *not*
//! errors: they are aggregated into the job report and the run continues.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T, E = KnowledgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Malformed or missing input: credentials, project path, chat text.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The embedding or LLM service failed.
    #[error("{service} request failed: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
        /// Rate limits, 5xx and transport errors are worth another attempt.
        retryable: bool,
    },

    /// Persisted index/metadata cannot be read or disagree with each other.
    /// The next vectorize run rebuilds both from scratch.
    #[error("artifact corrupted at {path}: {reason}")]
    ArtifactCorruption { path: PathBuf, reason: String },

    /// A read-only operation needs artifacts that have not been generated.
    #[error("project knowledge missing: {0}. Run `sous reload` first")]
    MissingArtifacts(String),

    /// The summarizer answered with something that is not a ProjectIntelligence document.
    #[error("summarizer output rejected: {0}")]
    MalformedSummary(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KnowledgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn external(service: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::ExternalService {
            service,
            message: message.into(),
            retryable,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArtifactCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService {
                retryable: true,
                ..
            }
        )
    }

    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ExternalService { .. } => "external_service",
            Self::ArtifactCorruption { .. } => "artifact_corruption",
            Self::MissingArtifacts(_) => "missing_artifacts",
            Self::MalformedSummary(_) => "malformed_summary",
            Self::Config(_) => "config",
            Self::Io { .. } => "io",
            Self::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_flagged_external_errors() {
        assert!(KnowledgeError::external("openai", "429", true).is_retryable());
        assert!(!KnowledgeError::external("openai", "400", false).is_retryable());
        assert!(!KnowledgeError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_missing_artifacts_message_points_at_reload() {
        let err = KnowledgeError::MissingArtifacts("embedding index".into());
        assert!(err.to_string().contains("sous reload"));
        assert_eq!(err.code(), "missing_artifacts");
    }
}
