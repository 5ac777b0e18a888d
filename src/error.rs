use std::{fmt, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open image {path}: {source}")]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write image {path}: {message}")]
    ImageWrite { path: PathBuf, message: String },

    /// The vision service could not produce a document. Never retried here.
    #[error("Analysis failed ({reason}): {message}{}", code_suffix(.code))]
    AnalysisUnavailable {
        reason: FailureReason,
        code: Option<String>,
        message: String,
    },

    #[error("Missing configuration: {0}")]
    ConfigurationMissing(&'static str),

    #[error("Invalid analysis document: {0}")]
    InvalidDocument(String),

    #[error("Invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid fill color: {0}")]
    InvalidColor(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ConnectionFailure,
    ServiceError,
    InvalidResponse,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ConnectionFailure => write!(f, "connection failure"),
            FailureReason::ServiceError => write!(f, "service error"),
            FailureReason::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|code| format!(" [code: {code}]"))
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn image_write(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::ImageWrite {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_unavailable_display_includes_code() {
        let error = Error::AnalysisUnavailable {
            reason: FailureReason::ServiceError,
            code: Some("InvalidRequest".to_string()),
            message: "Image format is not valid".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("service error"));
        assert!(msg.contains("Image format is not valid"));
        assert!(msg.contains("[code: InvalidRequest]"));
    }

    #[test]
    fn analysis_unavailable_display_without_code() {
        let error = Error::AnalysisUnavailable {
            reason: FailureReason::ConnectionFailure,
            code: None,
            message: "timed out".to_string(),
        };
        assert_eq!(error.to_string(), "Analysis failed (connection failure): timed out");
    }

    #[test]
    fn configuration_missing_display() {
        let error = Error::ConfigurationMissing("vision endpoint");
        assert_eq!(error.to_string(), "Missing configuration: vision endpoint");
    }
}
