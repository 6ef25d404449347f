//! Error types for feedback ingestion and reporting.

use thiserror::Error;

/// Target of a well-formed request that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("No uploads found for {scope}.")]
    NoUploads { scope: String },

    #[error("File {filename} not found for {scope}.")]
    FileNotFound { filename: String, scope: String },

    #[error("No teachers found for {scope}.")]
    NoTeachers { scope: String },

    #[error("Teacher {uname} not found.")]
    TeacherNotFound { uname: String },
}

#[derive(Error, Debug)]
pub enum FeedbackError {
    /// Missing field, malformed CSV schema or inconsistent input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Data rows exceed {limit} limit (got {count})")]
    RowLimitExceeded { count: usize, limit: usize },

    /// Split needs more slots than the layout provides
    #[error("Capacity exceeded: {slots} slots needed, {available} available")]
    CapacityExceeded { slots: usize, available: usize },

    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Classifier or topic pipeline failure
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

impl FeedbackError {
    /// Message safe to show to whoever made the request.
    ///
    /// Validation and not-found errors are returned verbatim; storage and
    /// collaborator failures collapse to a generic message and keep their
    /// detail in the log.
    pub fn public_message(&self) -> String {
        match self {
            FeedbackError::Validation(_)
            | FeedbackError::RowLimitExceeded { .. }
            | FeedbackError::CapacityExceeded { .. }
            | FeedbackError::NotFound(_)
            | FeedbackError::Csv(_) => self.to_string(),
            FeedbackError::Storage(_) | FeedbackError::Migration(_) => {
                "Database error.".to_string()
            }
            FeedbackError::Collaborator(_) | FeedbackError::Http(_) => {
                "Analysis service error.".to_string()
            }
            FeedbackError::Serialization(_) | FeedbackError::Io(_) => {
                "Internal error.".to_string()
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedbackError::NotFound(_))
    }
}
