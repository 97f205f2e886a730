use std::io;

use thiserror::Error;

pub type FacetResult<T> = Result<T, FacetError>;

#[derive(Debug, Error)]
pub enum FacetError {
    /// The loader failed or did not answer within the configured timeout.
    #[error("source '{source_key}' is unavailable: {reason}")]
    SourceUnavailable { source_key: String, reason: String },

    /// A logical column could not be matched against the dataset's columns.
    #[error(
        "column for '{role}' not found; available columns: [{}]{}",
        quote_list(.available),
        suggestion_suffix(.suggestion)
    )]
    ColumnNotFound {
        role: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("invalid filter on '{column}': {reason}")]
    InvalidFilter { column: String, reason: String },

    #[error("column '{column}' is not numeric")]
    NotNumeric { column: String },

    #[error("column '{column}' does not hold dates")]
    NotDate { column: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FacetError {
    pub fn source_unavailable(source_key: &str, reason: impl Into<String>) -> Self {
        FacetError::SourceUnavailable {
            source_key: source_key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_column_not_found(&self) -> bool {
        matches!(self, FacetError::ColumnNotFound { .. })
    }
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (closest: '{name}')"),
        None => String::new(),
    }
}
