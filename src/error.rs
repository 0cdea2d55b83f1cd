//! # Error Types
//!
//! This module defines the error types of the search engine. Only errors that
//! make a whole run impossible are represented here; a candidate that fails to
//! sample or to evaluate is reported as a value (see
//! [`SampleFailure`](crate::sampler::SampleFailure) and
//! [`EvaluationFailure`](crate::evaluator::EvaluationFailure)) and merely
//! consumes budget.
//!
//! ## Examples
//!
//! Using the `Result` type:
//!
//! ```rust
//! use heurist::error::{SearchError, Result};
//!
//! fn check_pool_size(size: usize) -> Result<usize> {
//!     if size == 0 {
//!         return Err(SearchError::Configuration("pool size cannot be zero".to_string()));
//!     }
//!     Ok(size)
//! }
//!
//! assert!(check_pool_size(0).is_err());
//! ```
//!
//! Using the `ResultExt` trait to add context to errors:
//!
//! ```rust
//! use heurist::error::{Result, ResultExt};
//! use std::fs::File;
//!
//! fn open_config(path: &str) -> Result<()> {
//!     File::open(path).context("Failed to open run configuration")?;
//!     Ok(())
//! }
//! ```
//!
//! Using the `OptionExt` trait to convert `Option` to `Result`:
//!
//! ```rust
//! use heurist::error::{SearchError, OptionExt};
//!
//! fn best_of(scores: &[i32]) -> heurist::error::Result<i32> {
//!     scores.iter().max().cloned().ok_or_else_search(|| SearchError::EmptyPopulation)
//! }
//! ```

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Errors that abort a search run or reject an invalid call.
#[derive(Error, Debug)]
pub enum SearchError {
    /// An invalid configuration was provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The task capability is unusable (missing function, missing entry point,
    /// template program that cannot be scored).
    #[error("Task error: {0}")]
    Task(String),

    /// Parents were requested from an empty population.
    #[error("Empty population error: Cannot select parents from an empty population")]
    EmptyPopulation,

    /// A selection policy could not produce the requested parents.
    #[error("Selection error: {0}")]
    Selection(String),

    /// Program text could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The generation capability failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// An evaluation could not be carried out or its result was rejected.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Random number generation failed.
    #[error("Random generation error: {0}")]
    RandomGeneration(String),

    /// NaN or infinity where a finite score was required.
    #[error("Invalid numeric value: {0}")]
    InvalidNumericValue(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding JSON failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic error with a custom message.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Extension trait for Result to add context to errors.
///
/// ## Examples
///
/// ```rust
/// use heurist::error::ResultExt;
/// use std::fs::File;
///
/// fn read_file(path: &str) -> heurist::error::Result<()> {
///     File::open(path).context("Failed to open file")?;
///     Ok(())
/// }
/// ```
pub trait ResultExt<T, E> {
    /// Converts the error to a `SearchError::Other` prefixed with `context`.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| SearchError::Other(format!("{}: {}", context, e)))
    }
}

/// Extension trait for Option to convert to Result with a chosen error.
pub trait OptionExt<T> {
    /// Converts an `Option<T>` to a `Result<T>` using `err_fn` for the `None` case.
    fn ok_or_else_search<F>(self, err_fn: F) -> Result<T>
    where
        F: FnOnce() -> SearchError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_else_search<F>(self, err_fn: F) -> Result<T>
    where
        F: FnOnce() -> SearchError,
    {
        self.ok_or_else(err_fn)
    }
}
