//! Error taxonomy for test-case execution.
//!
//! `Configuration`, `ResponseFormat` and `Assertion` are raised by the crate
//! itself; the remaining variants wrap failures surfaced by collaborators
//! (HTTP client, storage, filesystem, image comparison, user hooks) together
//! with enough context to localize them.

use std::fmt::{self, Display};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::method::HttpMethod;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by pluggable collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("response body is not valid JSON ({source}): {body}")]
    ResponseFormat {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    #[error("{method} {url} failed: {source}")]
    Transport {
        method: HttpMethod,
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("table `{table}`: {source}")]
    Storage {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("`{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "comparing `{}` against `{}` failed: {message} (diagnostics in `{}`)",
        .uploaded.display(),
        .original.display(),
        .diagnostics.display()
    )]
    ImageCompare {
        uploaded: PathBuf,
        original: PathBuf,
        diagnostics: PathBuf,
        message: String,
    },

    #[error("{stage} hook failed: {source}")]
    Hook {
        stage: HookStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{first}{}", render_others(.others))]
    Aggregate { first: Box<Error>, others: Vec<Error> },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ResponseFormat,
    Assertion,
    Hook,
    Collaborator,
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Classification of the primary failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::ResponseFormat { .. } => ErrorKind::ResponseFormat,
            Error::Assertion(_) => ErrorKind::Assertion,
            Error::Hook { .. } => ErrorKind::Hook,
            Error::Aggregate { first, .. } => first.kind(),
            Error::Transport { .. }
            | Error::Storage { .. }
            | Error::Io { .. }
            | Error::ImageCompare { .. } => ErrorKind::Collaborator,
        }
    }

    /// Folds the failures of sibling sub-tasks into one error, keeping the
    /// first as the primary cause. Returns `None` when nothing failed.
    pub fn collect(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut errors = errors.into_iter();
        let first = errors.next()?;
        let others: Vec<Error> = errors.collect();
        if others.is_empty() {
            return Some(first);
        }
        for other in &others {
            tracing::warn!(error = %other, "secondary failure");
        }
        Some(Error::Aggregate {
            first: Box::new(first),
            others,
        })
    }

    /// Attaches a later failure (for example from the cleanup hook) without
    /// masking `self` as the primary cause.
    pub fn followed_by(self, later: Error) -> Error {
        match self {
            Error::Aggregate { first, mut others } => {
                others.push(later);
                Error::Aggregate { first, others }
            }
            primary => Error::Aggregate {
                first: Box::new(primary),
                others: vec![later],
            },
        }
    }
}

fn render_others(others: &[Error]) -> String {
    others.iter().map(|err| format!("\n  also: {err}")).collect()
}

/// Which user hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

impl Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HookStage::Before => "before",
            HookStage::After => "after",
        };
        write!(f, "{label}")
    }
}

/// An observed value did not match its expectation.
#[derive(Debug, Error)]
pub enum AssertionFailure {
    #[error("expected status {expected}, observed {observed}")]
    Status { expected: u16, observed: u16 },

    #[error("response body mismatch\n  expected: {expected}\n  observed: {observed}")]
    Body { expected: Value, observed: Value },

    #[error("table `{table}` does not hold the expected rows:{}", render_mismatches(.mismatches))]
    Rows {
        table: String,
        mismatches: Vec<FieldMismatch>,
    },

    #[error(
        "neither the uploaded file `{}` nor the expected file `{}` exists",
        .uploaded.display(),
        .original.display()
    )]
    UploadsMissing { uploaded: PathBuf, original: PathBuf },

    #[error(
        "{missing_role} file `{}` does not exist; the {present_role} file was saved to `{}`",
        .missing.display(),
        .saved.display()
    )]
    UploadMissing {
        missing_role: FileRole,
        missing: PathBuf,
        present_role: FileRole,
        saved: PathBuf,
    },

    #[error(
        "uploaded file `{}` differs visually from `{}`; copies saved to `{}` and `{}`",
        .uploaded.display(),
        .original.display(),
        .saved_uploaded.display(),
        .saved_expected.display()
    )]
    UploadMismatch {
        uploaded: PathBuf,
        original: PathBuf,
        saved_uploaded: PathBuf,
        saved_expected: PathBuf,
    },
}

fn render_mismatches(mismatches: &[FieldMismatch]) -> String {
    mismatches.iter().map(|m| format!("\n  {m}")).collect()
}

/// One failing field of one expected row.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMismatch {
    pub row: usize,
    pub field: String,
    pub expected: String,
    pub observed: String,
}

impl Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} field `{}`: expected {}, observed {}",
            self.row, self.field, self.expected, self.observed
        )
    }
}

/// Side of an upload comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Uploaded,
    Expected,
}

impl Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileRole::Uploaded => "uploaded",
            FileRole::Expected => "expected",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_of_nothing_is_none() {
        assert!(Error::collect(Vec::new()).is_none());
    }

    #[test]
    fn collect_keeps_single_error_unwrapped() {
        let err = Error::collect(vec![Error::configuration("boom")]).unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn collect_keeps_every_secondary_failure() {
        let err = Error::collect(vec![
            Error::configuration("first"),
            AssertionFailure::Status {
                expected: 200,
                observed: 500,
            }
            .into(),
        ])
        .unwrap();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("also: expected status 200, observed 500"));
    }

    #[test]
    fn followed_by_does_not_mask_primary() {
        let primary: Error = AssertionFailure::Status {
            expected: 200,
            observed: 404,
        }
        .into();
        let err = primary.followed_by(Error::Hook {
            stage: HookStage::After,
            source: anyhow::anyhow!("cleanup exploded"),
        });

        assert_eq!(err.kind(), ErrorKind::Assertion);
        assert!(err.to_string().starts_with("expected status 200, observed 404"));
        assert!(err.to_string().contains("after hook failed: cleanup exploded"));
    }

    #[test]
    fn row_mismatches_render_one_per_line() {
        let failure = AssertionFailure::Rows {
            table: "users".into(),
            mismatches: vec![
                FieldMismatch {
                    row: 0,
                    field: "status".into(),
                    expected: "not \"blocked\"".into(),
                    observed: "\"blocked\"".into(),
                },
                FieldMismatch {
                    row: 1,
                    field: "name".into(),
                    expected: "\"bob\"".into(),
                    observed: "\"alice\"".into(),
                },
            ],
        };

        let message = failure.to_string();
        assert!(message.contains("\n  row 0 field `status`: expected not \"blocked\", observed \"blocked\""));
        assert!(message.contains("\n  row 1 field `name`"));
    }
}
