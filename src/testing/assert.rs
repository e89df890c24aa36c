//! Response and persisted-state assertions.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde_json::Value;

use crate::error::{AssertionFailure, Error, FileRole, Result};
use crate::files;
use crate::http::HttpResponse;
use crate::storage::{Storage, Table, sort_by_id};
use crate::visual::ImageComparator;

use super::case::ExpectedUpload;
use super::expect::{ExpectedRow, json_eq};
use super::normalize::NormalizedTable;

/// Checks status first, then (when `expected_body` is given) the JSON body.
///
/// The body is never parsed when the status is wrong. A body that is not
/// JSON is a [`Error::ResponseFormat`], distinct from a wrong value.
pub fn assert_response(
    observed: &HttpResponse,
    expected_status: u16,
    expected_body: Option<&Value>,
) -> Result<()> {
    if observed.status != expected_status {
        return Err(AssertionFailure::Status {
            expected: expected_status,
            observed: observed.status,
        }
        .into());
    }

    let Some(expected) = expected_body else {
        return Ok(());
    };
    let parsed: Value = serde_json::from_str(&observed.body).map_err(|source| Error::ResponseFormat {
        body: observed.body.clone(),
        source,
    })?;
    if !json_eq(&parsed, expected) {
        return Err(AssertionFailure::Body {
            expected: expected.clone(),
            observed: parsed,
        }
        .into());
    }
    Ok(())
}

/// Verifies rows and uploaded files after the request.
pub struct StateAsserter<'a> {
    storage: &'a dyn Storage,
    comparator: &'a dyn ImageComparator,
    upload_dir: Option<&'a Path>,
    log_dir: Option<&'a Path>,
}

impl<'a> StateAsserter<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        comparator: &'a dyn ImageComparator,
        upload_dir: Option<&'a Path>,
        log_dir: Option<&'a Path>,
    ) -> Self {
        Self {
            storage,
            comparator,
            upload_dir,
            log_dir,
        }
    }

    /// Runs row and upload assertions concurrently and reports every
    /// failure, the first one as primary.
    pub async fn assert_tables(&self, tables: &[NormalizedTable<'_>]) -> Result<()> {
        let row_checks = tables
            .iter()
            .filter_map(|table| Some((table.name, table.expected_rows?)))
            .map(|(name, expected)| self.assert_rows(name, expected));
        let upload_checks = tables.iter().flat_map(|table| {
            table
                .expected_uploads
                .iter()
                .map(move |upload| self.assert_upload(table.name, upload))
        });

        let (rows, uploads) = futures::join!(join_all(row_checks), join_all(upload_checks));
        match Error::collect(rows.into_iter().chain(uploads).filter_map(Result::err)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fetches the table, sorts it by `id` and compares positionally. Every
    /// failing field of every row is reported.
    async fn assert_rows(&self, name: &str, expected: &[ExpectedRow]) -> Result<()> {
        let mut actual = Table::bind(self.storage, name)
            .fetch_all()
            .await
            .map_err(|source| Error::Storage {
                table: name.to_string(),
                source,
            })?;
        sort_by_id(&mut actual);

        let mismatches: Vec<_> = expected
            .iter()
            .enumerate()
            .flat_map(|(index, row)| row.check(index, actual.get(index)))
            .collect();
        if mismatches.is_empty() {
            tracing::debug!(table = name, rows = expected.len(), "rows match");
            return Ok(());
        }
        Err(AssertionFailure::Rows {
            table: name.to_string(),
            mismatches,
        }
        .into())
    }

    async fn assert_upload(&self, table: &str, upload: &ExpectedUpload) -> Result<()> {
        let (Some(upload_dir), Some(log_dir)) = (self.upload_dir, self.log_dir) else {
            return Err(Error::configuration(
                "upload assertions require upload and log directories",
            ));
        };
        let uploaded = upload_dir.join(&upload.filename);
        let original = upload.original.clone();
        let artifacts = Artifacts::new(log_dir, table, upload);

        let uploaded_exists = files::exists(&uploaded).await;
        let original_exists = files::exists(&original).await;

        match (uploaded_exists, original_exists) {
            (false, false) => Err(AssertionFailure::UploadsMissing { uploaded, original }.into()),
            (true, false) => {
                let failure = AssertionFailure::UploadMissing {
                    missing_role: FileRole::Expected,
                    missing: original,
                    present_role: FileRole::Uploaded,
                    saved: artifacts.uploaded.clone(),
                };
                Err(with_capture(failure.into(), files::copy(&uploaded, &artifacts.uploaded).await))
            }
            (false, true) => {
                let failure = AssertionFailure::UploadMissing {
                    missing_role: FileRole::Uploaded,
                    missing: uploaded,
                    present_role: FileRole::Expected,
                    saved: artifacts.expected.clone(),
                };
                Err(with_capture(failure.into(), files::copy(&original, &artifacts.expected).await))
            }
            (true, true) => {
                let verdict = self
                    .comparator
                    .compare(&uploaded, &original, &artifacts.diff)
                    .await;
                let failure = match verdict {
                    Ok(true) => {
                        tracing::debug!(file = %uploaded.display(), "upload matches reference");
                        return Ok(());
                    }
                    Ok(false) => AssertionFailure::UploadMismatch {
                        uploaded: uploaded.clone(),
                        original: original.clone(),
                        saved_uploaded: artifacts.uploaded.clone(),
                        saved_expected: artifacts.expected.clone(),
                    }
                    .into(),
                    Err(err) => Error::ImageCompare {
                        uploaded: uploaded.clone(),
                        original: original.clone(),
                        diagnostics: artifacts.root.clone(),
                        message: err.to_string(),
                    },
                };
                let (saved_uploaded, saved_expected) = futures::join!(
                    files::copy(&uploaded, &artifacts.uploaded),
                    files::copy(&original, &artifacts.expected)
                );
                Err(with_capture(with_capture(failure, saved_uploaded), saved_expected))
            }
        }
    }
}

/// Diagnostic locations for one expected upload, namespaced by table.
struct Artifacts {
    root: PathBuf,
    uploaded: PathBuf,
    expected: PathBuf,
    diff: PathBuf,
}

impl Artifacts {
    fn new(log_dir: &Path, table: &str, upload: &ExpectedUpload) -> Self {
        let root = log_dir.join(table);
        let expected_name = upload
            .original
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| upload.filename.clone());
        Self {
            uploaded: root.join("uploaded").join(&upload.filename),
            expected: root.join("expected").join(expected_name),
            diff: root.join("diff").join(&upload.filename).with_extension("png"),
            root,
        }
    }
}

fn with_capture(failure: Error, captured: Result<()>) -> Error {
    match captured {
        Ok(()) => failure,
        Err(copy_err) => failure.followed_by(copy_err),
    }
}
