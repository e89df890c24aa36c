//! Validation and normalization of a [`TestCase`] before any side effect.

use std::path::{Component, Path};

use serde_json::Value;

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::http::client::build_headers;
use crate::http::request::build_body;
use crate::http::{HttpMethod, RequestBody, RequestData, RequestFormat};
use crate::storage::Row;

use super::case::{ExpectedUpload, StagedUpload, TableSpec, TestCase};
use super::expect::ExpectedRow;

/// A validated test case, ready to drive fixtures and assertions.
#[derive(Debug)]
pub struct NormalizedCase<'a> {
    pub url: String,
    /// `None` for GET.
    pub body: Option<RequestBody>,
    /// Never empty.
    pub tables: Vec<NormalizedTable<'a>>,
    pub upload_dir: Option<&'a Path>,
    pub log_dir: Option<&'a Path>,
}

#[derive(Debug)]
pub struct NormalizedTable<'a> {
    pub name: &'a str,
    pub mock_rows: Vec<Row>,
    pub staged_uploads: &'a [StagedUpload],
    pub expected_rows: Option<&'a [ExpectedRow]>,
    pub expected_uploads: &'a [ExpectedUpload],
}

impl NormalizedCase<'_> {
    /// Distinct table names in first-seen order.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            if !names.contains(&table.name) {
                names.push(table.name);
            }
        }
        names
    }
}

/// Checks every precondition of `case` against `config`. Nothing external
/// is touched, so a rejected case leaves tables and directories as they were.
pub fn normalize<'a>(
    case: &'a TestCase,
    config: &'a HarnessConfig,
    has_storage: bool,
) -> Result<NormalizedCase<'a>> {
    if case.method != HttpMethod::Get && case.reqformat.is_none() {
        return Err(Error::configuration(format!(
            "{} {} requires a reqformat",
            case.method, case.url
        )));
    }

    if case.uploads.is_some() && case.reqformat != Some(RequestFormat::Form) {
        return Err(Error::configuration(format!(
            "{} {}: uploads require the FORM request format",
            case.method, case.url
        )));
    }

    let reqdata: Option<RequestData> = match &case.reqdata {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            return Err(Error::configuration(format!(
                "reqdata must be an object, got {other}"
            )));
        }
    };
    let body = match case.method {
        HttpMethod::Get => None,
        method => Some(build_body(
            method,
            reqdata.as_ref(),
            case.reqformat,
            case.uploads.as_ref(),
        )?),
    };
    if let Some(RequestBody::Multipart { files, .. }) = &body {
        if let Some(missing) = files.iter().find(|file| !file.path.is_file()) {
            return Err(Error::configuration(format!(
                "upload `{}`: `{}` is not a readable file",
                missing.field,
                missing.path.display()
            )));
        }
    }

    build_headers(&case.headers)?;

    if case.db.is_empty() {
        return Err(Error::configuration(format!(
            "{} {} does not reference any table",
            case.method, case.url
        )));
    }
    if !has_storage {
        return Err(Error::configuration(
            "test cases reference tables but no storage is configured",
        ));
    }

    let tables = case
        .db
        .iter()
        .map(normalize_table)
        .collect::<Result<Vec<_>>>()?;

    let needs_dirs = case.db.iter().any(|table| {
        table.mock.as_ref().is_some_and(|mock| mock.uploads.is_some())
            || table.result.as_ref().is_some_and(|result| result.uploads.is_some())
    });
    if needs_dirs {
        if config.upload_dir.is_none() {
            return Err(Error::configuration(
                "upload fixtures or expectations require an upload directory",
            ));
        }
        if config.log_dir.is_none() {
            return Err(Error::configuration(
                "upload fixtures or expectations require a log directory",
            ));
        }
    }

    Ok(NormalizedCase {
        url: config.url_for(&case.url),
        body,
        tables,
        upload_dir: config.upload_dir.as_deref(),
        log_dir: config.log_dir.as_deref(),
    })
}

fn normalize_table(spec: &TableSpec) -> Result<NormalizedTable<'_>> {
    if spec.tablename.trim().is_empty() {
        return Err(Error::configuration("tablename must not be empty"));
    }

    let mock_rows = spec
        .mock
        .iter()
        .flat_map(|mock| mock.data.iter())
        .map(|row| match row {
            Value::Object(map) => Ok(map.clone()),
            other => Err(Error::configuration(format!(
                "mock row for table `{}` must be an object, got {other}",
                spec.tablename
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    for upload in spec.staged_uploads() {
        inside_upload_dir(&spec.tablename, &upload.dest)?;
    }
    for upload in spec.expected_uploads() {
        inside_upload_dir(&spec.tablename, &upload.filename)?;
    }

    Ok(NormalizedTable {
        name: &spec.tablename,
        mock_rows,
        staged_uploads: spec.staged_uploads(),
        expected_rows: spec.expected_rows(),
        expected_uploads: spec.expected_uploads(),
    })
}

/// Rejects empty, absolute and `..` paths so staging and lookups cannot
/// leave the upload directory.
fn inside_upload_dir(table: &str, path: &Path) -> Result<()> {
    let contained = path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if contained && path.components().next().is_some() {
        return Ok(());
    }
    Err(Error::configuration(format!(
        "table `{table}`: upload path `{}` must be relative to the upload directory",
        path.display()
    )))
}
