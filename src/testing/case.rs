//! Declarative test-case model.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::http::{HttpMethod, RequestFormat, Uploads};

use super::expect::ExpectedRow;

pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A callable run before seeding or after the assertions.
///
/// Every case carries one; the default completes immediately, so the runner
/// awaits hooks unconditionally.
#[derive(Clone)]
pub struct Hook(Arc<dyn Fn() -> HookFuture + Send + Sync>);

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Hook(Arc::new(move || -> HookFuture { Box::pin(f()) }))
    }

    /// Wraps a synchronous callable.
    pub fn sync(f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        Hook::new(move || {
            let f = Arc::clone(&f);
            async move { f() }
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

impl Default for Hook {
    fn default() -> Self {
        Hook::new(|| async { Ok(()) })
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

/// File copied into the upload directory before the request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagedUpload {
    pub src: PathBuf,
    /// Destination relative to the upload directory.
    pub dest: PathBuf,
}

/// Uploaded file expected to match a reference image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedUpload {
    /// Path of the uploaded file, relative to the upload directory.
    pub filename: PathBuf,
    /// Reference image.
    pub original: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Mock {
    /// Rows inserted in order; each must be a JSON object.
    pub data: Vec<Value>,
    pub uploads: Option<Vec<StagedUpload>>,
}

#[derive(Debug, Clone, Default)]
pub struct Expectation {
    /// Rows compared positionally against the table sorted by `id`.
    /// `None` leaves the table's rows unchecked.
    pub data: Option<Vec<ExpectedRow>>,
    pub uploads: Option<Vec<ExpectedUpload>>,
}

/// Fixture and expectation for one table.
#[derive(Debug, Clone, Default)]
pub struct TableSpec {
    pub tablename: String,
    pub mock: Option<Mock>,
    pub result: Option<Expectation>,
}

impl TableSpec {
    pub fn new(tablename: impl Into<String>) -> Self {
        Self {
            tablename: tablename.into(),
            ..Default::default()
        }
    }

    pub fn mock_row(mut self, row: Value) -> Self {
        self.mock.get_or_insert_with(Mock::default).data.push(row);
        self
    }

    pub fn mock_rows(self, rows: impl IntoIterator<Item = Value>) -> Self {
        rows.into_iter().fold(self, TableSpec::mock_row)
    }

    pub fn stage_upload(mut self, src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        self.mock
            .get_or_insert_with(Mock::default)
            .uploads
            .get_or_insert_with(Vec::new)
            .push(StagedUpload {
                src: src.into(),
                dest: dest.into(),
            });
        self
    }

    pub fn expect_row(mut self, row: ExpectedRow) -> Self {
        self.result
            .get_or_insert_with(Expectation::default)
            .data
            .get_or_insert_with(Vec::new)
            .push(row);
        self
    }

    pub fn expect_rows(self, rows: impl IntoIterator<Item = ExpectedRow>) -> Self {
        rows.into_iter().fold(self, TableSpec::expect_row)
    }

    pub fn expect_upload(mut self, filename: impl Into<PathBuf>, original: impl Into<PathBuf>) -> Self {
        self.result
            .get_or_insert_with(Expectation::default)
            .uploads
            .get_or_insert_with(Vec::new)
            .push(ExpectedUpload {
                filename: filename.into(),
                original: original.into(),
            });
        self
    }

    pub(crate) fn staged_uploads(&self) -> &[StagedUpload] {
        self.mock
            .as_ref()
            .and_then(|mock| mock.uploads.as_deref())
            .unwrap_or(&[])
    }

    pub(crate) fn expected_uploads(&self) -> &[ExpectedUpload] {
        self.result
            .as_ref()
            .and_then(|result| result.uploads.as_deref())
            .unwrap_or(&[])
    }

    pub(crate) fn expected_rows(&self) -> Option<&[ExpectedRow]> {
        self.result.as_ref().and_then(|result| result.data.as_deref())
    }
}

/// One request/response/persisted-state scenario.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub url: String,
    pub method: HttpMethod,
    /// Required for every method but GET.
    pub reqformat: Option<RequestFormat>,
    /// Must be a JSON object when present.
    pub reqdata: Option<Value>,
    /// Files attached to a FORM request.
    pub uploads: Option<Uploads>,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    /// `None` skips the body assertion; `Some(Value::Null)` expects `null`.
    pub resdata: Option<Value>,
    pub db: Vec<TableSpec>,
    pub before: Hook,
    pub after: Hook,
}

impl TestCase {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            reqformat: None,
            reqdata: None,
            uploads: None,
            headers: BTreeMap::new(),
            status: 200,
            resdata: None,
            db: Vec::new(),
            before: Hook::default(),
            after: Hook::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    /// Sends `data` as a JSON body.
    pub fn json(self, data: Value) -> Self {
        self.reqformat(RequestFormat::Json).reqdata(data)
    }

    /// Sends `data` as form fields.
    pub fn form(self, data: Value) -> Self {
        self.reqformat(RequestFormat::Form).reqdata(data)
    }

    pub fn reqformat(mut self, format: RequestFormat) -> Self {
        self.reqformat = Some(format);
        self
    }

    pub fn reqdata(mut self, data: Value) -> Self {
        self.reqdata = Some(data);
        self
    }

    pub fn upload(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.uploads
            .get_or_insert_with(Uploads::new)
            .insert(field.into(), path.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn resdata(mut self, body: Value) -> Self {
        self.resdata = Some(body);
        self
    }

    pub fn table(mut self, table: TableSpec) -> Self {
        self.db.push(table);
        self
    }

    pub fn before(mut self, hook: Hook) -> Self {
        self.before = hook;
        self
    }

    pub fn after(mut self, hook: Hook) -> Self {
        self.after = hook;
        self
    }

    /// Human-readable name used in reports.
    pub fn title(&self) -> String {
        let mut title = format!("{} {} should return {}", self.method, self.url, self.status);
        if let Some(format) = self.reqformat {
            title.push_str(&format!(" (posting in {format} format)"));
        }
        title
    }
}
