//! Test cases declared in JSON files.
//!
//! A file holds one case object or an array of them. `db`, `mock.data`,
//! `mock.uploads`, `result.data` and `result.uploads` each accept a single
//! item or an array. Expected values use `{"$not": ...}` for negation;
//! predicates and hooks are only available from Rust.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::http::{HttpMethod, RequestFormat, Uploads};

use super::case::{Expectation, ExpectedUpload, Mock, StagedUpload, TableSpec, TestCase};
use super::expect::ExpectedRow;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseDef {
    url: String,
    method: HttpMethod,
    #[serde(default)]
    reqformat: Option<RequestFormat>,
    #[serde(default)]
    reqdata: Option<Value>,
    #[serde(default)]
    uploads: Option<Uploads>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default, deserialize_with = "present")]
    resdata: Option<Value>,
    #[serde(default)]
    db: Option<OneOrMany<TableDef>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableDef {
    tablename: String,
    #[serde(default)]
    mock: Option<MockDef>,
    #[serde(default)]
    result: Option<ResultDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MockDef {
    #[serde(default)]
    data: Option<OneOrMany<Value>>,
    #[serde(default)]
    uploads: Option<OneOrMany<StagedUpload>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResultDef {
    #[serde(default)]
    data: Option<OneOrMany<Value>>,
    #[serde(default)]
    uploads: Option<OneOrMany<ExpectedUpload>>,
}

fn default_status() -> u16 {
    200
}

/// Keeps an explicit `null` distinct from an absent key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

pub fn load_cases(path: impl AsRef<Path>) -> Result<Vec<TestCase>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_cases(&raw).map_err(|e| match e {
        Error::Configuration(message) => {
            Error::configuration(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}

pub fn parse_cases(raw: &str) -> Result<Vec<TestCase>> {
    let defs: OneOrMany<CaseDef> = serde_json::from_str(raw)
        .map_err(|e| Error::configuration(format!("invalid test case file: {e}")))?;
    defs.into_vec().into_iter().map(CaseDef::into_case).collect()
}

impl CaseDef {
    fn into_case(self) -> Result<TestCase> {
        let mut case = TestCase::new(self.method, self.url).status(self.status);
        case.reqformat = self.reqformat;
        case.reqdata = self.reqdata;
        case.uploads = self.uploads;
        case.headers = self.headers;
        case.resdata = self.resdata;
        case.db = self
            .db
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(TableDef::into_spec)
            .collect::<Result<_>>()?;
        Ok(case)
    }
}

impl TableDef {
    fn into_spec(self) -> Result<TableSpec> {
        let mock = self.mock.map(|mock| Mock {
            data: mock.data.map(OneOrMany::into_vec).unwrap_or_default(),
            uploads: mock.uploads.map(OneOrMany::into_vec),
        });
        let result = match self.result {
            Some(result) => Some(Expectation {
                data: result
                    .data
                    .map(|rows| {
                        rows.into_vec()
                            .into_iter()
                            .map(ExpectedRow::from_json)
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?,
                uploads: result.uploads.map(OneOrMany::into_vec),
            }),
            None => None,
        };
        Ok(TableSpec {
            tablename: self.tablename,
            mock,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::expect::ExpectedValue;
    use serde_json::json;

    #[test]
    fn single_case_with_scalar_collections() {
        let cases = parse_cases(
            r#"{
                "url": "/items",
                "method": "get",
                "db": {
                    "tablename": "items",
                    "mock": { "data": { "id": 1 } },
                    "result": { "data": { "id": { "$not": 2 } } }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.method, HttpMethod::Get);
        assert_eq!(case.status, 200);
        assert!(case.resdata.is_none());
        assert_eq!(case.db[0].mock.as_ref().unwrap().data, vec![json!({ "id": 1 })]);

        let expected = case.db[0].result.as_ref().unwrap().data.as_ref().unwrap();
        assert!(matches!(
            expected[0].fields()[0].1,
            ExpectedValue::Not(ref values) if values == &vec![json!(2)]
        ));
    }

    #[test]
    fn array_of_cases_keeps_order() {
        let cases = parse_cases(
            r#"[
                { "url": "/a", "method": "GET", "db": [] },
                { "url": "/b", "method": "POST", "reqformat": "FORM",
                  "reqdata": { "tags": ["x", "y"] }, "status": 201,
                  "uploads": { "avatar": "fixtures/a.png" },
                  "headers": { "authorization": "Bearer t" },
                  "db": [{ "tablename": "users" }] }
            ]"#,
        )
        .unwrap();

        assert_eq!(cases.iter().map(|c| c.url.as_str()).collect::<Vec<_>>(), ["/a", "/b"]);
        let post = &cases[1];
        assert_eq!(post.reqformat, Some(RequestFormat::Form));
        assert_eq!(post.status, 201);
        assert_eq!(post.headers["authorization"], "Bearer t");
        assert_eq!(post.uploads.as_ref().unwrap()["avatar"], Path::new("fixtures/a.png"));
        assert_eq!(post.title(), "POST /b should return 201 (posting in FORM format)");
    }

    #[test]
    fn explicit_null_resdata_is_asserted() {
        let cases = parse_cases(r#"{ "url": "/a", "method": "DELETE", "resdata": null }"#).unwrap();
        assert_eq!(cases[0].resdata, Some(Value::Null));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_cases(r#"{ "url": "/a", "method": "GET", "reqbody": {} }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(parse_cases(r#"{ "url": "/a", "method": "FETCH" }"#).is_err());
    }

    #[test]
    fn uploads_accept_one_or_many() {
        let cases = parse_cases(
            r#"{
                "url": "/a", "method": "GET",
                "db": {
                    "tablename": "photos",
                    "mock": { "uploads": { "src": "fixtures/a.png", "dest": "a.png" } },
                    "result": { "uploads": [
                        { "filename": "a.png", "original": "fixtures/a.png" },
                        { "filename": "b.png", "original": "fixtures/b.png" }
                    ] }
                }
            }"#,
        )
        .unwrap();
        let table = &cases[0].db[0];
        assert_eq!(table.staged_uploads().len(), 1);
        assert_eq!(table.expected_uploads().len(), 2);
        assert!(table.expected_rows().is_none());
    }

    #[test]
    fn non_object_expected_row_is_rejected() {
        let err = parse_cases(
            r#"{ "url": "/a", "method": "GET",
                 "db": { "tablename": "t", "result": { "data": [1] } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected row must be an object"));
    }

    #[test]
    fn load_cases_names_the_file_on_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cases.json");
        std::fs::write(&path, "{").unwrap();
        let err = load_cases(&path).unwrap_err();
        assert!(err.to_string().contains("cases.json"));
    }
}
