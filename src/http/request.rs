use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::method::HttpMethod;

/// Request payload fields, name to scalar or sequence of scalars.
pub type RequestData = Map<String, Value>;

/// Form field name to local file path.
pub type Uploads = BTreeMap<String, PathBuf>;

/// Wire encoding of the request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RequestFormat {
    Json,
    Form,
}

impl Display for RequestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestFormat::Json => "JSON",
            RequestFormat::Form => "FORM",
        };
        write!(f, "{label}")
    }
}

impl FromStr for RequestFormat {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "JSON" => Ok(RequestFormat::Json),
            "FORM" => Ok(RequestFormat::Form),
            _ => Err(Error::configuration(format!(
                "unrecognized request format `{raw}` (expected JSON or FORM)"
            ))),
        }
    }
}

impl TryFrom<String> for RequestFormat {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<RequestFormat> for String {
    fn from(format: RequestFormat) -> Self {
        format.to_string()
    }
}

/// A file attached to a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub path: PathBuf,
}

/// Wire-ready request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(String),
    UrlEncoded(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<FilePart>,
    },
}

impl RequestBody {
    pub fn content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::UrlEncoded(_) => "application/x-www-form-urlencoded",
            RequestBody::Multipart { .. } => "multipart/form-data",
        }
    }

    /// Text fields of a form body, `None` for JSON.
    pub fn form_fields(&self) -> Option<&[(String, String)]> {
        match self {
            RequestBody::Json(_) => None,
            RequestBody::UrlEncoded(fields) | RequestBody::Multipart { fields, .. } => Some(fields),
        }
    }
}

/// Builds the body for a non-GET request.
///
/// GET requests never carry a body; asking for one is a configuration error,
/// as is a missing payload, a missing format, or file uploads combined with
/// JSON. Sequence-valued form fields are joined with `,` into one field.
pub fn build_body(
    method: HttpMethod,
    reqdata: Option<&RequestData>,
    reqformat: Option<RequestFormat>,
    uploads: Option<&Uploads>,
) -> Result<RequestBody> {
    if method == HttpMethod::Get {
        return Err(Error::configuration(
            "GET requests carry no body; put parameters in the url",
        ));
    }
    let reqdata = reqdata
        .ok_or_else(|| Error::configuration(format!("{method} request requires reqdata")))?;
    let reqformat = reqformat
        .ok_or_else(|| Error::configuration(format!("{method} request requires a reqformat")))?;

    match reqformat {
        RequestFormat::Json => {
            if uploads.is_some() {
                return Err(Error::configuration(
                    "uploads cannot be sent with the JSON request format",
                ));
            }
            let raw = serde_json::to_string(reqdata).map_err(|e| {
                Error::configuration(format!("reqdata is not serializable as JSON: {e}"))
            })?;
            Ok(RequestBody::Json(raw))
        }
        RequestFormat::Form => {
            let fields: Vec<(String, String)> = reqdata
                .iter()
                .map(|(key, value)| (key.clone(), form_value(value)))
                .collect();

            let Some(uploads) = uploads else {
                return Ok(RequestBody::UrlEncoded(fields));
            };

            let files = if method.carries_files() {
                uploads
                    .iter()
                    .map(|(field, path)| FilePart {
                        field: field.clone(),
                        path: path.clone(),
                    })
                    .collect()
            } else {
                tracing::warn!(%method, count = uploads.len(), "file uploads are only attached to POST and PUT");
                Vec::new()
            };
            Ok(RequestBody::Multipart { fields, files })
        }
    }
}

/// Renders one form value. Strings pass through, sequences are joined with
/// `,`, other values use their JSON text.
fn form_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(form_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}
