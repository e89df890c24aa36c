use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Instant;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};

use crate::error::{BoxError, Error};

use super::method::HttpMethod;
use super::request::{FilePart, RequestBody};
use super::response::HttpResponse;

/// One outgoing request, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

/// Transport used to dispatch test requests.
///
/// Implementations perform no retries; redirects follow whatever the
/// underlying client does. A returned crate [`Error`] is reported as is;
/// anything else is treated as a transport failure.
pub trait HttpClient: Send + Sync {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, BoxError>> + Send + '_>>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        let headers = build_headers(&request.headers)?;
        let mut req_builder = self
            .client
            .request(request.method.into(), &request.url)
            .headers(headers);

        req_builder = match request.body {
            None => req_builder,
            Some(RequestBody::Json(raw)) => req_builder
                .header(CONTENT_TYPE, "application/json")
                .body(raw),
            Some(RequestBody::UrlEncoded(fields)) => req_builder.form(&fields),
            Some(RequestBody::Multipart { fields, files }) => {
                req_builder.multipart(multipart_form(fields, files).await?)
            }
        };

        let started = Instant::now();
        let response = req_builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let elapsed = started.elapsed().as_millis();

        Ok(HttpResponse {
            status,
            duration_ms: elapsed,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

impl HttpClient for ReqwestClient {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, BoxError>> + Send + '_>> {
        Box::pin(self.dispatch(request))
    }
}

async fn multipart_form(fields: Vec<(String, String)>, files: Vec<FilePart>) -> Result<Form, BoxError> {
    let mut form = Form::new();
    for (key, value) in fields {
        form = form.text(key, value);
    }
    for file in files {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| Error::io(&file.path, e))?;
        let part = Part::bytes(bytes).file_name(file_name(&file.path));
        form = form.part(file.field, part);
    }
    Ok(form)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Converts a string header map into a `HeaderMap`, rejecting invalid names
/// and values as configuration errors.
pub fn build_headers(input: &BTreeMap<String, String>) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| Error::configuration(format!("Invalid header name `{key}`: {err}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| Error::configuration(format!("Invalid header value for `{key}`: {err}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
