pub mod client;
pub mod method;
pub mod request;
pub mod response;

pub use client::{HttpClient, HttpRequest, ReqwestClient};
pub use method::HttpMethod;
pub use request::{RequestBody, RequestData, RequestFormat, Uploads};
pub use response::HttpResponse;
