//! Declarative REST API test cases: seed tables and upload fixtures, send a
//! request, then check the response and what the API persisted.

pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod storage;
pub mod testing;
pub mod visual;

pub use config::HarnessConfig;
pub use error::{Error, ErrorKind, Result};
pub use testing::{ExpectedRow, ExpectedValue, Harness, Hook, RunReport, TableSpec, TestCase, not};
