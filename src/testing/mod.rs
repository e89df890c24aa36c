//! Declarative request/response/persisted-state test cases.
//!
//! A [`TestCase`] describes a request, the fixture rows and files to put in
//! place before it, and what the response and the tables should look like
//! afterwards. [`Harness::test`] runs a batch of them and returns a
//! [`RunReport`].

pub mod assert;
pub mod case;
pub mod expect;
pub mod file;
pub mod fixture;
pub mod normalize;
pub mod report;
pub mod runner;

pub use case::{Expectation, ExpectedUpload, Hook, Mock, StagedUpload, TableSpec, TestCase};
pub use expect::{ExpectedRow, ExpectedValue, not};
pub use file::{load_cases, parse_cases};
pub use report::{CaseOutcome, RunReport};
pub use runner::Harness;
