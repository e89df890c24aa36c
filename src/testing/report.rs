//! Per-case outcomes and batch summaries.

use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// Result of one test case.
#[derive(Debug)]
pub struct CaseOutcome {
    pub title: String,
    pub duration_ms: u128,
    pub result: Result<(), Error>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary report for a batch run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub outcomes: Vec<CaseOutcome>,
}

/// Serializable view of one outcome.
#[derive(Debug, Serialize)]
pub struct OutcomeRecord<'a> {
    pub title: &'a str,
    pub passed: bool,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportRecord<'a> {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub outcomes: Vec<OutcomeRecord<'a>>,
}

impl RunReport {
    pub fn push(&mut self, outcome: CaseOutcome) {
        self.total += 1;
        if outcome.passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.duration_ms += outcome.duration_ms;
        self.outcomes.push(outcome);
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} total in {}ms",
            self.passed, self.failed, self.total, self.duration_ms
        )
    }

    /// One line per case, failure messages indented beneath, then a summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(()) => out.push_str(&format!("ok      {}\n", outcome.title)),
                Err(err) => {
                    out.push_str(&format!("FAILED  {}\n", outcome.title));
                    for line in err.to_string().lines() {
                        out.push_str(&format!("        {line}\n"));
                    }
                }
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }

    pub fn record(&self) -> ReportRecord<'_> {
        ReportRecord {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            duration_ms: self.duration_ms,
            outcomes: self
                .outcomes
                .iter()
                .map(|outcome| OutcomeRecord {
                    title: &outcome.title,
                    passed: outcome.passed(),
                    duration_ms: outcome.duration_ms,
                    kind: outcome.result.as_ref().err().map(Error::kind),
                    message: outcome.result.as_ref().err().map(ToString::to_string),
                })
                .collect(),
        }
    }

    /// Panics listing every failed case. Lets a `#[tokio::test]` hand the
    /// verdict to the test harness.
    pub fn assert_all_passed(&self) {
        if self.is_success() {
            return;
        }
        let details: Vec<String> = self
            .failures()
            .map(|outcome| match &outcome.result {
                Err(err) => format!("{}\n    {err}", outcome.title),
                Ok(()) => outcome.title.clone(),
            })
            .collect();
        panic!("{} test case(s) failed:\n{}", self.failed, details.join("\n"));
    }
}
