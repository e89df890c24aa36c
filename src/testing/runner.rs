//! Test-case execution.
//!
//! Each case runs through a fixed sequence of states:
//!
//! ```text
//! normalize -> reset -> before hook -> seed -> dispatch
//!           -> assert response -> assert state -> after hook
//! ```
//!
//! A failure skips the remaining states. Tables and staged files are left
//! as they are for inspection. The after hook still runs once the before
//! hook has succeeded, and its failure is attached to (never substituted
//! for) an earlier one.

use std::sync::Arc;
use std::time::Instant;

use crate::config::HarnessConfig;
use crate::error::{Error, HookStage, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient, RequestBody};
use crate::storage::{SqliteStorage, Storage};
use crate::visual::{ImageComparator, PixelComparator};

use super::assert::{StateAsserter, assert_response};
use super::case::TestCase;
use super::fixture::FixtureController;
use super::normalize::{NormalizedCase, normalize};
use super::report::{CaseOutcome, RunReport};

/// Runs test cases against one API endpoint and one storage backend.
///
/// Cases run strictly one after another: every case resets the tables it
/// touches, so running two at once would race.
#[derive(Clone)]
pub struct Harness {
    config: HarnessConfig,
    http: Arc<dyn HttpClient>,
    storage: Option<Arc<dyn Storage>>,
    comparator: Arc<dyn ImageComparator>,
}

impl Harness {
    /// Validates `config` and opens storage when the `db` group is present.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let storage = match config.validate()? {
            Some(db) => {
                let storage = SqliteStorage::connect(&db).map_err(|e| {
                    Error::configuration(format!("cannot open database `{}`: {e}", db.name))
                })?;
                Some(Arc::new(storage) as Arc<dyn Storage>)
            }
            None => None,
        };
        tracing::debug!(endpoint = %config.endpoint, storage = storage.is_some(), "harness ready");

        Ok(Self {
            config,
            http: Arc::new(ReqwestClient::new()),
            storage,
            comparator: Arc::new(PixelComparator::default()),
        })
    }

    pub fn with_http_client(mut self, http: impl HttpClient + 'static) -> Self {
        self.http = Arc::new(http);
        self
    }

    /// Replaces the storage opened from configuration, if any.
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn with_comparator(mut self, comparator: impl ImageComparator + 'static) -> Self {
        self.comparator = Arc::new(comparator);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs every case in order and reports one outcome per case. A failing
    /// case never stops the batch.
    ///
    /// A single case can be passed as `[case]`.
    pub async fn test(&self, cases: impl IntoIterator<Item = TestCase>) -> RunReport {
        let mut report = RunReport::default();
        for case in cases {
            let title = case.title();
            tracing::info!(case = %title, "running");
            let started = Instant::now();
            let result = self.run_case(&case).await;
            let duration_ms = started.elapsed().as_millis();

            match &result {
                Ok(()) => tracing::info!(case = %title, duration_ms, "passed"),
                Err(err) => tracing::error!(case = %title, duration_ms, error = %err, "failed"),
            }
            report.push(CaseOutcome {
                title,
                duration_ms,
                result,
            });
        }
        report
    }

    /// Runs one case through every state.
    pub async fn run_case(&self, case: &TestCase) -> Result<()> {
        let normalized = normalize(case, &self.config, self.storage.is_some())?;
        let storage = self
            .storage
            .as_deref()
            .ok_or_else(|| Error::configuration("no storage is configured"))?;
        let fixtures = FixtureController::new(storage, normalized.upload_dir);

        tracing::debug!(url = %normalized.url, "reset");
        fixtures.reset(&normalized.table_names()).await?;

        tracing::debug!("before hook");
        case.before.run().await.map_err(|source| Error::Hook {
            stage: HookStage::Before,
            source,
        })?;

        let outcome = self.exercise(case, &normalized, storage, &fixtures).await;

        tracing::debug!("after hook");
        let cleanup = case.after.run().await.map_err(|source| Error::Hook {
            stage: HookStage::After,
            source,
        });

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(primary), Err(later)) => Err(primary.followed_by(later)),
        }
    }

    /// Seed, dispatch and both assertion states.
    async fn exercise(
        &self,
        case: &TestCase,
        normalized: &NormalizedCase<'_>,
        storage: &dyn Storage,
        fixtures: &FixtureController<'_>,
    ) -> Result<()> {
        tracing::debug!(tables = normalized.tables.len(), "seed");
        fixtures.seed(&normalized.tables).await?;

        let response = self.dispatch(case, normalized).await?;

        tracing::debug!(status = response.status, "assert response");
        assert_response(&response, case.status, case.resdata.as_ref())?;

        tracing::debug!("assert state");
        StateAsserter::new(
            storage,
            self.comparator.as_ref(),
            normalized.upload_dir,
            normalized.log_dir,
        )
        .assert_tables(&normalized.tables)
        .await
    }

    async fn dispatch(&self, case: &TestCase, normalized: &NormalizedCase<'_>) -> Result<HttpResponse> {
        let request = HttpRequest {
            method: case.method,
            url: normalized.url.clone(),
            headers: case.headers.clone(),
            body: normalized.body.clone(),
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            content_type = ?request.body.as_ref().map(RequestBody::content_type),
            "dispatch"
        );
        let response = self
            .http
            .send(request)
            .await
            .map_err(|source| match source.downcast::<Error>() {
                Ok(err) => *err,
                Err(source) => Error::Transport {
                    method: case.method,
                    url: normalized.url.clone(),
                    source,
                },
            })?;
        tracing::debug!(status = response.status, duration_ms = response.duration_ms, "response received");
        Ok(response)
    }
}
