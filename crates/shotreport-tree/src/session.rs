#![forbid(unsafe_code)]

//! Report session: one tree, one writer.
//!
//! A session is seeded once from the declared collection (plus, optionally,
//! the previous run's snapshot), then fed runner events one at a time. The
//! transport layer reads consistent state through [`ReportSession::snapshot`].
//!
//! ```text
//! seed:   declare collection -> reuse merge -> sort pass
//! run:    mark_*_begin / ingest_event ... (per event, O(depth) aggregation)
//! read:   snapshot / stats / skips
//! ```

use tracing::{debug, debug_span, info, warn};

use crate::collection::TestCollection;
use crate::config::{ConfigError, TreeConfig};
use crate::error::{Result, TreeError};
use crate::event::{RawTestEvent, TestAttempt};
use crate::reuse::ReuseReport;
use crate::stats::{ReportStats, SkipEntry};
use crate::status::StatusKind;
use crate::tree::ReportTree;

const TARGET: &str = "shotreport.session";

/// Outcome of [`ReportSession::seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Browser entries declared from the collection.
    pub declared: usize,
    /// Pairings skipped because the tree or the depth limit refused them.
    pub rejected: usize,
    pub reuse: ReuseReport,
    pub sorted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReportSession {
    tree: ReportTree,
    config: TreeConfig,
}

impl ReportSession {
    /// Session with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with `config`, rejected when it does not validate.
    pub fn with_config(config: TreeConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            tree: ReportTree::new(),
            config: config.validated()?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub fn tree(&self) -> &ReportTree {
        &self.tree
    }

    #[must_use]
    pub fn into_tree(self) -> ReportTree {
        self.tree
    }

    /// Declare `collection`, merge `previous` history and sort.
    ///
    /// Tests deeper than `ingest.max_suite_depth`, or whose path clashes
    /// with an already declared suite, are skipped with a warning. Reuse is
    /// skipped when disabled in the config. Sorting follows
    /// `reuse.sort_after_merge`.
    pub fn seed(
        &mut self,
        collection: &TestCollection,
        previous: Option<&ReportTree>,
    ) -> SeedSummary {
        let _span = debug_span!(
            "session.seed",
            tests = collection.test_count(),
            has_previous = previous.is_some(),
        )
        .entered();

        let declared = collection
            .declare_into_with_depth_limit(&mut self.tree, self.config.ingest.max_suite_depth);
        let reuse = if self.config.reuse.enabled {
            self.tree.merge_reuse(previous)
        } else {
            if previous.is_some() {
                debug!(target: TARGET, "reuse disabled; previous report ignored");
            }
            ReuseReport::default()
        };
        let sorted = self.config.reuse.sort_after_merge;
        if sorted {
            self.tree.sort();
        }

        info!(
            target: TARGET,
            declared = declared.declared,
            rejected = declared.rejected,
            reused = reuse.matched_browsers,
            sorted,
            "session seeded"
        );
        SeedSummary {
            declared: declared.declared,
            rejected: declared.rejected,
            reuse,
            sorted,
        }
    }

    /// Ingest a validated attempt, enforcing the configured depth limit.
    pub fn ingest(&mut self, attempt: TestAttempt) -> Result<String> {
        let depth = attempt.path().depth();
        let limit = self.config.ingest.max_suite_depth;
        if depth > limit {
            warn!(target: TARGET, depth, limit, "event rejected: suite path too deep");
            return Err(TreeError::malformed(format!(
                "suite path depth {depth} exceeds limit {limit}"
            )));
        }
        self.tree.ingest(attempt)
    }

    /// Validate and ingest a raw runner event.
    pub fn ingest_event(&mut self, event: RawTestEvent) -> Result<String> {
        let attempt = TestAttempt::try_from(event).inspect_err(|err| {
            warn!(target: TARGET, error = %err, "event rejected");
        })?;
        self.ingest(attempt)
    }

    /// Decode a JSON runner event and ingest it.
    pub fn ingest_json(&mut self, payload: &str) -> Result<String> {
        let event: RawTestEvent = serde_json::from_str(payload)?;
        self.ingest_event(event)
    }

    pub fn mark_test_begin<S: AsRef<str>>(&mut self, path: &[S], browser: &str) -> bool {
        self.tree.mark_test_begin(path, browser, StatusKind::Running)
    }

    pub fn mark_suite_begin<S: AsRef<str>>(&mut self, path: &[S]) -> bool {
        self.tree.mark_suite_begin(path, StatusKind::Running)
    }

    /// Queue every suite and browser for a full re-run.
    pub fn run_all(&mut self) {
        self.tree.set_status_to_all(StatusKind::Queued);
    }

    pub fn sort(&mut self) {
        self.tree.sort();
    }

    /// Clone of the current tree for the transport boundary.
    #[must_use]
    pub fn snapshot(&self) -> ReportTree {
        self.tree.clone()
    }

    /// JSON form of [`snapshot`](Self::snapshot).
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.tree)?)
    }

    #[must_use]
    pub fn stats(&self) -> ReportStats {
        self.tree.stats()
    }

    #[must_use]
    pub fn skips(&self) -> Vec<SkipEntry> {
        self.tree.skips()
    }
}
