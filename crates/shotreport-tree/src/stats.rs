#![forbid(unsafe_code)]

//! Report-wide counters and the skipped-test list.
//!
//! Every browser entry counts as one test, classified by its current status
//! (the latest attempt, or the declared default). Retries are the extra
//! attempts beyond the first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids;
use crate::status::StatusKind;
use crate::tree::{Browser, ReportTree};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retries: usize,
    pub updated: usize,
}

impl StatCounts {
    fn record(&mut self, browser: &Browser) {
        self.total += 1;
        self.retries += browser.results.len().saturating_sub(1);
        match browser.status {
            StatusKind::Success => self.passed += 1,
            StatusKind::Fail | StatusKind::Error => self.failed += 1,
            StatusKind::Skipped => self.skipped += 1,
            StatusKind::Updated => self.updated += 1,
            StatusKind::Idle | StatusKind::Running | StatusKind::Queued => {}
        }
    }
}

/// Totals plus a per-browser-name breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    #[serde(flatten)]
    pub totals: StatCounts,
    pub per_browser: BTreeMap<String, StatCounts>,
}

/// One skipped browser entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub browser: String,
    /// Suite path joined with single spaces.
    pub suite: String,
    pub comment: Option<String>,
}

impl ReportTree {
    /// Count tests by current status.
    #[must_use]
    pub fn stats(&self) -> ReportStats {
        let mut stats = ReportStats::default();
        for browser in self.browsers.by_id.values() {
            stats.totals.record(browser);
            stats
                .per_browser
                .entry(browser.name.clone())
                .or_default()
                .record(browser);
        }
        stats
    }

    /// Skipped browser entries in tree order.
    #[must_use]
    pub fn skips(&self) -> Vec<SkipEntry> {
        self.browsers
            .all_ids
            .iter()
            .filter_map(|id| self.browsers.get(id))
            .filter(|browser| browser.status == StatusKind::Skipped)
            .map(|browser| SkipEntry {
                browser: browser.name.clone(),
                suite: self
                    .suites
                    .get(&browser.parent_id)
                    .map(|suite| ids::display_path(&suite.suite_path))
                    .unwrap_or_default(),
                comment: browser.skip_reason.clone(),
            })
            .collect()
    }
}
