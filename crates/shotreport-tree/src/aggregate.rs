#![forbid(unsafe_code)]

//! Bottom-up status aggregation along one branch.
//!
//! A leaf suite folds the current status of each of its browsers (which is
//! the latest attempt's status, so a passing retry overrides earlier
//! failures). Every ancestor folds its immediate child suites' statuses,
//! never re-scanning grandchildren. One refresh touches O(depth) suites.

use crate::status::{StatusKind, reduce_statuses};
use crate::tree::{ReportTree, Suite, sync_failed};

impl ReportTree {
    /// Status `suite` should carry given its children's current statuses.
    #[must_use]
    pub fn computed_suite_status(&self, suite: &Suite) -> StatusKind {
        if suite.is_leaf() {
            reduce_statuses(
                suite
                    .browsers
                    .iter()
                    .filter_map(|id| self.browsers.get(id))
                    .map(|browser| browser.status),
            )
        } else {
            reduce_statuses(
                suite
                    .suites
                    .iter()
                    .filter_map(|id| self.suites.get(id))
                    .map(|child| child.status),
            )
        }
    }

    /// Recompute `suite_id` and every ancestor up to its root.
    ///
    /// Returns the number of suites visited.
    pub(crate) fn refresh_branch(&mut self, suite_id: &str) -> usize {
        let mut touched = 0;
        let mut current = Some(suite_id.to_string());
        while let Some(id) = current {
            let Some(suite) = self.suites.get(&id) else {
                break;
            };
            let status = self.computed_suite_status(suite);
            current = suite.parent_id.clone();
            self.set_suite_status(&id, status);
            touched += 1;
        }
        touched
    }

    /// Set a suite's status and keep the failed-id lists in step.
    pub(crate) fn set_suite_status(&mut self, suite_id: &str, status: StatusKind) {
        let Some(suite) = self.suites.by_id.get_mut(suite_id) else {
            return;
        };
        suite.status = status;
        let root = suite.root;
        let failed = status.is_failed();
        sync_failed(&mut self.suites.failed_ids, suite_id, failed);
        if root {
            sync_failed(&mut self.suites.failed_root_ids, suite_id, failed);
        }
    }

    /// Mark `suite_id` and its ancestors as holding reused history.
    pub(crate) fn mark_branch_reused(&mut self, suite_id: &str) {
        let mut current = Some(suite_id.to_string());
        while let Some(id) = current {
            let Some(suite) = self.suites.by_id.get_mut(&id) else {
                break;
            };
            suite.reused = true;
            current = suite.parent_id.clone();
        }
    }
}
