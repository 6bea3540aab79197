#![forbid(unsafe_code)]

//! Reuse merge: seed a freshly declared tree with a previous run's history.
//!
//! # Matching
//!
//! Target leaf suites are walked depth-first. Each (suite, browser) pairing
//! is matched against the source by exact equality of the suite path
//! segments and the browser name. Ids are never compared, so a source
//! recorded under a different id scheme still matches.
//!
//! # Copy
//!
//! A matched target browser's history is replaced by a copy of the source
//! browser's full history (every result and its images), with ids
//! re-derived for the target. The browser and all of its ancestor suites are
//! flagged `reused`, and each touched branch is re-aggregated.
//!
//! Merging the same source twice yields the same target. The source is only
//! ever read.

use std::collections::{HashMap, HashSet};

use tracing::{debug, debug_span, info, warn};

use crate::ids;
use crate::tree::{Browser, Image, ReportTree, Suite, TestResult};

const TARGET: &str = "shotreport.reuse";

/// Counters describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReuseReport {
    /// Target browsers that received history.
    pub matched_browsers: usize,
    /// Target browsers inspected, matched or not.
    pub visited_browsers: usize,
    pub copied_results: usize,
    pub copied_images: usize,
}

impl ReuseReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matched_browsers == 0
    }
}

impl ReportTree {
    /// Merge history from `source` into this tree.
    ///
    /// `None` is treated as an empty source: nothing changes and a warning
    /// is logged.
    pub fn merge_reuse(&mut self, source: Option<&ReportTree>) -> ReuseReport {
        let Some(source) = source else {
            warn!(target: TARGET, "no previous report to reuse; keeping declared statuses");
            return ReuseReport::default();
        };
        let _span = debug_span!(
            "tree.reuse",
            source_suites = source.suites.len(),
            target_suites = self.suites.len(),
        )
        .entered();

        let source_leaves: HashMap<&[String], &Suite> = source
            .suites
            .by_id
            .values()
            .filter(|suite| suite.is_leaf())
            .map(|suite| (suite.suite_path.as_slice(), suite))
            .collect();

        let mut report = ReuseReport::default();
        let mut touched_leaves = Vec::new();

        for leaf_id in self.leaf_suite_ids() {
            let Some(leaf) = self.suites.get(&leaf_id) else {
                continue;
            };
            let suite_path = leaf.suite_path.clone();
            let browser_ids = leaf.browsers.clone();
            report.visited_browsers += browser_ids.len();

            let Some(source_leaf) = source_leaves.get(suite_path.as_slice()) else {
                continue;
            };

            let mut leaf_reused = false;
            for browser_id in &browser_ids {
                let Some(name) = self.browsers.get(browser_id).map(|b| b.name.clone()) else {
                    continue;
                };
                let Some(source_browser) = find_source_browser(source, source_leaf, &name) else {
                    continue;
                };
                if source_browser.results.is_empty() {
                    continue;
                }
                let (results, images) = self.replace_history(browser_id, source, source_browser);
                report.matched_browsers += 1;
                report.copied_results += results;
                report.copied_images += images;
                leaf_reused = true;
                debug!(
                    target: TARGET,
                    suite = %ids::display_path(&suite_path),
                    browser = %name,
                    results,
                    images,
                    "browser history reused"
                );
            }

            if leaf_reused {
                touched_leaves.push(leaf_id);
            }
        }

        for leaf_id in &touched_leaves {
            self.mark_branch_reused(leaf_id);
            self.refresh_branch(leaf_id);
        }
        if !touched_leaves.is_empty() {
            self.rebuild_indexes();
        }

        info!(
            target: TARGET,
            matched = report.matched_browsers,
            visited = report.visited_browsers,
            results = report.copied_results,
            images = report.copied_images,
            "reuse merge finished"
        );
        report
    }

    /// Drop `browser_id`'s current history and copy `source_browser`'s in.
    fn replace_history(
        &mut self,
        browser_id: &str,
        source: &ReportTree,
        source_browser: &Browser,
    ) -> (usize, usize) {
        self.drop_history(browser_id);

        let mut copied_results = 0;
        let mut copied_images = 0;
        let mut result_ids = Vec::with_capacity(source_browser.results.len());
        let mut last_status = None;

        for source_result_id in &source_browser.results {
            let Some(source_result) = source.results.get(source_result_id) else {
                continue;
            };
            let result_id = match self.allocate_result_id(browser_id, source_result.attempt) {
                Ok((result_id, _)) => result_id,
                Err(err) => {
                    warn!(target: TARGET, result = %source_result.id, %err, "source result skipped");
                    continue;
                }
            };
            let mut image_ids = Vec::with_capacity(source_result.images.len());
            for source_image_id in &source_result.images {
                let Some(source_image) = source.images.get(source_image_id) else {
                    continue;
                };
                let image = Image {
                    id: ids::join_id(&result_id, &source_image.state_name),
                    parent_id: result_id.clone(),
                    ..source_image.clone()
                };
                image_ids.push(image.id.clone());
                self.insert_image(image);
                copied_images += 1;
            }
            self.insert_result(TestResult {
                id: result_id.clone(),
                parent_id: browser_id.to_string(),
                images: image_ids,
                ..source_result.clone()
            });
            last_status = Some(source_result.status);
            result_ids.push(result_id);
            copied_results += 1;
        }

        if let Some(browser) = self.browsers.by_id.get_mut(browser_id) {
            browser.results = result_ids;
            if let Some(status) = last_status {
                browser.status = status;
            }
            browser.skip_reason = source_browser.skip_reason.clone();
            browser.reused = true;
        }
        (copied_results, copied_images)
    }

    /// Remove every result (and image) currently held by `browser_id`.
    fn drop_history(&mut self, browser_id: &str) {
        let Some(browser) = self.browsers.by_id.get_mut(browser_id) else {
            return;
        };
        let old_results = std::mem::take(&mut browser.results);
        if old_results.is_empty() {
            return;
        }
        let mut old_images = HashSet::new();
        for result_id in &old_results {
            if let Some(result) = self.results.by_id.remove(result_id) {
                old_images.extend(result.images);
            }
        }
        for image_id in &old_images {
            self.images.by_id.remove(image_id);
        }
        let old_results: HashSet<String> = old_results.into_iter().collect();
        self.results.all_ids.retain(|id| !old_results.contains(id));
        self.results.failed_ids.retain(|id| !old_results.contains(id));
        self.images.all_ids.retain(|id| !old_images.contains(id));
        self.images.failed_ids.retain(|id| !old_images.contains(id));
    }
}

fn find_source_browser<'a>(
    source: &'a ReportTree,
    source_leaf: &Suite,
    name: &str,
) -> Option<&'a Browser> {
    source_leaf
        .browsers
        .iter()
        .filter_map(|id| source.browsers.get(id))
        .find(|browser| browser.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ImageInfo, SuitePath, TestAttempt};
    use crate::status::StatusKind;

    fn ingest(tree: &mut ReportTree, path: &[&str], browser: &str, n: u32, status: StatusKind) {
        let path = SuitePath::new(path.iter().copied()).unwrap();
        let attempt = TestAttempt::new(path, browser, n, status)
            .unwrap()
            .with_images(vec![ImageInfo::new("plain", status)])
            .unwrap();
        tree.ingest(attempt).unwrap();
    }

    fn declare(tree: &mut ReportTree, path: &[&str], browser: &str) {
        let path = SuitePath::new(path.iter().copied()).unwrap();
        tree.declare(&path, browser, StatusKind::Idle, None).unwrap();
    }

    #[test]
    fn missing_source_keeps_declared_statuses() {
        let mut target = ReportTree::new();
        declare(&mut target, &["s1"], "b1");
        let before = target.clone();

        let report = target.merge_reuse(None);
        assert!(report.is_empty());
        assert_eq!(target, before);
    }

    #[test]
    fn matched_browser_receives_full_history() {
        let mut source = ReportTree::new();
        ingest(&mut source, &["s1", "t"], "b1", 0, StatusKind::Fail);
        ingest(&mut source, &["s1", "t"], "b1", 1, StatusKind::Success);

        let mut target = ReportTree::new();
        declare(&mut target, &["s1", "t"], "b1");
        declare(&mut target, &["s1", "t"], "b2");

        let report = target.merge_reuse(Some(&source));
        assert_eq!(report.matched_browsers, 1);
        assert_eq!(report.copied_results, 2);
        assert_eq!(report.copied_images, 2);

        let history = target.browser_results(&["s1", "t"], "b1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, StatusKind::Fail);
        assert_eq!(history[1].status, StatusKind::Success);
        assert!(target.find_browser(&["s1", "t"], "b1").unwrap().reused);
        assert!(!target.find_browser(&["s1", "t"], "b2").unwrap().reused);
        assert!(target.find_suite(&["s1"]).unwrap().reused);
        assert_eq!(
            target.find_suite(&["s1", "t"]).unwrap().status,
            StatusKind::Success
        );
        assert!(target.check_consistency().is_empty());
    }

    #[test]
    fn unmatched_paths_are_untouched() {
        let mut source = ReportTree::new();
        ingest(&mut source, &["other"], "b1", 0, StatusKind::Fail);

        let mut target = ReportTree::new();
        declare(&mut target, &["s1"], "b1");
        let before = target.clone();

        assert!(target.merge_reuse(Some(&source)).is_empty());
        assert_eq!(target, before);
    }

    #[test]
    fn matching_ignores_source_ids() {
        let mut source = ReportTree::new();
        ingest(&mut source, &["s1"], "b1", 0, StatusKind::Fail);
        // Rewrite the source ids to a foreign scheme; matching must still work.
        let json = serde_json::to_string(&source)
            .unwrap()
            .replace('\u{1f}', "/")
            .replace("\\u001f", "/");
        let foreign: ReportTree = serde_json::from_str(&json).unwrap();

        let mut target = ReportTree::new();
        declare(&mut target, &["s1"], "b1");
        let report = target.merge_reuse(Some(&foreign));
        assert_eq!(report.matched_browsers, 1);
        assert_eq!(
            target.last_result(&["s1"], "b1").unwrap().id,
            ids::result_id(&["s1"], "b1", 0)
        );
        assert_eq!(target.find_suite(&["s1"]).unwrap().status, StatusKind::Fail);
    }

    #[test]
    fn merge_twice_equals_merge_once() {
        let mut source = ReportTree::new();
        ingest(&mut source, &["a", "x"], "b1", 0, StatusKind::Fail);
        ingest(&mut source, &["a", "x"], "b1", 1, StatusKind::Fail);
        ingest(&mut source, &["c"], "b2", 0, StatusKind::Success);

        let mut target = ReportTree::new();
        declare(&mut target, &["c"], "b2");
        declare(&mut target, &["a", "x"], "b1");
        let source_before = source.clone();

        target.merge_reuse(Some(&source));
        let once = target.clone();
        target.merge_reuse(Some(&source));

        assert_eq!(target, once);
        assert_eq!(source, source_before);
        assert_eq!(target.browser_results(&["a", "x"], "b1").len(), 2);
        assert!(target.check_consistency().is_empty());
    }

    #[test]
    fn long_target_history_is_replaced_exactly() {
        let mut target = ReportTree::new();
        for n in 0..2_000 {
            let status = if n % 2 == 0 { StatusKind::Fail } else { StatusKind::Success };
            ingest(&mut target, &["s1"], "b1", n, status);
        }
        ingest(&mut target, &["s2"], "b1", 0, StatusKind::Fail);

        let mut source = ReportTree::new();
        ingest(&mut source, &["s1"], "b1", 0, StatusKind::Success);

        let report = target.merge_reuse(Some(&source));
        assert_eq!(report.copied_results, 1);
        assert_eq!(target.results().len(), 2);
        assert_eq!(target.images().len(), 2);
        assert_eq!(
            target.results().failed_ids(),
            [ids::result_id(&["s2"], "b1", 0)]
        );
        assert_eq!(
            target.images().failed_ids(),
            [ids::image_id(&["s2"], "b1", 0, "plain")]
        );
        assert!(target.check_consistency().is_empty());
    }

    #[test]
    fn source_duplicate_at_highest_attempt_is_copied() {
        let mut source = ReportTree::new();
        ingest(&mut source, &["s1"], "b1", u32::MAX, StatusKind::Fail);
        ingest(&mut source, &["s1"], "b1", u32::MAX, StatusKind::Success);

        let mut target = ReportTree::new();
        declare(&mut target, &["s1"], "b1");
        let report = target.merge_reuse(Some(&source));

        assert_eq!(report.copied_results, 2);
        let history = target.browser_results(&["s1"], "b1");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|result| result.attempt == u32::MAX));
        assert_eq!(target.find_suite(&["s1"]).unwrap().status, StatusKind::Success);
    }
}
