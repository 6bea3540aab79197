#![forbid(unsafe_code)]

//! Tree builder: upserts entities for one event at a time.
//!
//! # Ingest walk
//!
//! ```text
//! suitePath [a, b, c]  ->  suite a (root) -> suite a/b -> suite a/b/c (leaf)
//!                                                          └─ browser
//!                                                             └─ result (always appended)
//!                                                                └─ images (descriptor order)
//! ```
//!
//! Shape checks run before the first write, so a rejected event leaves the
//! tree untouched. After the write, only the leaf-to-root branch is
//! re-aggregated.

use tracing::{debug, debug_span, warn};

use crate::error::{Result, TreeError};
use crate::event::{SuitePath, TestAttempt, validate_browser_name};
use crate::ids;
use crate::status::StatusKind;
use crate::tree::{Browser, Image, ReportTree, Suite, TestResult, push_unique};

const TARGET: &str = "shotreport.tree";

impl ReportTree {
    /// Ingest one validated test attempt.
    ///
    /// Returns the id of the appended result. Ingesting the same
    /// (path, browser, attempt) twice appends a second result; the duplicate
    /// is stored under the next free attempt slot so ids stay unique.
    pub fn ingest(&mut self, attempt: TestAttempt) -> Result<String> {
        let TestAttempt {
            path,
            browser,
            attempt,
            status,
            images,
            meta,
        } = attempt;

        let _span = debug_span!(
            "tree.ingest",
            suite = %ids::display_path(path.segments()),
            browser = %browser,
            attempt,
            status = %status,
        )
        .entered();

        self.check_shape(&path)?;
        let (result_id, duplicate) =
            self.allocate_result_id(&ids::browser_id(path.segments(), &browser), attempt)?;
        let leaf_id = self.upsert_suite_chain(&path);
        let browser_id = self.upsert_browser(&leaf_id, &browser);

        if duplicate {
            warn!(
                target: TARGET,
                suite = %ids::display_path(path.segments()),
                browser = %browser,
                attempt,
                stored_as = %result_id,
                "duplicate attempt appended as a separate result"
            );
        }

        let image_count = images.len();
        let mut image_ids = Vec::with_capacity(image_count);
        for info in images {
            let image = Image::from_info(&result_id, info);
            image_ids.push(image.id.clone());
            self.insert_image(image);
        }

        self.insert_result(TestResult {
            id: result_id.clone(),
            parent_id: browser_id.clone(),
            attempt,
            status,
            images: image_ids,
            meta,
        });

        if let Some(entry) = self.browsers.by_id.get_mut(&browser_id) {
            entry.results.push(result_id.clone());
            entry.status = status;
        }

        let touched = self.refresh_branch(&leaf_id);
        debug!(
            target: TARGET,
            result_id = %result_id,
            images = image_count,
            touched,
            "attempt ingested"
        );
        Ok(result_id)
    }

    /// Declare a (suite, browser) pairing without executing it.
    ///
    /// The browser gets `status` (normally `idle`, or `skipped` for pending
    /// tests) as long as it has no results yet. Returns the browser id.
    pub fn declare(
        &mut self,
        path: &SuitePath,
        browser: &str,
        status: StatusKind,
        skip_reason: Option<String>,
    ) -> Result<String> {
        validate_browser_name(browser)?;
        let _span = debug_span!(
            "tree.declare",
            suite = %ids::display_path(path.segments()),
            browser = %browser,
            status = %status,
        )
        .entered();

        self.check_shape(path)?;
        let leaf_id = self.upsert_suite_chain(path);
        let browser_id = self.upsert_browser(&leaf_id, browser);
        if let Some(entry) = self.browsers.by_id.get_mut(&browser_id)
            && entry.results.is_empty()
        {
            entry.status = status;
            entry.skip_reason = skip_reason;
        }
        self.refresh_branch(&leaf_id);
        Ok(browser_id)
    }

    /// Mark a test as started (usually `running`). Returns `false` for an
    /// unknown pairing.
    pub fn mark_test_begin<S: AsRef<str>>(
        &mut self,
        path: &[S],
        browser: &str,
        status: StatusKind,
    ) -> bool {
        let Some(found) = self.find_browser(path, browser) else {
            return false;
        };
        let (browser_id, leaf_id) = (found.id.clone(), found.parent_id.clone());
        if let Some(entry) = self.browsers.by_id.get_mut(&browser_id) {
            entry.status = status;
        }
        self.refresh_branch(&leaf_id);
        debug!(target: TARGET, browser_id = %browser_id, status = %status, "test begin");
        true
    }

    /// Mark a suite as started. Ancestors are re-aggregated; the suite's own
    /// status holds until the next event below it recomputes the branch.
    pub fn mark_suite_begin<S: AsRef<str>>(&mut self, path: &[S], status: StatusKind) -> bool {
        let Some(found) = self.find_suite(path) else {
            return false;
        };
        let (suite_id, parent_id) = (found.id.clone(), found.parent_id.clone());
        self.set_suite_status(&suite_id, status);
        if let Some(parent_id) = parent_id {
            self.refresh_branch(&parent_id);
        }
        debug!(target: TARGET, suite_id = %suite_id, status = %status, "suite begin");
        true
    }

    /// Set every suite and browser to `status` (e.g. `queued` when a full
    /// run starts). Recorded results keep their statuses.
    pub fn set_status_to_all(&mut self, status: StatusKind) {
        let failed = status.is_failed();
        for suite in self.suites.by_id.values_mut() {
            suite.status = status;
        }
        for browser in self.browsers.by_id.values_mut() {
            browser.status = status;
        }
        self.suites.failed_ids = if failed {
            self.suites.all_ids.clone()
        } else {
            Vec::new()
        };
        self.suites.failed_root_ids = if failed {
            self.suites.all_root_ids.clone()
        } else {
            Vec::new()
        };
        debug!(
            target: TARGET,
            status = %status,
            suites = self.suites.len(),
            browsers = self.browsers.len(),
            "status applied to all"
        );
    }

    // ── internals ───────────────────────────────────────────────────────

    /// Reject paths that would turn a leaf suite into an internal one or
    /// the reverse.
    fn check_shape(&self, path: &SuitePath) -> Result<()> {
        let segments = path.segments();
        let last = segments.len() - 1;
        let mut id = String::new();
        for (depth, segment) in segments.iter().enumerate() {
            id = if depth == 0 {
                segment.clone()
            } else {
                ids::join_id(&id, segment)
            };
            let Some(suite) = self.suites.get(&id) else {
                // Nothing deeper can exist below a missing suite.
                return Ok(());
            };
            if depth < last && suite.is_leaf() {
                return Err(TreeError::shape_conflict(
                    ids::display_path(&segments[..=depth]),
                    "suite already holds browsers and cannot gain child suites",
                ));
            }
            if depth == last && suite.is_internal() {
                return Err(TreeError::shape_conflict(
                    ids::display_path(segments),
                    "suite already has child suites and cannot hold browsers",
                ));
            }
        }
        Ok(())
    }

    /// Create any missing suites along `path`; returns the leaf suite id.
    fn upsert_suite_chain(&mut self, path: &SuitePath) -> String {
        let segments = path.segments();
        let mut parent_id: Option<String> = None;
        for depth in 1..=segments.len() {
            let suite = Suite::new(&segments[..depth], parent_id.clone());
            let id = suite.id.clone();
            if !self.suites.by_id.contains_key(&id) {
                match &parent_id {
                    Some(parent) => {
                        if let Some(parent) = self.suites.by_id.get_mut(parent) {
                            push_unique(&mut parent.suites, &id);
                        }
                    }
                    None => {
                        push_unique(&mut self.suites.all_root_ids, &id);
                    }
                }
                self.suites.all_ids.push(id.clone());
                self.suites.by_id.insert(id.clone(), suite);
            }
            parent_id = Some(id);
        }
        path.id()
    }

    fn upsert_browser(&mut self, leaf_id: &str, name: &str) -> String {
        let id = ids::join_id(leaf_id, name);
        if !self.browsers.by_id.contains_key(&id) {
            if let Some(leaf) = self.suites.by_id.get_mut(leaf_id) {
                push_unique(&mut leaf.browsers, &id);
            }
            self.browsers.all_ids.push(id.clone());
            self.browsers.by_id.insert(
                id.clone(),
                Browser {
                    id: id.clone(),
                    name: name.to_string(),
                    parent_id: leaf_id.to_string(),
                    status: StatusKind::Idle,
                    results: Vec::new(),
                    skip_reason: None,
                    reused: false,
                },
            );
        }
        id
    }

    /// Id for a new result of `browser_id`. The second value is `true` when
    /// the natural id was taken and a free slot had to be chosen.
    ///
    /// Free slots are searched from `max(history_len, attempt)` upward as
    /// `u64`, so an attempt at `u32::MAX` still has a successor slot.
    pub(crate) fn allocate_result_id(
        &self,
        browser_id: &str,
        attempt: u32,
    ) -> Result<(String, bool)> {
        let natural = ids::join_id(browser_id, &attempt.to_string());
        if !self.results.by_id.contains_key(&natural) {
            return Ok((natural, false));
        }
        let history = self
            .browsers
            .get(browser_id)
            .map_or(0, |browser| browser.results.len());
        let mut slot = u64::try_from(history)
            .unwrap_or(u64::MAX)
            .max(u64::from(attempt));
        loop {
            let candidate = ids::join_id(browser_id, &slot.to_string());
            if !self.results.by_id.contains_key(&candidate) {
                return Ok((candidate, true));
            }
            slot = slot.checked_add(1).ok_or_else(|| {
                TreeError::malformed(format!("no free result slot for attempt {attempt}"))
            })?;
        }
    }

    /// Store a result under a fresh id (from `allocate_result_id`), so the
    /// id lists can be appended without a membership scan.
    pub(crate) fn insert_result(&mut self, result: TestResult) {
        if result.status.is_failed() {
            self.results.failed_ids.push(result.id.clone());
        }
        self.results.all_ids.push(result.id.clone());
        self.results.by_id.insert(result.id.clone(), result);
    }

    /// Store an image of a freshly inserted result.
    pub(crate) fn insert_image(&mut self, image: Image) {
        if image.status.is_failed() {
            self.images.failed_ids.push(image.id.clone());
        }
        self.images.all_ids.push(image.id.clone());
        self.images.by_id.insert(image.id.clone(), image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ImageInfo, RawTestEvent};

    fn attempt(path: &[&str], browser: &str, n: u32, status: StatusKind) -> TestAttempt {
        TestAttempt::new(SuitePath::new(path.iter().copied()).unwrap(), browser, n, status).unwrap()
    }

    fn sid(path: &[&str]) -> String {
        ids::suite_id(path)
    }

    #[test]
    fn collects_root_and_all_suite_ids() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1", "s2"], "b", 0, StatusKind::Success)).unwrap();
        tree.ingest(attempt(&["s3", "s4"], "b", 0, StatusKind::Success)).unwrap();

        assert_eq!(tree.suites().all_root_ids(), [sid(&["s1"]), sid(&["s3"])]);
        assert_eq!(
            tree.suites().all_ids(),
            [sid(&["s1"]), sid(&["s1", "s2"]), sid(&["s3"]), sid(&["s3", "s4"])]
        );
    }

    #[test]
    fn initializes_root_and_child_suites() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1", "s2"], "b1", 0, StatusKind::Success)).unwrap();

        let root = tree.suites().get("s1").unwrap();
        assert_eq!(root.name, "s1");
        assert_eq!(root.parent_id, None);
        assert!(root.root);
        assert_eq!(root.suite_path, ["s1"]);
        assert_eq!(root.suites, [sid(&["s1", "s2"])]);
        assert!(root.browsers.is_empty());

        let child = tree.suites().get(&sid(&["s1", "s2"])).unwrap();
        assert_eq!(child.name, "s2");
        assert_eq!(child.parent_id.as_deref(), Some("s1"));
        assert!(!child.root);
        assert_eq!(child.browsers, [ids::browser_id(&["s1", "s2"], "b1")]);
    }

    #[test]
    fn browser_collects_results_in_attempt_order() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1"], "b1", 0, StatusKind::Fail)).unwrap();
        tree.ingest(attempt(&["s1"], "b1", 1, StatusKind::Success)).unwrap();

        let browser = tree.find_browser(&["s1"], "b1").unwrap();
        assert_eq!(browser.name, "b1");
        assert_eq!(browser.parent_id, "s1");
        assert_eq!(
            browser.results,
            [ids::result_id(&["s1"], "b1", 0), ids::result_id(&["s1"], "b1", 1)]
        );
        assert_eq!(browser.status, StatusKind::Success);
    }

    #[test]
    fn images_are_created_in_descriptor_order() {
        let mut tree = ReportTree::new();
        let event = attempt(&["s"], "b", 0, StatusKind::Fail)
            .with_images(vec![
                ImageInfo::new("image-1", StatusKind::Success),
                ImageInfo::new("image-2", StatusKind::Fail),
            ])
            .unwrap();
        let result_id = tree.ingest(event).unwrap();

        let states: Vec<_> = tree
            .images_info(&result_id)
            .iter()
            .map(|image| image.state_name.as_str())
            .collect();
        assert_eq!(states, ["image-1", "image-2"]);
        assert_eq!(
            tree.images().failed_ids(),
            [ids::image_id(&["s"], "b", 0, "image-2")]
        );
        assert_eq!(tree.results().failed_ids(), [result_id]);
    }

    #[test]
    fn last_result_tracks_latest_attempt() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s"], "b", 0, StatusKind::Fail)).unwrap();
        tree.ingest(attempt(&["s"], "b", 1, StatusKind::Success)).unwrap();

        let last = tree.last_result(&["s"], "b").unwrap();
        assert_eq!(last.id, ids::result_id(&["s"], "b", 1));
        assert_eq!(tree.result_at(&["s"], "b", 0).unwrap().status, StatusKind::Fail);
    }

    #[test]
    fn duplicate_attempt_is_appended_not_replaced() {
        let mut tree = ReportTree::new();
        let first = tree.ingest(attempt(&["s"], "b", 0, StatusKind::Fail)).unwrap();
        let second = tree.ingest(attempt(&["s"], "b", 0, StatusKind::Success)).unwrap();

        assert_ne!(first, second);
        assert_eq!(second, ids::result_id(&["s"], "b", 1));
        let history = tree.browser_results(&["s"], "b");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|result| result.attempt == 0));
        assert_eq!(tree.find_suite(&["s"]).unwrap().status, StatusKind::Success);
        assert!(tree.check_consistency().is_empty());
    }

    #[test]
    fn duplicate_of_highest_attempt_gets_a_wider_slot() {
        let mut tree = ReportTree::new();
        let first = tree.ingest(attempt(&["s"], "b", u32::MAX, StatusKind::Fail)).unwrap();
        let second = tree.ingest(attempt(&["s"], "b", u32::MAX, StatusKind::Fail)).unwrap();
        let third = tree.ingest(attempt(&["s"], "b", u32::MAX, StatusKind::Success)).unwrap();

        assert_eq!(first, ids::result_id(&["s"], "b", u32::MAX));
        assert_eq!(second, ids::join_id(&ids::browser_id(&["s"], "b"), "4294967296"));
        assert_eq!(third, ids::join_id(&ids::browser_id(&["s"], "b"), "4294967297"));
        assert_eq!(tree.browser_results(&["s"], "b").len(), 3);
        assert_eq!(tree.find_suite(&["s"]).unwrap().status, StatusKind::Success);
        assert!(tree.check_consistency().is_empty());
    }

    #[test]
    fn leaf_cannot_gain_child_suites() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1"], "b", 0, StatusKind::Success)).unwrap();
        let before = tree.clone();

        let err = tree.ingest(attempt(&["s1", "s2"], "b", 0, StatusKind::Fail)).unwrap_err();
        assert!(matches!(err, TreeError::ShapeConflict { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn internal_suite_cannot_hold_browsers() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1", "s2"], "b", 0, StatusKind::Success)).unwrap();
        let before = tree.clone();

        assert!(tree.ingest(attempt(&["s1"], "b", 0, StatusKind::Fail)).is_err());
        assert_eq!(tree, before);
    }

    #[test]
    fn malformed_raw_event_never_reaches_the_tree() {
        let raw = RawTestEvent {
            suite_path: Vec::new(),
            browser_id: "b".into(),
            attempt: 0,
            status: StatusKind::Fail,
            images_info: Vec::new(),
            meta: Default::default(),
        };
        assert!(TestAttempt::try_from(raw).is_err());
    }

    #[test]
    fn declare_sets_default_status_without_results() {
        let mut tree = ReportTree::new();
        let path = SuitePath::new(["s1", "pending test"]).unwrap();
        tree.declare(&path, "b1", StatusKind::Skipped, Some("flaky".into()))
            .unwrap();

        let browser = tree.find_browser(path.segments(), "b1").unwrap();
        assert!(browser.results.is_empty());
        assert_eq!(browser.status, StatusKind::Skipped);
        assert_eq!(browser.skip_reason.as_deref(), Some("flaky"));
        assert!(tree.results().is_empty());
        assert_eq!(tree.find_suite(&["s1"]).unwrap().status, StatusKind::Skipped);
    }

    #[test]
    fn declare_does_not_override_recorded_history() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s"], "b", 0, StatusKind::Fail)).unwrap();
        tree.declare(&SuitePath::new(["s"]).unwrap(), "b", StatusKind::Idle, None)
            .unwrap();
        assert_eq!(tree.find_browser(&["s"], "b").unwrap().status, StatusKind::Fail);
    }

    #[test]
    fn test_begin_marks_branch_running() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1", "s2"], "b", 0, StatusKind::Fail)).unwrap();
        assert!(tree.mark_test_begin(&["s1", "s2"], "b", StatusKind::Running));

        assert_eq!(tree.find_suite(&["s1"]).unwrap().status, StatusKind::Running);
        assert!(tree.suites().failed_ids().is_empty());
        assert!(!tree.mark_test_begin(&["nope"], "b", StatusKind::Running));
    }

    #[test]
    fn suite_begin_updates_ancestors() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1", "s2"], "b", 0, StatusKind::Success)).unwrap();
        assert!(tree.mark_suite_begin(&["s1", "s2"], StatusKind::Running));

        assert_eq!(tree.find_suite(&["s1", "s2"]).unwrap().status, StatusKind::Running);
        assert_eq!(tree.find_suite(&["s1"]).unwrap().status, StatusKind::Running);
        assert!(!tree.mark_suite_begin(&["missing"], StatusKind::Running));
    }

    #[test]
    fn set_status_to_all_resets_suites_and_browsers() {
        let mut tree = ReportTree::new();
        tree.ingest(attempt(&["s1"], "b", 0, StatusKind::Fail)).unwrap();
        tree.ingest(attempt(&["s2", "c"], "b", 0, StatusKind::Success)).unwrap();
        tree.set_status_to_all(StatusKind::Queued);

        assert!(tree.suites().by_id().values().all(|s| s.status == StatusKind::Queued));
        assert!(tree.browsers().by_id().values().all(|b| b.status == StatusKind::Queued));
        assert!(tree.suites().failed_ids().is_empty());
        assert_eq!(tree.results().failed_ids().len(), 1);
        assert!(tree.check_consistency().is_empty());
    }
}
