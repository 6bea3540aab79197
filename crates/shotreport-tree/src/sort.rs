#![forbid(unsafe_code)]

//! Deterministic ordering pass.
//!
//! Runs once per completed batch (after the initial declaration, or after a
//! reuse merge), never per event. Children are ordered by their own `name`,
//! with the id as a tie-breaker, and every derived id list is rebuilt in
//! depth-first pre-order over the sorted hierarchy:
//!
//! ```text
//! suites.allIds    pre-order over suites
//! browsers.allIds  leaf suites' browsers, in visit order
//! results.allIds   each browser's history, in attempt order
//! images.allIds    each result's images, in descriptor order
//! failed*          the lists above filtered by failing status
//! ```
//!
//! The pass is idempotent.

use std::cmp::Ordering;

use tracing::debug_span;

use crate::tree::{IdMap, ReportTree};

impl ReportTree {
    /// Sort children by name and rebuild the derived id lists.
    pub fn sort(&mut self) {
        let _span = debug_span!(
            "tree.sort",
            suites = self.suites.len(),
            browsers = self.browsers.len(),
        )
        .entered();

        let suite_ids: Vec<String> = self.suites.by_id.keys().cloned().collect();
        for id in &suite_ids {
            let (mut children, mut browsers) = match self.suites.by_id.get_mut(id) {
                Some(suite) => (
                    std::mem::take(&mut suite.suites),
                    std::mem::take(&mut suite.browsers),
                ),
                None => continue,
            };
            sort_by_name(&mut children, &self.suites.by_id, |suite| &suite.name);
            sort_by_name(&mut browsers, &self.browsers.by_id, |browser| &browser.name);
            if let Some(suite) = self.suites.by_id.get_mut(id) {
                suite.suites = children;
                suite.browsers = browsers;
            }
        }

        let mut roots = std::mem::take(&mut self.suites.all_root_ids);
        sort_by_name(&mut roots, &self.suites.by_id, |suite| &suite.name);
        self.suites.all_root_ids = roots;

        self.rebuild_indexes();
    }

    /// Rebuild every derived id list from the hierarchy, preserving the
    /// current child ordering.
    pub(crate) fn rebuild_indexes(&mut self) {
        let mut suite_ids = Vec::with_capacity(self.suites.len());
        let mut browser_ids = Vec::with_capacity(self.browsers.len());
        let mut result_ids = Vec::with_capacity(self.results.len());
        let mut image_ids = Vec::with_capacity(self.images.len());

        let mut stack: Vec<&String> = self.suites.all_root_ids.iter().rev().collect();
        while let Some(id) = stack.pop() {
            let Some(suite) = self.suites.get(id) else {
                continue;
            };
            suite_ids.push(id.clone());
            for browser_id in &suite.browsers {
                let Some(browser) = self.browsers.get(browser_id) else {
                    continue;
                };
                browser_ids.push(browser_id.clone());
                for result_id in &browser.results {
                    let Some(result) = self.results.get(result_id) else {
                        continue;
                    };
                    result_ids.push(result_id.clone());
                    image_ids.extend(
                        result
                            .images
                            .iter()
                            .filter(|image_id| self.images.by_id.contains_key(*image_id))
                            .cloned(),
                    );
                }
            }
            stack.extend(suite.suites.iter().rev());
        }

        let failed_suites = filter_failed(&suite_ids, |id| {
            self.suites.get(id).is_some_and(|s| s.status.is_failed())
        });
        let failed_roots = filter_failed(&self.suites.all_root_ids, |id| {
            self.suites.get(id).is_some_and(|s| s.status.is_failed())
        });
        let failed_results = filter_failed(&result_ids, |id| {
            self.results.get(id).is_some_and(|r| r.status.is_failed())
        });
        let failed_images = filter_failed(&image_ids, |id| {
            self.images.get(id).is_some_and(|i| i.status.is_failed())
        });

        self.suites.all_ids = suite_ids;
        self.suites.failed_ids = failed_suites;
        self.suites.failed_root_ids = failed_roots;
        self.browsers.all_ids = browser_ids;
        self.results.all_ids = result_ids;
        self.results.failed_ids = failed_results;
        self.images.all_ids = image_ids;
        self.images.failed_ids = failed_images;
    }
}

fn sort_by_name<V>(ids: &mut [String], table: &IdMap<V>, name: impl Fn(&V) -> &String) {
    ids.sort_by(|a, b| {
        let name_a = table.get(a).map(&name);
        let name_b = table.get(b).map(&name);
        match name_a.cmp(&name_b) {
            Ordering::Equal => a.cmp(b),
            other => other,
        }
    });
}

fn filter_failed(ids: &[String], is_failed: impl Fn(&str) -> bool) -> Vec<String> {
    ids.iter().filter(|id| is_failed(id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use crate::event::{SuitePath, TestAttempt};
    use crate::ids;
    use crate::status::StatusKind;
    use crate::tree::ReportTree;

    fn ingest(tree: &mut ReportTree, path: &[&str], browser: &str, status: StatusKind) {
        let path = SuitePath::new(path.iter().copied()).unwrap();
        tree.ingest(TestAttempt::new(path, browser, 0, status).unwrap())
            .unwrap();
    }

    #[test]
    fn sorts_root_ids() {
        let mut tree = ReportTree::new();
        ingest(&mut tree, &["s2"], "b", StatusKind::Success);
        ingest(&mut tree, &["s1"], "b", StatusKind::Success);
        tree.sort();
        assert_eq!(tree.suites().all_root_ids(), ["s1", "s2"]);
    }

    #[test]
    fn sorts_child_suite_ids() {
        let mut tree = ReportTree::new();
        ingest(&mut tree, &["s1", "ch2"], "b", StatusKind::Success);
        ingest(&mut tree, &["s1", "ch1"], "b", StatusKind::Success);
        tree.sort();
        assert_eq!(
            tree.suites().get("s1").unwrap().suites,
            [ids::suite_id(&["s1", "ch1"]), ids::suite_id(&["s1", "ch2"])]
        );
    }

    #[test]
    fn sorts_browser_ids() {
        let mut tree = ReportTree::new();
        ingest(&mut tree, &["s1"], "b2", StatusKind::Success);
        ingest(&mut tree, &["s1"], "b1", StatusKind::Success);
        tree.sort();
        assert_eq!(
            tree.suites().get("s1").unwrap().browsers,
            [ids::browser_id(&["s1"], "b1"), ids::browser_id(&["s1"], "b2")]
        );
        assert_eq!(
            tree.browsers().all_ids(),
            [ids::browser_id(&["s1"], "b1"), ids::browser_id(&["s1"], "b2")]
        );
    }

    #[test]
    fn orders_by_name_not_by_id() {
        let mut tree = ReportTree::new();
        ingest(&mut tree, &["root", "b"], "x", StatusKind::Success);
        ingest(&mut tree, &["root", "a b"], "x", StatusKind::Success);
        ingest(&mut tree, &["root", "a"], "x", StatusKind::Success);
        tree.sort();
        let names: Vec<_> = tree
            .suites()
            .get("root")
            .unwrap()
            .suites
            .iter()
            .map(|id| tree.suites().get(id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, ["a", "a b", "b"]);
    }

    #[test]
    fn rebuilds_all_ids_in_preorder_and_failed_lists() {
        let mut tree = ReportTree::new();
        ingest(&mut tree, &["z", "y"], "b", StatusKind::Fail);
        ingest(&mut tree, &["a"], "b", StatusKind::Success);
        ingest(&mut tree, &["z", "x"], "b", StatusKind::Success);
        tree.sort();

        assert_eq!(
            tree.suites().all_ids(),
            [
                ids::suite_id(&["a"]),
                ids::suite_id(&["z"]),
                ids::suite_id(&["z", "x"]),
                ids::suite_id(&["z", "y"]),
            ]
        );
        assert_eq!(
            tree.suites().failed_ids(),
            [ids::suite_id(&["z"]), ids::suite_id(&["z", "y"])]
        );
        assert_eq!(tree.suites().failed_root_ids(), ["z"]);
        assert_eq!(
            tree.results().all_ids(),
            [
                ids::result_id(&["a"], "b", 0),
                ids::result_id(&["z", "x"], "b", 0),
                ids::result_id(&["z", "y"], "b", 0),
            ]
        );
        assert!(tree.check_consistency().is_empty());
    }

    #[test]
    fn sort_is_idempotent() {
        let mut tree = ReportTree::new();
        for (path, browser) in [(["q", "w"], "b3"), (["e", "r"], "b1"), (["q", "a"], "b2")] {
            ingest(&mut tree, &path, browser, StatusKind::Fail);
        }
        tree.sort();
        let once = tree.clone();
        tree.sort();
        assert_eq!(tree, once);
    }
}
