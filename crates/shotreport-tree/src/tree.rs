#![forbid(unsafe_code)]

//! Normalized report tree: four flat, id-keyed tables.
//!
//! # Layout
//!
//! ```text
//! suites    byId, allRootIds, failedRootIds, allIds, failedIds
//! browsers  byId, allIds
//! results   byId, allIds, failedIds
//! images    byId, allIds, failedIds
//! ```
//!
//! Entities reference their parent by id (`parentId`) and their children by
//! ordered id lists. Nothing holds a pointer to another entity, so every
//! table serializes independently and the whole tree round-trips through the
//! JSON snapshot shape consumed by the report front end.
//!
//! # Invariants
//!
//! - Ids are unique per table and every `parentId` resolves.
//! - A suite has child suites or browsers, never both.
//! - Id lists are duplicate-free; `failedIds` is a subset of `allIds` and
//!   holds exactly the entities whose status is failing.
//!
//! [`ReportTree::check_consistency`] verifies all of the above.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::event::{AttemptMeta, ImageInfo, ImageRef};
use crate::ids;
use crate::status::StatusKind;

/// Id-keyed entity table.
pub type IdMap<V> = HashMap<String, V, ahash::RandomState>;

// ============================================================================
// Entities
// ============================================================================

/// One level of the test-path hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub root: bool,
    pub suite_path: Vec<String>,
    pub status: StatusKind,
    /// Child suite ids (internal suites only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suites: Vec<String>,
    /// Browser ids (leaf suites only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub browsers: Vec<String>,
    /// Some descendant browser carries history copied from a previous run.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reused: bool,
}

impl Suite {
    pub(crate) fn new(suite_path: &[String], parent_id: Option<String>) -> Self {
        Self {
            id: ids::suite_id(suite_path),
            name: suite_path.last().cloned().unwrap_or_default(),
            root: parent_id.is_none(),
            parent_id,
            suite_path: suite_path.to_vec(),
            status: StatusKind::Idle,
            suites: Vec::new(),
            browsers: Vec::new(),
            reused: false,
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        !self.browsers.is_empty()
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        !self.suites.is_empty()
    }
}

/// One (suite, browser-name) pairing.
///
/// `status` mirrors the latest result's status. Before any result exists it
/// holds the declared default (`idle` or `skipped`); while the test is in
/// flight it holds `running`/`queued`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Browser {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub status: StatusKind,
    pub results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reused: bool,
}

/// One execution attempt of a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub parent_id: String,
    pub attempt: u32,
    pub status: StatusKind,
    pub images: Vec<String>,
    #[serde(default)]
    pub meta: AttemptMeta,
}

/// One named visual-comparison state within an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub parent_id: String,
    pub state_name: String,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_img: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_img: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_img: Option<ImageRef>,
}

impl Image {
    pub(crate) fn from_info(result_id: &str, info: ImageInfo) -> Self {
        Self {
            id: ids::join_id(result_id, &info.state_name),
            parent_id: result_id.to_string(),
            state_name: info.state_name,
            status: info.status,
            expected_img: info.expected_img,
            actual_img: info.actual_img,
            diff_img: info.diff_img,
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuiteTable {
    pub(crate) by_id: IdMap<Suite>,
    pub(crate) all_root_ids: Vec<String>,
    pub(crate) failed_root_ids: Vec<String>,
    pub(crate) all_ids: Vec<String>,
    pub(crate) failed_ids: Vec<String>,
}

impl SuiteTable {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Suite> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn by_id(&self) -> &IdMap<Suite> {
        &self.by_id
    }

    #[must_use]
    pub fn all_root_ids(&self) -> &[String] {
        &self.all_root_ids
    }

    #[must_use]
    pub fn failed_root_ids(&self) -> &[String] {
        &self.failed_root_ids
    }

    #[must_use]
    pub fn all_ids(&self) -> &[String] {
        &self.all_ids
    }

    #[must_use]
    pub fn failed_ids(&self) -> &[String] {
        &self.failed_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserTable {
    pub(crate) by_id: IdMap<Browser>,
    pub(crate) all_ids: Vec<String>,
}

impl BrowserTable {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Browser> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn by_id(&self) -> &IdMap<Browser> {
        &self.by_id
    }

    #[must_use]
    pub fn all_ids(&self) -> &[String] {
        &self.all_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultTable {
    pub(crate) by_id: IdMap<TestResult>,
    pub(crate) all_ids: Vec<String>,
    pub(crate) failed_ids: Vec<String>,
}

impl ResultTable {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TestResult> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn by_id(&self) -> &IdMap<TestResult> {
        &self.by_id
    }

    #[must_use]
    pub fn all_ids(&self) -> &[String] {
        &self.all_ids
    }

    #[must_use]
    pub fn failed_ids(&self) -> &[String] {
        &self.failed_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageTable {
    pub(crate) by_id: IdMap<Image>,
    pub(crate) all_ids: Vec<String>,
    pub(crate) failed_ids: Vec<String>,
}

impl ImageTable {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Image> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn by_id(&self) -> &IdMap<Image> {
        &self.by_id
    }

    #[must_use]
    pub fn all_ids(&self) -> &[String] {
        &self.all_ids
    }

    #[must_use]
    pub fn failed_ids(&self) -> &[String] {
        &self.failed_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Add or remove `id` from a failed-id list so membership matches `failed`.
pub(crate) fn sync_failed(list: &mut Vec<String>, id: &str, failed: bool) {
    let present = list.iter().any(|existing| existing == id);
    if failed && !present {
        list.push(id.to_string());
    } else if !failed && present {
        list.retain(|existing| existing != id);
    }
}

/// Append `id` unless already present.
pub(crate) fn push_unique(list: &mut Vec<String>, id: &str) -> bool {
    if list.iter().any(|existing| existing == id) {
        return false;
    }
    list.push(id.to_string());
    true
}

// ============================================================================
// ReportTree
// ============================================================================

/// The normalized test-result tree of one report session.
///
/// Mutation goes through `&mut self` (ingest, declare, sort, reuse merge),
/// so a tree has exactly one writer at a time. Readers take `&ReportTree`
/// or a cloned snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportTree {
    pub(crate) suites: SuiteTable,
    pub(crate) browsers: BrowserTable,
    pub(crate) results: ResultTable,
    pub(crate) images: ImageTable,
}

impl ReportTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn suites(&self) -> &SuiteTable {
        &self.suites
    }

    #[must_use]
    pub fn browsers(&self) -> &BrowserTable {
        &self.browsers
    }

    #[must_use]
    pub fn results(&self) -> &ResultTable {
        &self.results
    }

    #[must_use]
    pub fn images(&self) -> &ImageTable {
        &self.images
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    // ── Path queries ────────────────────────────────────────────────────

    /// Suite addressed by `path`, if present.
    #[must_use]
    pub fn find_suite<S: AsRef<str>>(&self, path: &[S]) -> Option<&Suite> {
        if path.is_empty() || !path.iter().all(|s| ids::is_valid_component(s.as_ref())) {
            return None;
        }
        self.suites.get(&ids::suite_id(path))
    }

    #[must_use]
    pub fn find_browser<S: AsRef<str>>(&self, path: &[S], browser: &str) -> Option<&Browser> {
        if !ids::is_valid_component(browser) {
            return None;
        }
        let suite = self.find_suite(path)?;
        self.browsers.get(&ids::join_id(&suite.id, browser))
    }

    /// Most recently appended result of a (suite, browser) pairing.
    #[must_use]
    pub fn last_result<S: AsRef<str>>(&self, path: &[S], browser: &str) -> Option<&TestResult> {
        let browser = self.find_browser(path, browser)?;
        browser
            .results
            .last()
            .and_then(|id| self.results.get(id))
    }

    /// Result at position `retry_index` in a browser's history.
    #[must_use]
    pub fn result_at<S: AsRef<str>>(
        &self,
        path: &[S],
        browser: &str,
        retry_index: usize,
    ) -> Option<&TestResult> {
        let browser = self.find_browser(path, browser)?;
        browser
            .results
            .get(retry_index)
            .and_then(|id| self.results.get(id))
    }

    /// Full ordered history of a browser; empty when unknown.
    #[must_use]
    pub fn browser_results<S: AsRef<str>>(&self, path: &[S], browser: &str) -> Vec<&TestResult> {
        self.find_browser(path, browser)
            .map(|browser| {
                browser
                    .results
                    .iter()
                    .filter_map(|id| self.results.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ordered images of a result; empty when the result is unknown.
    #[must_use]
    pub fn images_info(&self, result_id: &str) -> Vec<&Image> {
        self.results
            .get(result_id)
            .map(|result| {
                result
                    .images
                    .iter()
                    .filter_map(|id| self.images.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Named state of a result, or its last image when `state` is `None`.
    #[must_use]
    pub fn find_image(&self, result_id: &str, state: Option<&str>) -> Option<&Image> {
        let result = self.results.get(result_id)?;
        match state {
            Some(name) => result
                .images
                .iter()
                .filter_map(|id| self.images.get(id))
                .find(|image| image.state_name == name),
            None => result.images.last().and_then(|id| self.images.get(id)),
        }
    }

    /// Ids of leaf suites in depth-first pre-order over the current child
    /// ordering.
    #[must_use]
    pub fn leaf_suite_ids(&self) -> Vec<String> {
        let mut leaves = Vec::new();
        let mut stack: Vec<&str> = self
            .suites
            .all_root_ids
            .iter()
            .rev()
            .map(String::as_str)
            .collect();
        while let Some(id) = stack.pop() {
            let Some(suite) = self.suites.get(id) else {
                continue;
            };
            if suite.is_leaf() {
                leaves.push(suite.id.clone());
            }
            stack.extend(suite.suites.iter().rev().map(String::as_str));
        }
        leaves
    }

    // ── Consistency ─────────────────────────────────────────────────────

    /// Verify structural invariants.
    ///
    /// Returns a list of violations; an empty list means the tree is
    /// consistent.
    #[must_use]
    pub fn check_consistency(&self) -> Vec<String> {
        let mut errors = Vec::new();

        check_list(
            "suites.allIds",
            &self.suites.all_ids,
            self.suites.by_id.len(),
            |id| self.suites.by_id.contains_key(id),
            &mut errors,
        );
        check_list(
            "browsers.allIds",
            &self.browsers.all_ids,
            self.browsers.by_id.len(),
            |id| self.browsers.by_id.contains_key(id),
            &mut errors,
        );
        check_list(
            "results.allIds",
            &self.results.all_ids,
            self.results.by_id.len(),
            |id| self.results.by_id.contains_key(id),
            &mut errors,
        );
        check_list(
            "images.allIds",
            &self.images.all_ids,
            self.images.by_id.len(),
            |id| self.images.by_id.contains_key(id),
            &mut errors,
        );

        check_failed(
            "suites.failedIds",
            &self.suites.failed_ids,
            self.suites.by_id.values().map(|s| (&s.id, s.status)),
            &mut errors,
        );
        check_failed(
            "suites.failedRootIds",
            &self.suites.failed_root_ids,
            self.suites
                .by_id
                .values()
                .filter(|s| s.root)
                .map(|s| (&s.id, s.status)),
            &mut errors,
        );
        check_failed(
            "results.failedIds",
            &self.results.failed_ids,
            self.results.by_id.values().map(|r| (&r.id, r.status)),
            &mut errors,
        );
        check_failed(
            "images.failedIds",
            &self.images.failed_ids,
            self.images.by_id.values().map(|i| (&i.id, i.status)),
            &mut errors,
        );

        let roots: HashSet<&str> = self.suites.all_root_ids.iter().map(String::as_str).collect();
        if roots.len() != self.suites.all_root_ids.len() {
            errors.push("suites.allRootIds contains duplicates".into());
        }

        for suite in self.suites.by_id.values() {
            if suite.is_leaf() && suite.is_internal() {
                errors.push(format!("suite {:?} is both internal and leaf", suite.id));
            }
            match &suite.parent_id {
                Some(parent_id) => match self.suites.get(parent_id) {
                    Some(parent) if parent.suites.contains(&suite.id) => {}
                    Some(_) => errors.push(format!(
                        "suite {:?} missing from its parent's child list",
                        suite.id
                    )),
                    None => errors.push(format!("suite {:?} has dangling parent", suite.id)),
                },
                None => {
                    if !roots.contains(suite.id.as_str()) {
                        errors.push(format!("root suite {:?} missing from allRootIds", suite.id));
                    }
                }
            }
            if suite.root != suite.parent_id.is_none() {
                errors.push(format!("suite {:?} root flag disagrees with parent", suite.id));
            }
            check_children(
                "suite.suites",
                &suite.id,
                &suite.suites,
                |id| {
                    self.suites
                        .get(id)
                        .map(|child| child.parent_id.as_deref() == Some(suite.id.as_str()))
                },
                &mut errors,
            );
            check_children(
                "suite.browsers",
                &suite.id,
                &suite.browsers,
                |id| self.browsers.get(id).map(|b| b.parent_id == suite.id),
                &mut errors,
            );
        }

        for browser in self.browsers.by_id.values() {
            match self.suites.get(&browser.parent_id) {
                Some(parent) if parent.browsers.contains(&browser.id) => {}
                _ => errors.push(format!("browser {:?} is not linked from a suite", browser.id)),
            }
            check_children(
                "browser.results",
                &browser.id,
                &browser.results,
                |id| self.results.get(id).map(|r| r.parent_id == browser.id),
                &mut errors,
            );
        }

        for result in self.results.by_id.values() {
            if !self.browsers.by_id.contains_key(&result.parent_id) {
                errors.push(format!("result {:?} has dangling parent", result.id));
            }
            check_children(
                "result.images",
                &result.id,
                &result.images,
                |id| self.images.get(id).map(|i| i.parent_id == result.id),
                &mut errors,
            );
        }

        for image in self.images.by_id.values() {
            if !self.results.by_id.contains_key(&image.parent_id) {
                errors.push(format!("image {:?} has dangling parent", image.id));
            }
        }

        errors
    }
}

fn check_list(
    name: &str,
    list: &[String],
    expected_len: usize,
    exists: impl Fn(&str) -> bool,
    errors: &mut Vec<String>,
) {
    let unique: HashSet<&str> = list.iter().map(String::as_str).collect();
    if unique.len() != list.len() {
        errors.push(format!("{name} contains duplicates"));
    }
    if list.len() != expected_len {
        errors.push(format!(
            "{name} has {} entries but the table holds {expected_len}",
            list.len()
        ));
    }
    for id in list {
        if !exists(id) {
            errors.push(format!("{name} references unknown id {id:?}"));
        }
    }
}

fn check_failed<'a>(
    name: &str,
    list: &[String],
    entities: impl Iterator<Item = (&'a String, StatusKind)>,
    errors: &mut Vec<String>,
) {
    let listed: HashSet<&str> = list.iter().map(String::as_str).collect();
    if listed.len() != list.len() {
        errors.push(format!("{name} contains duplicates"));
    }
    let mut expected: HashMap<&str, bool> = HashMap::new();
    for (id, status) in entities {
        expected.insert(id.as_str(), status.is_failed());
    }
    for id in &listed {
        match expected.get(id) {
            Some(true) => {}
            Some(false) => errors.push(format!("{name} lists passing entity {id:?}")),
            None => errors.push(format!("{name} references unknown id {id:?}")),
        }
    }
    for (id, failed) in expected {
        if failed && !listed.contains(id) {
            errors.push(format!("{name} is missing failing entity {id:?}"));
        }
    }
}

fn check_children(
    name: &str,
    owner: &str,
    children: &[String],
    back_link_ok: impl Fn(&str) -> Option<bool>,
    errors: &mut Vec<String>,
) {
    let unique: HashSet<&str> = children.iter().map(String::as_str).collect();
    if unique.len() != children.len() {
        errors.push(format!("{name} of {owner:?} contains duplicates"));
    }
    for child in children {
        match back_link_ok(child) {
            Some(true) => {}
            Some(false) => errors.push(format!(
                "{name} of {owner:?}: child {child:?} points at another parent"
            )),
            None => errors.push(format!("{name} of {owner:?}: unknown child {child:?}")),
        }
    }
}
