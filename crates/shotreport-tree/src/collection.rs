#![forbid(unsafe_code)]

//! Declared test collection.
//!
//! Before a run starts, the test runner hands over every suite and test it
//! knows about. [`TestCollection`] stores them in an arena (suites refer to
//! their parent by [`SuiteHandle`]) and [`TestCollection::declare_into`]
//! turns each runnable (test, browser) pairing into an idle or skipped
//! browser entry of a [`ReportTree`].
//!
//! ```text
//! disabled test              -> omitted
//! silent skip (self or any   -> omitted
//!   ancestor suite)
//! pending test               -> declared `skipped` with its reason
//! anything else              -> declared `idle`
//! ```
//!
//! Suites with an empty title are anonymous containers and contribute no
//! path segment.

use tracing::{debug, debug_span, warn};

use crate::error::{Result, TreeError};
use crate::event::SuitePath;
use crate::ids;
use crate::status::StatusKind;
use crate::tree::ReportTree;

const TARGET: &str = "shotreport.collection";

/// Index of a suite inside its [`TestCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuiteHandle(usize);

/// Index of a test inside its [`TestCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestHandle(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSuite {
    pub title: String,
    pub silent_skip: bool,
    parent: Option<SuiteHandle>,
}

impl DeclaredSuite {
    #[must_use]
    pub fn parent(&self) -> Option<SuiteHandle> {
        self.parent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredTest {
    pub title: String,
    pub browsers: Vec<String>,
    pub pending: bool,
    pub disabled: bool,
    pub silent_skip: bool,
    pub skip_reason: Option<String>,
    suite: SuiteHandle,
}

impl DeclaredTest {
    #[must_use]
    pub fn suite(&self) -> SuiteHandle {
        self.suite
    }
}

/// Arena of declared suites and tests.
#[derive(Debug, Clone, Default)]
pub struct TestCollection {
    suites: Vec<DeclaredSuite>,
    tests: Vec<DeclaredTest>,
}

impl TestCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suite under `parent` (or at the top level).
    ///
    /// A parent handle that does not belong to this collection is dropped
    /// and the suite becomes top-level.
    pub fn add_suite(&mut self, parent: Option<SuiteHandle>, title: impl Into<String>) -> SuiteHandle {
        let title = title.into();
        let parent = match parent {
            Some(handle) if handle.0 < self.suites.len() => Some(handle),
            Some(handle) => {
                warn!(
                    target: TARGET,
                    suite = %title,
                    parent = handle.0,
                    "unknown parent suite; adding at top level"
                );
                None
            }
            None => None,
        };
        self.suites.push(DeclaredSuite {
            title,
            silent_skip: false,
            parent,
        });
        SuiteHandle(self.suites.len() - 1)
    }

    /// Add a test to `suite`, to be run in each of `browsers`.
    pub fn add_test<I, S>(
        &mut self,
        suite: SuiteHandle,
        title: impl Into<String>,
        browsers: I,
    ) -> Result<TestHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let title = title.into();
        if suite.0 >= self.suites.len() {
            return Err(TreeError::malformed(format!(
                "test {title:?} added to unknown suite"
            )));
        }
        self.tests.push(DeclaredTest {
            title,
            browsers: browsers.into_iter().map(Into::into).collect(),
            pending: false,
            disabled: false,
            silent_skip: false,
            skip_reason: None,
            suite,
        });
        Ok(TestHandle(self.tests.len() - 1))
    }

    #[must_use]
    pub fn suite(&self, handle: SuiteHandle) -> Option<&DeclaredSuite> {
        self.suites.get(handle.0)
    }

    #[must_use]
    pub fn test(&self, handle: TestHandle) -> Option<&DeclaredTest> {
        self.tests.get(handle.0)
    }

    pub fn test_mut(&mut self, handle: TestHandle) -> Option<&mut DeclaredTest> {
        self.tests.get_mut(handle.0)
    }

    /// Mark a test pending; it will be declared `skipped` with `reason`.
    pub fn mark_pending(&mut self, handle: TestHandle, reason: Option<String>) -> bool {
        let Some(test) = self.tests.get_mut(handle.0) else {
            return false;
        };
        test.pending = true;
        test.skip_reason = reason;
        true
    }

    pub fn mark_disabled(&mut self, handle: TestHandle) -> bool {
        let Some(test) = self.tests.get_mut(handle.0) else {
            return false;
        };
        test.disabled = true;
        true
    }

    pub fn mark_test_silent_skip(&mut self, handle: TestHandle) -> bool {
        let Some(test) = self.tests.get_mut(handle.0) else {
            return false;
        };
        test.silent_skip = true;
        true
    }

    /// Silently skip a suite and, by inheritance, everything below it.
    pub fn mark_suite_silent_skip(&mut self, handle: SuiteHandle) -> bool {
        let Some(suite) = self.suites.get_mut(handle.0) else {
            return false;
        };
        suite.silent_skip = true;
        true
    }

    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// `true` when the test or any suite above it is silently skipped.
    #[must_use]
    pub fn is_silently_skipped(&self, test: &DeclaredTest) -> bool {
        test.silent_skip || self.suite_silently_skipped(test.suite)
    }

    fn suite_silently_skipped(&self, handle: SuiteHandle) -> bool {
        let mut current = Some(handle);
        while let Some(SuiteHandle(index)) = current {
            let Some(suite) = self.suites.get(index) else {
                return false;
            };
            if suite.silent_skip {
                return true;
            }
            current = suite.parent;
        }
        false
    }

    /// Titles from the outermost named suite down to the test itself.
    #[must_use]
    pub fn suite_path(&self, test: &DeclaredTest) -> Vec<String> {
        let mut titles = vec![test.title.clone()];
        let mut current = Some(test.suite);
        while let Some(SuiteHandle(index)) = current {
            let Some(suite) = self.suites.get(index) else {
                break;
            };
            if !suite.title.is_empty() {
                titles.push(suite.title.clone());
            }
            current = suite.parent;
        }
        titles.reverse();
        titles
    }

    /// Visit every (test, browser) pairing in declaration order.
    pub fn each_test(&self, mut visit: impl FnMut(&DeclaredTest, &str)) {
        for test in &self.tests {
            for browser in &test.browsers {
                visit(test, browser);
            }
        }
    }

    /// Declare every runnable pairing into `tree`.
    ///
    /// Pairings the tree rejects (invalid titles, or a path that would turn a
    /// leaf suite into an internal one or the reverse) are logged and
    /// skipped; every other pairing is still declared.
    pub fn declare_into(&self, tree: &mut ReportTree) -> DeclareReport {
        self.declare_into_with_depth_limit(tree, usize::MAX)
    }

    /// [`Self::declare_into`], also rejecting tests whose suite path is
    /// deeper than `max_depth`.
    pub fn declare_into_with_depth_limit(
        &self,
        tree: &mut ReportTree,
        max_depth: usize,
    ) -> DeclareReport {
        let _span = debug_span!("collection.declare", tests = self.tests.len()).entered();

        let mut report = DeclareReport::default();
        for test in &self.tests {
            if test.disabled || self.is_silently_skipped(test) {
                report.omitted += test.browsers.len();
                continue;
            }
            let path = match self.checked_path(test, max_depth) {
                Ok(path) => path,
                Err(err) => {
                    warn!(target: TARGET, test = %test.title, error = %err, "test not declared");
                    report.rejected += test.browsers.len();
                    continue;
                }
            };
            let (status, reason) = if test.pending {
                (StatusKind::Skipped, test.skip_reason.clone())
            } else {
                (StatusKind::Idle, None)
            };
            for browser in &test.browsers {
                match tree.declare(&path, browser, status, reason.clone()) {
                    Ok(_) => report.declared += 1,
                    Err(err) => {
                        warn!(
                            target: TARGET,
                            suite = %ids::display_path(path.segments()),
                            browser = %browser,
                            error = %err,
                            "pairing not declared"
                        );
                        report.rejected += 1;
                    }
                }
            }
        }

        debug!(
            target: TARGET,
            declared = report.declared,
            omitted = report.omitted,
            rejected = report.rejected,
            "collection declared"
        );
        report
    }

    fn checked_path(&self, test: &DeclaredTest, max_depth: usize) -> Result<SuitePath> {
        let path = SuitePath::new(self.suite_path(test))?;
        if path.depth() > max_depth {
            return Err(TreeError::malformed(format!(
                "suite path depth {} exceeds limit {max_depth}",
                path.depth()
            )));
        }
        Ok(path)
    }
}

/// Counts of browser pairings handled by [`TestCollection::declare_into`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclareReport {
    pub declared: usize,
    /// Disabled or silently skipped.
    pub omitted: usize,
    /// Refused by validation or by the tree's shape check.
    pub rejected: usize,
}
