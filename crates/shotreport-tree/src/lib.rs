#![forbid(unsafe_code)]

//! Incremental, normalized result tree for visual-regression test reports.
//!
//! # Role
//! `shotreport-tree` is the state core of a screenshot-testing report. It
//! turns a stream of per-attempt runner events into four flat, id-keyed
//! tables (suites, browsers, results, images) that a report front end can
//! render and diff cheaply.
//!
//! # Primary responsibilities
//! - **Identity** ([`ids`]): deterministic, collision-free entity ids.
//! - **Builder** ([`ReportTree::ingest`]): upsert one event, append-only
//!   history per browser.
//! - **Aggregation**: O(depth) status refresh along the touched branch.
//! - **Sort pass** ([`ReportTree::sort`]): stable name ordering and derived
//!   id lists in depth-first pre-order.
//! - **Reuse merge** ([`ReportTree::merge_reuse`]): carry a previous run's
//!   history into a freshly declared tree.
//! - **Session** ([`ReportSession`]): seeding, event ingestion, snapshots and
//!   statistics under one [`TreeConfig`].
//!
//! # Example
//! ```
//! use shotreport_tree::{ReportSession, StatusKind, SuitePath, TestAttempt};
//!
//! let mut session = ReportSession::new();
//! let path = SuitePath::new(["login", "renders form"]).unwrap();
//! let attempt = TestAttempt::new(path, "chrome", 0, StatusKind::Fail).unwrap();
//! session.ingest(attempt).unwrap();
//!
//! let tree = session.snapshot();
//! assert_eq!(tree.find_suite(&["login"]).unwrap().status, StatusKind::Fail);
//! assert_eq!(tree.suites().failed_root_ids(), ["login"]);
//! ```

mod aggregate;
mod builder;
pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod reuse;
pub mod session;
mod sort;
pub mod stats;
pub mod status;
pub mod tree;

pub use collection::{
    DeclareReport, DeclaredSuite, DeclaredTest, SuiteHandle, TestCollection, TestHandle,
};
pub use config::{ConfigError, IngestConfig, ReuseConfig, TreeConfig};
pub use error::{Result, TreeError};
pub use event::{AttemptMeta, ImageInfo, ImageRef, ImageSize, RawTestEvent, SuitePath, TestAttempt};
pub use reuse::ReuseReport;
pub use session::{ReportSession, SeedSummary};
pub use stats::{ReportStats, SkipEntry, StatCounts};
pub use status::{STATUS_PRECEDENCE, StatusKind, reduce_statuses};
pub use tree::{Browser, Image, ReportTree, Suite, TestResult};
