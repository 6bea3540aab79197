#![forbid(unsafe_code)]

//! Test-attempt events and their validated form.
//!
//! [`RawTestEvent`] mirrors the wire payload delivered by the test runner and
//! accepts anything serde can decode. [`TestAttempt`] is the only type the
//! builder ingests; constructing one checks the whole event up front so the
//! tree walk never meets a missing or malformed field.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::ids::{self, ID_SEPARATOR};
use crate::status::StatusKind;

/// Pixel dimensions of a stored screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Location of one stored screenshot (reference, actual, or diff).
///
/// Decodes from either a bare path string (`"images/plain.png"`) or a
/// `{ path, size? }` object; always encodes as the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ImageRefRepr")]
pub struct ImageRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ImageSize>,
}

impl ImageRef {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageRefRepr {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        size: Option<ImageSize>,
    },
}

impl From<ImageRefRepr> for ImageRef {
    fn from(repr: ImageRefRepr) -> Self {
        match repr {
            ImageRefRepr::Path(path) => Self::new(path),
            ImageRefRepr::Full { path, size } => Self { path, size },
        }
    }
}

/// Descriptor of one visual-comparison state within an attempt.
///
/// The image fields also accept the runner's flat path names
/// (`expectedImagePath`, `actualImagePath`, `diffImagePath`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    #[serde(default)]
    pub state_name: String,
    #[serde(default)]
    pub status: StatusKind,
    #[serde(default, alias = "expectedImagePath", skip_serializing_if = "Option::is_none")]
    pub expected_img: Option<ImageRef>,
    #[serde(default, alias = "actualImagePath", skip_serializing_if = "Option::is_none")]
    pub actual_img: Option<ImageRef>,
    #[serde(default, alias = "diffImagePath", skip_serializing_if = "Option::is_none")]
    pub diff_img: Option<ImageRef>,
}

impl ImageInfo {
    #[must_use]
    pub fn new(state_name: impl Into<String>, status: StatusKind) -> Self {
        Self {
            state_name: state_name.into(),
            status,
            ..Self::default()
        }
    }
}

/// Attempt metadata reported by the runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Wall-clock duration of the attempt in milliseconds.
    #[serde(default, alias = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Unvalidated test-attempt payload as delivered on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTestEvent {
    #[serde(default)]
    pub suite_path: Vec<String>,
    #[serde(default)]
    pub browser_id: String,
    #[serde(default)]
    pub attempt: u32,
    pub status: StatusKind,
    #[serde(default)]
    pub images_info: Vec<ImageInfo>,
    #[serde(default)]
    pub meta: AttemptMeta,
}

/// Non-empty suite path whose segments are all valid id components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuitePath(Vec<String>);

impl SuitePath {
    /// Validate and wrap path segments.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(TreeError::malformed("suite path is empty"));
        }
        for (idx, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(TreeError::malformed(format!(
                    "suite path segment {idx} is empty"
                )));
            }
            if segment.contains(ID_SEPARATOR) {
                return Err(TreeError::malformed(format!(
                    "suite path segment {idx} contains the id separator"
                )));
            }
        }
        Ok(Self(segments))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments (always at least one).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Last segment: the leaf suite's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    #[must_use]
    pub fn id(&self) -> String {
        ids::suite_id(&self.0)
    }

    #[must_use]
    pub fn into_segments(self) -> Vec<String> {
        self.0
    }
}

/// Validated test attempt, ready for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct TestAttempt {
    pub(crate) path: SuitePath,
    pub(crate) browser: String,
    pub(crate) attempt: u32,
    pub(crate) status: StatusKind,
    pub(crate) images: Vec<ImageInfo>,
    pub(crate) meta: AttemptMeta,
}

impl TestAttempt {
    pub fn new(
        path: SuitePath,
        browser: impl Into<String>,
        attempt: u32,
        status: StatusKind,
    ) -> Result<Self> {
        let browser = browser.into();
        validate_browser_name(&browser)?;
        Ok(Self {
            path,
            browser,
            attempt,
            status,
            images: Vec::new(),
            meta: AttemptMeta::default(),
        })
    }

    /// Attach image descriptors. State names must be valid and distinct.
    pub fn with_images(mut self, images: Vec<ImageInfo>) -> Result<Self> {
        validate_states(&images)?;
        self.images = images;
        Ok(self)
    }

    #[must_use]
    pub fn with_meta(mut self, meta: AttemptMeta) -> Self {
        self.meta = meta;
        self
    }

    #[must_use]
    pub fn path(&self) -> &SuitePath {
        &self.path
    }

    #[must_use]
    pub fn browser(&self) -> &str {
        &self.browser
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn status(&self) -> StatusKind {
        self.status
    }

    #[must_use]
    pub fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    #[must_use]
    pub fn meta(&self) -> &AttemptMeta {
        &self.meta
    }
}

impl TryFrom<RawTestEvent> for TestAttempt {
    type Error = TreeError;

    fn try_from(raw: RawTestEvent) -> Result<Self> {
        let path = SuitePath::new(raw.suite_path)?;
        Ok(Self::new(path, raw.browser_id, raw.attempt, raw.status)?
            .with_images(raw.images_info)?
            .with_meta(raw.meta))
    }
}

pub(crate) fn validate_browser_name(browser: &str) -> Result<()> {
    if browser.is_empty() {
        return Err(TreeError::malformed("browser id is empty"));
    }
    if browser.contains(ID_SEPARATOR) {
        return Err(TreeError::malformed(format!(
            "browser id {browser:?} contains the id separator"
        )));
    }
    Ok(())
}

fn validate_states(images: &[ImageInfo]) -> Result<()> {
    let mut seen = HashSet::with_capacity(images.len());
    for (idx, image) in images.iter().enumerate() {
        if !ids::is_valid_component(&image.state_name) {
            return Err(TreeError::malformed(format!(
                "image {idx} has an empty or invalid state name"
            )));
        }
        if !seen.insert(image.state_name.as_str()) {
            return Err(TreeError::malformed(format!(
                "state {:?} appears twice in one attempt",
                image.state_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(path: &[&str], browser: &str) -> RawTestEvent {
        RawTestEvent {
            suite_path: path.iter().map(|s| (*s).to_string()).collect(),
            browser_id: browser.to_string(),
            attempt: 0,
            status: StatusKind::Success,
            images_info: Vec::new(),
            meta: AttemptMeta::default(),
        }
    }

    #[test]
    fn valid_event_converts() {
        let attempt = TestAttempt::try_from(raw(&["s1", "s2"], "chrome")).unwrap();
        assert_eq!(attempt.path().segments(), ["s1", "s2"]);
        assert_eq!(attempt.path().name(), "s2");
        assert_eq!(attempt.browser(), "chrome");
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = TestAttempt::try_from(raw(&[], "chrome")).unwrap_err();
        assert!(matches!(err, TreeError::MalformedEvent { .. }));
    }

    #[test]
    fn empty_segment_is_rejected() {
        assert!(TestAttempt::try_from(raw(&["s1", ""], "chrome")).is_err());
    }

    #[test]
    fn empty_browser_is_rejected() {
        assert!(TestAttempt::try_from(raw(&["s1"], "")).is_err());
    }

    #[test]
    fn separator_in_segment_is_rejected() {
        assert!(TestAttempt::try_from(raw(&["bad\u{1f}seg"], "chrome")).is_err());
        assert!(TestAttempt::try_from(raw(&["s1"], "chr\u{1f}ome")).is_err());
    }

    #[test]
    fn duplicate_state_names_are_rejected() {
        let mut event = raw(&["s1"], "chrome");
        event.images_info = vec![
            ImageInfo::new("plain", StatusKind::Success),
            ImageInfo::new("plain", StatusKind::Fail),
        ];
        assert!(TestAttempt::try_from(event).is_err());
    }

    #[test]
    fn empty_state_name_is_rejected() {
        let mut event = raw(&["s1"], "chrome");
        event.images_info = vec![ImageInfo::default()];
        assert!(TestAttempt::try_from(event).is_err());
    }

    #[test]
    fn decodes_camel_case_wire_payload() {
        let json = r#"{
            "suitePath": ["form", "submit"],
            "browserId": "firefox",
            "attempt": 2,
            "status": "fail",
            "imagesInfo": [{"stateName": "plain", "status": "fail",
                            "diffImg": {"path": "images/plain~diff_2.png"}}],
            "meta": {"sessionId": "abc", "url": "/form"}
        }"#;
        let event: RawTestEvent = serde_json::from_str(json).unwrap();
        let attempt = TestAttempt::try_from(event).unwrap();
        assert_eq!(attempt.attempt(), 2);
        assert_eq!(attempt.status(), StatusKind::Fail);
        assert_eq!(attempt.images()[0].diff_img.as_ref().unwrap().path, "images/plain~diff_2.png");
        assert_eq!(attempt.meta().session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn decodes_flat_image_paths_and_duration() {
        let json = r#"{
            "suitePath": ["login"],
            "browserId": "chrome",
            "status": "fail",
            "imagesInfo": [{"stateName": "plain", "status": "fail",
                            "expectedImagePath": "ref.png",
                            "actualImagePath": "cur.png",
                            "diffImagePath": "diff.png"}],
            "meta": {"duration": 1520}
        }"#;
        let event: RawTestEvent = serde_json::from_str(json).unwrap();
        let image = &event.images_info[0];
        assert_eq!(image.expected_img, Some(ImageRef::new("ref.png")));
        assert_eq!(image.actual_img, Some(ImageRef::new("cur.png")));
        assert_eq!(image.diff_img, Some(ImageRef::new("diff.png")));
        assert_eq!(event.meta.duration, Some(1520));

        let encoded = serde_json::to_value(image).unwrap();
        assert_eq!(encoded["actualImg"]["path"], "cur.png");
    }

    #[test]
    fn image_ref_object_keeps_size() {
        let image: ImageInfo = serde_json::from_str(
            r#"{"stateName": "plain", "actualImg": {"path": "a.png", "size": {"width": 4, "height": 2}}}"#,
        )
        .unwrap();
        let actual = image.actual_img.unwrap();
        assert_eq!(actual.path, "a.png");
        assert_eq!(actual.size, Some(ImageSize { width: 4, height: 2 }));
    }

    #[test]
    fn missing_path_field_decodes_then_fails_validation() {
        let event: RawTestEvent =
            serde_json::from_str(r#"{"browserId": "b", "status": "success"}"#).unwrap();
        assert!(TestAttempt::try_from(event).is_err());
    }
}
