#![forbid(unsafe_code)]

//! Stable identifiers for tree entities.
//!
//! Every id is derived purely from path segments, so the same suite path and
//! browser name produce the same id in every run:
//!
//! ```text
//! suite   = seg0 SEP seg1 ... segN
//! browser = suite SEP browser-name
//! result  = browser SEP attempt
//! image   = result SEP state-name
//! ```
//!
//! `SEP` is [`ID_SEPARATOR`] (U+001F, ASCII unit separator). Segment, browser,
//! and state names containing it are rejected when events are validated, so
//! two distinct paths can never collide.

/// Separator placed between id components.
pub const ID_SEPARATOR: char = '\u{1f}';

/// Whether `part` may be used as an id component.
#[must_use]
pub fn is_valid_component(part: &str) -> bool {
    !part.is_empty() && !part.contains(ID_SEPARATOR)
}

/// Append one component to an existing id.
#[must_use]
pub fn join_id(parent: &str, part: &str) -> String {
    let mut id = String::with_capacity(parent.len() + part.len() + 1);
    id.push_str(parent);
    id.push(ID_SEPARATOR);
    id.push_str(part);
    id
}

/// Id of the suite addressed by `path`.
#[must_use]
pub fn suite_id<S: AsRef<str>>(path: &[S]) -> String {
    let mut id = String::new();
    for (idx, segment) in path.iter().enumerate() {
        if idx > 0 {
            id.push(ID_SEPARATOR);
        }
        id.push_str(segment.as_ref());
    }
    id
}

#[must_use]
pub fn browser_id<S: AsRef<str>>(path: &[S], browser: &str) -> String {
    join_id(&suite_id(path), browser)
}

#[must_use]
pub fn result_id<S: AsRef<str>>(path: &[S], browser: &str, attempt: u32) -> String {
    join_id(&browser_id(path, browser), &attempt.to_string())
}

#[must_use]
pub fn image_id<S: AsRef<str>>(path: &[S], browser: &str, attempt: u32, state: &str) -> String {
    join_id(&result_id(path, browser, attempt), state)
}

/// Human-readable rendering of a suite path (segments joined by a space).
#[must_use]
pub fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}
