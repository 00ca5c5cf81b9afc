//! Rendering of unhandled errors into status details.

use std::error::Error;
use std::fmt::Write;

/// Appended when a detail was cut short.
pub const OMITTED_MARKER: &str = "----Omit Message(message size is too long)----";

/// Lines from runtime internals that add nothing to a detail.
const NOISE: &[&str] = &[
    "std::rt::",
    "std::panicking::",
    "core::ops::function::",
    "core::future::",
    "tokio::runtime::",
];

/// Render `err` and its source chain, one line per cause, for use as a
/// status detail.
///
/// Lines mentioning runtime internals are dropped. Rendering stops once
/// the text reaches `limit` bytes and [`OMITTED_MARKER`] is appended.
#[must_use]
pub fn format_error_detail(err: &(dyn Error + 'static), limit: usize) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(rendered, "\ncaused by: {cause}");
        source = cause.source();
    }

    let mut detail = String::new();
    for line in rendered.lines() {
        if NOISE.iter().any(|noise| line.contains(noise)) {
            continue;
        }
        detail.push_str(line);
        detail.push('\n');

        if detail.len() >= limit {
            truncate_at_boundary(&mut detail, limit);
            detail.push('\n');
            detail.push_str(OMITTED_MARKER);
            detail.push('\n');
            break;
        }
    }
    detail
}

fn truncate_at_boundary(text: &mut String, limit: usize) {
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
