//! # Topic Matcher
//!
//! MQTT-style filter matching over delimiter-separated topics. The single-level
//! wildcard depends on the delimiter (`*` for `.`, `+` for anything else) and
//! the multi-level wildcard is always `#`.
//!
//! A single-level wildcard is satisfied even when the topic has no segment at
//! that position; only the final length check (or a trailing `#`) decides the
//! result in that case.

/// Delimiter used when none is configured.
pub const DEFAULT_DELIMITER: &str = "/";

/// Multi-level wildcard, legal only as the last filter segment.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Returns the single-level wildcard token for `delimiter`.
pub fn wildcard_for(delimiter: &str) -> &'static str {
    if delimiter == "." {
        "*"
    } else {
        "+"
    }
}

/// Checks whether `topic` satisfies `filter`.
///
/// Single left-to-right pass over the filter segments, no backtracking.
///
/// # Example
/// ```rust
/// use lib_topicstream::matcher::matches;
///
/// assert!(matches("a/+/c", "a/b/c", "/"));
/// assert!(matches("a/#", "a", "/"));
/// assert!(!matches("a/b", "a/b/c", "/"));
/// ```
pub fn matches(filter: &str, topic: &str, delimiter: &str) -> bool {
    let wildcard = wildcard_for(delimiter);
    let filter_segments: Vec<&str> = filter.split(delimiter).collect();
    let topic_segments: Vec<&str> = topic.split(delimiter).collect();

    for (i, segment) in filter_segments.iter().enumerate() {
        if *segment == MULTI_LEVEL_WILDCARD {
            return topic_segments.len() >= filter_segments.len() - 1;
        }
        if *segment != wildcard && topic_segments.get(i) != Some(segment) {
            return false;
        }
    }

    filter_segments.len() == topic_segments.len()
}
