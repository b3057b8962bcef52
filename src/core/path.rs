//! Path algebra - structure addresses as chains of link full ids
//!
//! A path is the ordered list of usage/substitute link full ids from the root
//! of a configuration item down to one node, joined by `-`. The root itself is
//! the empty path. Paths are always handled segment by segment: an id only
//! ever matches a whole segment, never a substring of a longer id.

use crate::core::error::{PlmError, Result};
use crate::core::identity::LinkId;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '-';

/// Segments of a path; the root path has none
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    let path = if path.is_empty() { None } else { Some(path) };
    path.into_iter().flat_map(|p| p.split(PATH_SEPARATOR))
}

/// Join segments into a path
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::new();
    for (idx, segment) in segments.iter().enumerate() {
        if idx > 0 {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(segment.as_ref());
    }
    path
}

/// Path of a child reached from `parent` through `segment`
pub fn child(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, segment)
    }
}

/// Whether `id` appears as a whole segment anywhere in `path`
pub fn contains_segment(path: &str, id: &str) -> bool {
    segments(path).any(|s| s == id)
}

/// Last segment of a path, `None` for the root
pub fn last_segment(path: &str) -> Option<&str> {
    segments(path).last()
}

/// Replace every whole-segment occurrence of `old_id` with `new_id`
///
/// `upgrade_path("5-12", "5", "99") == "99-12"` but
/// `upgrade_path("51-12", "5", "99") == "51-12"`.
pub fn upgrade_path(path: &str, old_id: &str, new_id: &str) -> String {
    let rewritten: Vec<&str> = segments(path)
        .map(|s| if s == old_id { new_id } else { s })
        .collect();
    join(&rewritten)
}

/// Parse a path into its link ids, rejecting malformed segments
pub fn parse(path: &str) -> Result<Vec<LinkId>> {
    segments(path)
        .map(|s| {
            s.parse::<LinkId>().map_err(|e| PlmError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// SQL `LIKE` patterns that pre-select paths possibly containing `id`
///
/// Matches as prefix, suffix and middle segment; exact equality is checked
/// separately. Candidates are confirmed with [`contains_segment`] before use.
pub fn like_patterns(id: &str) -> [String; 3] {
    [
        format!("{}{}%", id, PATH_SEPARATOR),
        format!("%{}{}", PATH_SEPARATOR, id),
        format!("%{}{}{}%", PATH_SEPARATOR, id, PATH_SEPARATOR),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_path_matches_whole_segments_only() {
        assert_eq!(upgrade_path("5-12", "5", "99"), "99-12");
        assert_eq!(upgrade_path("51-12", "5", "99"), "51-12");
        assert_eq!(upgrade_path("12-5", "5", "99"), "12-99");
        assert_eq!(upgrade_path("12-5-7", "5", "99"), "12-99-7");
        assert_eq!(upgrade_path("5", "5", "99"), "99");
        assert_eq!(upgrade_path("", "5", "99"), "");
    }

    #[test]
    fn test_upgrade_path_with_link_ids() {
        assert_eq!(upgrade_path("u1-u12", "u1", "u30"), "u30-u12");
        assert_eq!(upgrade_path("u12-u1", "u1", "u30"), "u12-u30");
        assert_eq!(upgrade_path("u11-u12", "u1", "u30"), "u11-u12");
    }

    #[test]
    fn test_contains_segment() {
        assert!(contains_segment("u1-s7-u20", "s7"));
        assert!(contains_segment("u1", "u1"));
        assert!(!contains_segment("u1-s70", "s7"));
        assert!(!contains_segment("", "u1"));
    }

    #[test]
    fn test_segments_and_join() {
        assert_eq!(segments("").count(), 0);
        assert_eq!(segments("u1-u2").collect::<Vec<_>>(), vec!["u1", "u2"]);
        assert_eq!(join(&["u1", "s2"]), "u1-s2");
        assert_eq!(child("", "u1"), "u1");
        assert_eq!(child("u1", "u2"), "u1-u2");
        assert_eq!(last_segment("u1-u2"), Some("u2"));
        assert_eq!(last_segment(""), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            parse("u1-s7").unwrap(),
            vec![LinkId::Usage(1), LinkId::Substitute(7)]
        );
        assert!(parse("").unwrap().is_empty());
        assert!(parse("u1--u2").is_err());
        assert!(parse("u1-x2").is_err());
    }
}
