//! Absolute path values with a tracked relative tail.
//!
//! A [`Pathname`] carries the full absolute path of a node together with the
//! length of its trailing relative part — the portion appended through
//! [`Pathname::for_child`] since the value was last rooted. The relative part
//! is what a backend walks; the prefix is the backend root.

use crate::error::{FsError, InvalidNameKind, Result};

/// An absolute path plus the length of its trailing relative part.
///
/// Values are immutable; every operation returns a new `Pathname`. The
/// relative part, when non-empty, never starts or ends with the separator and
/// never contains an empty or `.`/`..` segment — [`for_child`] rejects such
/// names before any backend is consulted.
///
/// [`for_child`]: Pathname::for_child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pathname {
    absolute: String,
    separator: char,
    relative_len: usize,
}

impl Pathname {
    /// Root value over `absolute` with an empty relative part.
    ///
    /// No syntax validation is applied to the root string itself.
    pub fn root(absolute: impl Into<String>, separator: char) -> Self {
        Self {
            absolute: absolute.into(),
            separator,
            relative_len: 0,
        }
    }

    /// Append a child name, validating its syntax.
    ///
    /// Both `/` and `\` in `name` are normalized to this value's separator and
    /// leading/trailing separators are trimmed, so `"/a/b/"` and `"a\\b"`
    /// produce the same relative path. Multi-segment names are allowed; each
    /// segment is validated on its own.
    pub fn for_child(&self, name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c == '/' || c == '\\' {
                    self.separator
                } else {
                    c
                }
            })
            .collect();
        let trimmed = normalized.trim_matches(self.separator);

        if trimmed.is_empty() {
            return Err(FsError::invalid_name(name, InvalidNameKind::EmptyName));
        }
        for segment in trimmed.split(self.separator) {
            if segment.is_empty() {
                return Err(FsError::invalid_name(name, InvalidNameKind::EmptySegment));
            }
            if segment == "." || segment == ".." {
                return Err(FsError::invalid_name(name, InvalidNameKind::DotSegment));
            }
        }

        let mut absolute = self.absolute.clone();
        if !absolute.ends_with(self.separator) {
            absolute.push(self.separator);
        }
        absolute.push_str(trimmed);

        let relative_len = if self.relative_len == 0 {
            trimmed.len()
        } else {
            self.relative_len + 1 + trimmed.len()
        };

        Ok(Self {
            absolute,
            separator: self.separator,
            relative_len,
        })
    }

    /// The same absolute path, reinterpreted as a root.
    pub fn as_root(&self) -> Self {
        Self {
            absolute: self.absolute.clone(),
            separator: self.separator,
            relative_len: 0,
        }
    }

    /// Interpret an externally supplied absolute path as a descendant of this
    /// value, producing a `Pathname` rooted at `self`.
    ///
    /// Fails with [`FsError::ForeignNode`] when `absolute` is not prefixed by
    /// this value's absolute path.
    pub fn as_root_for(&self, absolute: &str) -> Result<Self> {
        let Some(rest) = absolute.strip_prefix(&self.absolute) else {
            return Err(FsError::foreign(absolute));
        };
        let rest = rest.trim_start_matches(self.separator);
        Ok(Self {
            absolute: absolute.to_string(),
            separator: self.separator,
            relative_len: rest.len(),
        })
    }

    /// The full absolute path.
    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    /// The relative part; empty for a root.
    pub fn relative(&self) -> &str {
        &self.absolute[self.absolute.len() - self.relative_len..]
    }

    /// The separator this value normalizes to.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Whether the relative part is empty.
    pub fn is_root(&self) -> bool {
        self.relative_len == 0
    }

    /// The segments of the relative part, front to back.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let relative = self.relative();
        relative
            .split(self.separator)
            .filter(move |s| !s.is_empty())
    }

    /// The last segment of the relative part; empty for a root.
    pub fn leaf(&self) -> &str {
        let relative = self.relative();
        relative
            .rsplit(self.separator)
            .next()
            .unwrap_or(relative)
    }

    /// Absolute path of the prefix covering the first `count` relative
    /// segments.
    pub(crate) fn prefix(&self, count: usize) -> String {
        let root_len = self.absolute.len() - self.relative_len;
        let mut end = root_len;
        let relative = self.relative();
        let mut taken = 0;
        for (i, c) in relative.char_indices() {
            if c == self.separator {
                taken += 1;
                if taken == count {
                    end = root_len + i;
                    break;
                }
            }
        }
        if taken < count {
            end = self.absolute.len();
        }
        self.absolute[..end].to_string()
    }

    /// Absolute path formed by appending `segments` below this value, without
    /// re-validating them.
    pub(crate) fn descend(&self, segments: &[String]) -> String {
        let mut out = self.absolute.clone();
        for segment in segments {
            if !out.ends_with(self.separator) {
                out.push(self.separator);
            }
            out.push_str(segment);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidNameKind;

    fn root() -> Pathname {
        Pathname::root("vfs://", '/')
    }

    #[test]
    fn test_child_composition_law() {
        let p = root();
        let chained = p
            .for_child("x")
            .unwrap()
            .for_child("y")
            .unwrap();
        let composite = p.for_child("x/y").unwrap();
        assert_eq!(chained.absolute(), composite.absolute());
        assert_eq!(chained.relative(), composite.relative());
    }

    #[test]
    fn test_as_root_round_trip() {
        let p = root().for_child("name").unwrap();
        let rerooted = p.as_root();
        assert_eq!(rerooted.absolute(), p.absolute());
        assert_eq!(rerooted.relative(), "");
        assert!(rerooted.is_root());
    }

    #[test]
    fn test_rejection_set() {
        let p = root();
        for (name, kind) in [
            ("", InvalidNameKind::EmptyName),
            ("a//b", InvalidNameKind::EmptySegment),
            ("./a", InvalidNameKind::DotSegment),
            ("a/../b", InvalidNameKind::DotSegment),
        ] {
            match p.for_child(name) {
                Err(FsError::InvalidNodeName { kind: got, .. }) => assert_eq!(got, kind),
                other => panic!("expected InvalidNodeName for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_separator_normalization() {
        let p = root();
        let slashed = p.for_child("/a/b/").unwrap();
        let backslashed = p.for_child("a\\b").unwrap();
        assert_eq!(slashed.relative(), "a/b");
        assert_eq!(backslashed.relative(), "a/b");
        assert_eq!(slashed.absolute(), backslashed.absolute());
    }

    #[test]
    fn test_no_double_separator_after_scheme_root() {
        let p = root().for_child("foo").unwrap();
        assert_eq!(p.absolute(), "vfs://foo");
        let nested = p.for_child("bar").unwrap();
        assert_eq!(nested.absolute(), "vfs://foo/bar");
        assert_eq!(nested.relative(), "foo/bar");
    }

    #[test]
    fn test_plain_root_gains_separator() {
        let p = Pathname::root("/data", '/').for_child("foo").unwrap();
        assert_eq!(p.absolute(), "/data/foo");
        assert_eq!(p.relative(), "foo");
    }

    #[test]
    fn test_as_root_for_accepts_descendants_only() {
        let p = root();
        let target = p.as_root_for("vfs://a/b").unwrap();
        assert_eq!(target.relative(), "a/b");

        assert!(matches!(
            p.as_root_for("other://a"),
            Err(FsError::ForeignNode { .. })
        ));
    }

    #[test]
    fn test_segments_and_leaf() {
        let p = root().for_child("a/b/c").unwrap();
        let segments: Vec<_> = p.segments().collect();
        assert_eq!(segments, ["a", "b", "c"]);
        assert_eq!(p.leaf(), "c");
        assert_eq!(root().leaf(), "");
    }

    #[test]
    fn test_prefix_of_resolved_segments() {
        let p = root().for_child("a/b/c").unwrap();
        assert_eq!(p.prefix(0), "vfs://");
        assert_eq!(p.prefix(1), "vfs://a");
        assert_eq!(p.prefix(2), "vfs://a/b");
        assert_eq!(p.prefix(3), "vfs://a/b/c");
    }
}
