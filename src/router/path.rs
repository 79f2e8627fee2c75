//! Route paths.
//!
//! A path is a sequence of lowercase segments. Both `/` and `\` delimit
//! segments and empty segments are dropped, so `"A//b\\C/"` and `"/a/b/c"`
//! are the same path.
//!
//! ```
//! use peerwire::router::RoutePath;
//!
//! let full = RoutePath::parse("/Users/42\\Profile");
//! let mount = RoutePath::parse("users");
//!
//! assert!(mount.matches_prefix(&full));
//! assert_eq!(full.pop(&mount).to_string(), "/42/profile");
//! assert_eq!(RoutePath::parse("").to_string(), "/");
//! ```

use std::fmt;

/// Parsed, case-normalized route path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoutePath {
    segments: Vec<String>,
}

impl RoutePath {
    /// Parse a path string.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(['/', '\\'])
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Check if `self` is a prefix of `other` (equal paths included).
    pub fn matches_prefix(&self, other: &RoutePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Check if both paths have the same segments.
    pub fn matches_exactly(&self, other: &RoutePath) -> bool {
        self.segments == other.segments
    }

    /// Drop as many leading segments as `prefix` has.
    ///
    /// Callers check [`matches_prefix`](Self::matches_prefix) first; the
    /// segments themselves are not compared.
    pub fn pop(&self, prefix: &RoutePath) -> RoutePath {
        Self {
            segments: self
                .segments
                .iter()
                .skip(prefix.segments.len())
                .cloned()
                .collect(),
        }
    }

    /// Append `other` to `self`.
    pub fn concat(&self, other: &RoutePath) -> RoutePath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for RoutePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}
