//! Hierarchical statement namespaces.
//!
//! A [`Namespace`] is the dotted name path of a statement's identifier inside its
//! context (`foo.bar.lemma`). Delegate tree nodes are keyed by namespace prefixes;
//! the root namespace (no segments) is the prefix of everything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::NAMESPACE_SEPARATOR;

/// A dotted name path. The empty path is the root namespace.
///
/// Segments are never empty and never contain the separator, so the dotted
/// form is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Namespace(Vec<String>);

/// Error returned for a malformed namespace or segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid namespace '{value}': {reason}")]
pub struct NamespaceParseError {
    /// The rejected input
    pub value: String,
    pub reason: &'static str,
}

fn check_segment(segment: &str) -> Result<(), NamespaceParseError> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment.contains(NAMESPACE_SEPARATOR) {
        "segment contains the separator"
    } else {
        return Ok(());
    };
    Err(NamespaceParseError {
        value: segment.to_string(),
        reason,
    })
}

impl Namespace {
    /// The root namespace.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a namespace from its segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, NamespaceParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            check_segment(segment)?;
        }
        Ok(Self(segments))
    }

    /// Parse a dotted path; the empty string is the root namespace.
    pub fn parse(value: &str) -> Result<Self, NamespaceParseError> {
        value.parse()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The last segment, `None` for the root namespace.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The enclosing namespace, `None` for the root namespace.
    pub fn parent(&self) -> Option<Namespace> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// A direct child namespace.
    pub fn child(&self, name: impl Into<String>) -> Result<Namespace, NamespaceParseError> {
        let name = name.into();
        check_segment(&name)?;
        let mut segments = self.0.clone();
        segments.push(name);
        Ok(Self(segments))
    }

    /// Whether `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Namespace) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Every prefix of this namespace, from the root down to `self` inclusive.
    pub fn prefixes(&self) -> Vec<Namespace> {
        (0..=self.0.len())
            .map(|len| Self(self.0[..len].to_vec()))
            .collect()
    }
}

impl FromStr for Namespace {
    type Err = NamespaceParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Ok(Self::root());
        }
        if value.split(NAMESPACE_SEPARATOR).any(str::is_empty) {
            return Err(NamespaceParseError {
                value: value.to_string(),
                reason: "empty segment",
            });
        }
        Ok(Self(
            value.split(NAMESPACE_SEPARATOR).map(str::to_string).collect(),
        ))
    }
}

impl TryFrom<Vec<String>> for Namespace {
    type Error = NamespaceParseError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_segments(segments)
    }
}

impl From<Namespace> for Vec<String> {
    fn from(namespace: Namespace) -> Self {
        namespace.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                write!(f, "{NAMESPACE_SEPARATOR}")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let ns = Namespace::parse("foo.bar").unwrap();
        assert_eq!(ns.segments(), ["foo", "bar"]);
        assert_eq!(ns.to_string(), "foo.bar");
        assert!(Namespace::parse("").unwrap().is_root());
        assert!("foo..bar".parse::<Namespace>().is_err());
    }

    #[test]
    fn prefix_relation() {
        let root = Namespace::root();
        let foo = Namespace::parse("foo").unwrap();
        let foobar = Namespace::parse("foo.bar").unwrap();
        let food = Namespace::parse("food").unwrap();
        assert!(root.is_prefix_of(&foobar));
        assert!(foo.is_prefix_of(&foobar));
        assert!(foobar.is_prefix_of(&foobar));
        assert!(!foobar.is_prefix_of(&foo));
        assert!(!foo.is_prefix_of(&food));
    }

    #[test]
    fn prefixes_run_from_root() {
        let ns = Namespace::parse("a.b").unwrap();
        assert_eq!(
            ns.prefixes(),
            vec![Namespace::root(), Namespace::parse("a").unwrap(), ns.clone()]
        );
        assert_eq!(ns.parent(), Some(Namespace::parse("a").unwrap()));
        assert_eq!(Namespace::root().parent(), None);
        assert_eq!(Namespace::parse("a").unwrap().child("b").unwrap(), ns);
    }

    #[test]
    fn segments_cannot_hide_the_separator() {
        let err = Namespace::from_segments(["a.b"]).unwrap_err();
        assert_eq!(err.reason, "segment contains the separator");
        assert!(Namespace::from_segments(["a", ""]).is_err());
        assert!(Namespace::root().child("x.y").is_err());
        assert_eq!(
            Namespace::from_segments(["a", "b"]).unwrap(),
            Namespace::parse("a.b").unwrap()
        );

        let decoded: Result<Namespace, _> = serde_json::from_str(r#"["a.b"]"#);
        assert!(decoded.is_err());
        let ns = Namespace::parse("a.b").unwrap();
        let json = serde_json::to_string(&ns).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        assert_eq!(serde_json::from_str::<Namespace>(&json).unwrap(), ns);
    }
}
