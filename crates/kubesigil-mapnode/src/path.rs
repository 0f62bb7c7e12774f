//! Dotted field paths into a manifest document.
//!
//! Paths use dotted notation (`metadata.name`). A segment that itself
//! contains dots — Kubernetes annotation keys, mostly — is written
//! quoted: `metadata.annotations."kubectl.kubernetes.io/last-applied-configuration"`.
//! Sequence indices are not addressable; masks operate on mapping keys
//! only.

use std::fmt;

/// Errors from parsing a dotted field path.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    /// The path string was empty.
    #[error("empty field path")]
    Empty,

    /// A quoted segment was never closed.
    #[error("unterminated quote in field path `{0}`")]
    UnterminatedQuote(String),

    /// Two dots in a row, or a leading/trailing dot.
    #[error("empty segment in field path `{0}`")]
    EmptySegment(String),
}

/// A parsed field path: an ordered list of mapping keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path, honoring `"…"`-quoted segments.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars().peekable();
        let mut quoted = false;

        while let Some(c) = chars.next() {
            match c {
                '"' if current.is_empty() && !quoted => {
                    // Opening quote: consume until the closing quote.
                    quoted = true;
                    let mut closed = false;
                    for qc in chars.by_ref() {
                        if qc == '"' {
                            closed = true;
                            break;
                        }
                        current.push(qc);
                    }
                    // `quoted` stays set so an empty quoted segment ("") is
                    // not mistaken for a missing one. The closing quote must
                    // be followed by a dot or the end of the path.
                    if !closed || chars.peek().is_some_and(|&next| next != '.') {
                        return Err(PathError::UnterminatedQuote(s.to_owned()));
                    }
                }
                '.' => {
                    if current.is_empty() && !quoted {
                        return Err(PathError::EmptySegment(s.to_owned()));
                    }
                    segments.push(std::mem::take(&mut current));
                    quoted = false;
                }
                _ => current.push(c),
            }
        }

        if current.is_empty() && !quoted {
            return Err(PathError::EmptySegment(s.to_owned()));
        }
        segments.push(current);

        Ok(Self { segments })
    }

    /// Build a path from pre-split segments.
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// The mapping keys, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for a path with no segments (only constructible via
    /// [`FieldPath::from_segments`]).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `prefix` or descends from it.
    ///
    /// Prefixes match on whole segments: `data.key2` is not under
    /// `data.key`.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Append one segment, returning the extended path.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            if seg.contains('.') || seg.is_empty() {
                write!(f, "\"{seg}\"")?;
            } else {
                write!(f, "{seg}")?;
            }
        }
        Ok(())
    }
}
