//! Host state id matching.
//!
//! State ids are dot-separated strings like
//! "javascript.0.Rollershutters.Shutter_3.OpenButton". Subscriptions on the
//! host can be keyed by an explicit id or by a glob over id segments.
//!
//! Glob matching is segment based and does not need regex; the event
//! adapter uses regex only where it must capture parts of the id.

/// A segment in a state id pattern.
#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    /// Exact literal match for this segment
    Literal(String),
    /// Single wildcard (*) - matches exactly one segment when mid-id,
    /// or any suffix when at the end
    Wildcard,
}

/// A state id pattern that may contain wildcards.
///
/// Supported patterns:
/// - Exact: "javascript.0.Rollershutters.Links.OG.Command"
/// - Suffix wildcard: "javascript.0.Rollershutters.*"
/// - Mid-id wildcard: "javascript.0.Rollershutters.*.OpenButton"
/// - Full wildcard: "*"
#[derive(Debug, Clone)]
pub struct StatePattern {
    raw: String,
    segments: Vec<PatternSegment>,
    /// True if the pattern ends with a wildcard (matches any suffix)
    trailing_wildcard: bool,
}

impl StatePattern {
    /// Create a new state id pattern.
    ///
    /// - `*` at end matches any suffix
    /// - `*` in middle matches exactly one non-empty segment
    /// - `*` alone matches any id
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(PatternError::EmptySegment(pattern.to_string()));
        }

        let trailing_wildcard = parts.last() == Some(&"*");

        let segments = parts
            .iter()
            .map(|&s| {
                if s == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(s.to_string())
                }
            })
            .collect();

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            trailing_wildcard,
        })
    }

    /// Check if a state id matches this pattern.
    pub fn matches(&self, id: &str) -> bool {
        let id_parts: Vec<&str> = id.split('.').collect();

        if self.segments.len() == 1 && self.segments[0] == PatternSegment::Wildcard {
            return true;
        }

        if self.trailing_wildcard {
            // Trailing wildcard needs at least one segment to consume
            if id_parts.len() < self.segments.len() {
                return false;
            }
        } else if id_parts.len() != self.segments.len() {
            return false;
        }

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Literal(lit) => {
                    if id_parts[i] != lit {
                        return false;
                    }
                }
                PatternSegment::Wildcard => {
                    if self.trailing_wildcard && i == self.segments.len() - 1 {
                        return true;
                    }
                    if id_parts[i].is_empty() {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Get the raw pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for StatePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Errors that can occur when creating a state id pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,

    #[error("Empty segment in pattern: {0}")]
    EmptySegment(String),
}
