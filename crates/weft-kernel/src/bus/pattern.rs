//! Subscription patterns
//!
//! Every subscription carries exactly one [`Pattern`]; matching goes through
//! [`Pattern::matches`] regardless of the variant.

use regex::Regex;

use super::error::{BusError, BusResult, IntoBusReport};

/// How a subscription selects event types.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches one event type exactly.
    Exact(String),
    /// Matches every event type (`*`).
    Wildcard,
    /// Shell-style glob where `*` matches any run of characters (`plugin:*`).
    Glob {
        source: String,
        compiled: Regex,
    },
    /// Arbitrary regular expression tested against the event type.
    Regex(Regex),
}

/// Coarse classification used by [`super::BusStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Exact,
    Pattern,
    Wildcard,
}

impl Pattern {
    /// Exact event type match.
    pub fn exact(event_type: impl Into<String>) -> Self {
        Self::Exact(event_type.into())
    }

    /// Compile a regular expression pattern.
    pub fn regex(source: &str) -> BusResult<Self> {
        Regex::new(source)
            .map(Self::Regex)
            .map_err(|e| BusError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })
            .into_report()
    }

    /// Build a glob pattern. A lone `*` becomes [`Pattern::Wildcard`].
    pub fn glob(source: &str) -> Self {
        if source == "*" {
            return Self::Wildcard;
        }
        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        // Escaped literals joined by `.*` always form a valid expression.
        match Regex::new(&format!("^{body}$")) {
            Ok(compiled) => Self::Glob {
                source: source.to_string(),
                compiled,
            },
            Err(_) => Self::Exact(source.to_string()),
        }
    }

    /// Parse the string form used by `on`/`once`: `*` is a wildcard, any
    /// other string containing `*` is a glob, everything else is exact.
    pub fn parse(source: &str) -> Self {
        if source.contains('*') {
            Self::glob(source)
        } else {
            Self::Exact(source.to_string())
        }
    }

    /// Test an event type against this pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == event_type,
            Pattern::Wildcard => true,
            Pattern::Glob { compiled, .. } => compiled.is_match(event_type),
            Pattern::Regex(re) => re.is_match(event_type),
        }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Pattern::Exact(_) => PatternKind::Exact,
            Pattern::Wildcard => PatternKind::Wildcard,
            Pattern::Glob { .. } | Pattern::Regex(_) => PatternKind::Pattern,
        }
    }

    /// Source text of the pattern, as it would be listed in `topics()`.
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(s) => s,
            Pattern::Wildcard => "*",
            Pattern::Glob { source, .. } => source,
            Pattern::Regex(re) => re.as_str(),
        }
    }

    /// Prepend a scope prefix (`"<prefix>:"`) to the pattern.
    pub(crate) fn scoped(&self, prefix: &str) -> Pattern {
        match self {
            Pattern::Exact(s) => Pattern::Exact(format!("{prefix}:{s}")),
            Pattern::Wildcard => Pattern::glob(&format!("{prefix}:*")),
            Pattern::Glob { source, .. } => Pattern::glob(&format!("{prefix}:{source}")),
            Pattern::Regex(re) => {
                let prefix = regex::escape(prefix);
                // An anchored source starts right after the prefix; an
                // unanchored one may match anywhere in the remainder.
                let scoped = match re.as_str().strip_prefix('^') {
                    Some(inner) => format!("^{prefix}:(?:{inner})"),
                    None => format!("^{prefix}:.*?(?:{})", re.as_str()),
                };
                Regex::new(&scoped)
                    .map(Pattern::Regex)
                    .unwrap_or_else(|_| Pattern::Regex(re.clone()))
            }
        }
    }
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Self {
        Pattern::parse(source)
    }
}

impl From<String> for Pattern {
    fn from(source: String) -> Self {
        Pattern::parse(&source)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Pattern::Regex(re)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}
