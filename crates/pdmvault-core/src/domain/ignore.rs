//! Ignore filter
//!
//! An ordered list of glob rules, evaluated gitignore-style:
//!
//! - a pattern without `/` is matched against single path components
//!   (`*.tmp`, `~$*`, `node_modules`)
//! - a pattern containing `/` is anchored at the vault root (`build/out`, `**/*.bak`)
//! - a trailing `/` restricts the rule to directories
//! - a leading `!` re-includes what an earlier rule excluded
//! - the last matching rule wins
//!
//! Once a directory is ignored, everything beneath it is ignored; a negated
//! rule cannot re-include a file inside an ignored directory.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::errors::DomainError;
use super::newtypes::RelativePath;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct IgnoreRule {
    source: String,
    pattern: Pattern,
    negated: bool,
    directory_only: bool,
    anchored: bool,
}

impl IgnoreRule {
    fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut body = raw.trim();
        let negated = body.starts_with('!');
        if negated {
            body = &body[1..];
        }
        let directory_only = body.ends_with('/');
        let body = body.trim_end_matches('/').trim_start_matches('/');
        if body.is_empty() {
            return Err(DomainError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        let pattern = Pattern::new(body).map_err(|e| DomainError::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: raw.to_string(),
            pattern,
            negated,
            directory_only,
            anchored: body.contains('/'),
        })
    }

    /// `prefix` is the path up to and including `component`
    fn matches(&self, prefix: &str, component: &str, is_dir: bool) -> bool {
        if self.directory_only && !is_dir {
            return false;
        }
        let target = if self.anchored { prefix } else { component };
        self.pattern.matches_with(target, MATCH_OPTIONS)
    }
}

/// Ordered, vault-scoped set of ignore rules
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRuleSet {
    /// Compile an ordered rule list; blank lines and `#` comments are skipped
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPattern` for the first malformed rule
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DomainError> {
        let rules = patterns
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| !p.trim().is_empty() && !p.trim_start().starts_with('#'))
            .map(IgnoreRule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// An empty set that ignores nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the rule sources in evaluation order
    pub fn patterns(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.source.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if `path` (a directory when `is_dir`) is excluded
    pub fn is_ignored(&self, path: &RelativePath, is_dir: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let full = path.as_str();
        let components: Vec<&str> = full.split('/').collect();
        let last = components.len() - 1;
        let mut end = 0;
        for (i, component) in components.iter().enumerate() {
            end += component.len();
            let prefix = &full[..end];
            let prefix_is_dir = i < last || is_dir;
            if self.evaluate(prefix, component, prefix_is_dir) {
                trace!(path = %path, ignored_at = %prefix, "Path ignored");
                return true;
            }
            end += 1;
        }
        false
    }

    fn evaluate(&self, prefix: &str, component: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(prefix, component, is_dir))
            .map(|rule| !rule.negated)
            .unwrap_or(false)
    }
}

impl PartialEq for IgnoreRuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.patterns() == other.patterns()
    }
}

impl Eq for IgnoreRuleSet {}

impl TryFrom<Vec<String>> for IgnoreRuleSet {
    type Error = DomainError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<IgnoreRuleSet> for Vec<String> {
    fn from(value: IgnoreRuleSet) -> Self {
        value.patterns()
    }
}

impl Serialize for IgnoreRuleSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.patterns().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IgnoreRuleSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let patterns = Vec::<String>::deserialize(deserializer)?;
        Self::new(&patterns).map_err(serde::de::Error::custom)
    }
}
