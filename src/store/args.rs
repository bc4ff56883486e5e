//! Paging descriptor for aspect scans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Resumable position within a paged scan: the last `(urn, aspect)` key handed out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScanCursor {
    pub urn: String,
    pub aspect_name: String,
}

impl ScanCursor {
    pub fn new(urn: impl Into<String>, aspect_name: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            aspect_name: aspect_name.into(),
        }
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.urn, self.aspect_name)
    }
}

impl FromStr for ScanCursor {
    type Err = StoreError;

    // URNs may contain '|' inside parenthesised keys, aspect names never do.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('|') {
            Some((urn, aspect)) if !urn.is_empty() && !aspect.is_empty() => {
                Ok(ScanCursor::new(urn, aspect))
            }
            _ => Err(StoreError::InvalidArgs(format!(
                "Invalid scan cursor '{}' (expected '<urn>|<aspect>')",
                s
            ))),
        }
    }
}

/// Descriptor of a paged aspect scan.
///
/// Two descriptors with the same fields are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreIndicesArgs {
    pub batch_size: usize,
    /// Maximum number of records to hand out; 0 scans the whole population.
    pub limit: usize,
    pub aspect_name: Option<String>,
    pub urn_like: Option<String>,
    pub start_after: Option<ScanCursor>,
}

impl Default for RestoreIndicesArgs {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            limit: 0,
            aspect_name: None,
            urn_like: None,
            start_after: None,
        }
    }
}

impl RestoreIndicesArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn aspect_name(mut self, aspect_name: impl Into<String>) -> Self {
        self.aspect_name = Some(aspect_name.into());
        self
    }

    pub fn urn_like(mut self, urn_like: impl Into<String>) -> Self {
        self.urn_like = Some(urn_like.into());
        self
    }

    pub fn start_after(mut self, cursor: Option<ScanCursor>) -> Self {
        self.start_after = cursor;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.batch_size == 0 {
            return Err(StoreError::InvalidArgs(
                "batch_size must be positive".to_string(),
            ));
        }
        if let Some(aspect) = &self.aspect_name {
            if aspect.trim().is_empty() {
                return Err(StoreError::InvalidArgs(
                    "aspect_name filter cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Compiled URN filter; matches everything when no pattern is set.
    pub fn urn_pattern(&self) -> UrnPattern {
        UrnPattern::new(self.urn_like.as_deref().unwrap_or("%"))
    }

    pub fn matches(&self, urn: &str, aspect_name: &str) -> bool {
        if let Some(wanted) = &self.aspect_name {
            if wanted != aspect_name {
                return false;
            }
        }
        self.urn_pattern().matches(urn)
    }
}

/// SQL `LIKE` pattern over entity URNs: `%` matches any run, `_` one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrnPattern {
    tokens: Vec<LikeToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LikeToken {
    Literal(char),
    AnyOne,
    AnyRun,
}

impl UrnPattern {
    pub fn new(pattern: &str) -> Self {
        let tokens = pattern
            .chars()
            .map(|c| match c {
                '%' => LikeToken::AnyRun,
                '_' => LikeToken::AnyOne,
                other => LikeToken::Literal(other),
            })
            .collect();
        Self { tokens }
    }

    /// Literal text before the first wildcard. Every match starts with it, so
    /// ordered stores can seek straight to it.
    pub fn literal_prefix(&self) -> String {
        self.tokens
            .iter()
            .map_while(|t| match t {
                LikeToken::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn matches(&self, urn: &str) -> bool {
        let text: Vec<char> = urn.chars().collect();
        // Greedy matcher with single backtrack point for the last '%'.
        let (mut t, mut p) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;
        while t < text.len() {
            match self.tokens.get(p) {
                Some(LikeToken::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                Some(LikeToken::AnyOne) => {
                    t += 1;
                    p += 1;
                }
                Some(LikeToken::AnyRun) => {
                    star = Some((p, t));
                    p += 1;
                }
                _ => match star {
                    Some((sp, st)) => {
                        p = sp + 1;
                        t = st + 1;
                        star = Some((sp, st + 1));
                    }
                    None => return false,
                },
            }
        }
        self.tokens[p..]
            .iter()
            .all(|token| *token == LikeToken::AnyRun)
    }
}
