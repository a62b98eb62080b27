//! Ant-style glob path-pattern matcher (C3).
//!
//! Accepts a comma-separated list of patterns; the aggregate matches a path
//! if any sub-pattern matches. Each sub-pattern supports:
//! - literal characters (escaped into the compiled regex)
//! - `?` — exactly one character, not `/`
//! - `*` — zero or more characters within one path segment (not `/`)
//! - `**` — zero or more characters, crossing segment boundaries

use regex::Regex;

use crate::error::CoreError;

/// A compiled comma-separated list of ant-style glob patterns.
#[derive(Debug, Clone)]
pub struct PathPattern {
    /// Original sub-patterns, in the order given, for the "explicit
    /// directory match" rule and for diagnostics.
    raw: Vec<String>,
    compiled: Vec<Regex>,
    /// Fast path recognized when the pattern list is exactly `["/**"]`.
    matches_all: bool,
}

impl PathPattern {
    /// Compile a comma-separated pattern list.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPattern`] if any sub-pattern fails to
    /// compile to a regex (this should not happen for well-formed glob
    /// input, since every character is either a glob metacharacter or
    /// escaped literally).
    pub fn new(patterns: &str) -> Result<Self, CoreError> {
        let raw: Vec<String> = patterns.split(',').map(str::to_owned).collect();
        let matches_all = raw.len() == 1 && raw[0] == "/**";

        let mut compiled = Vec::with_capacity(raw.len());
        for pattern in &raw {
            let regex_src = glob_to_regex(pattern);
            let regex = Regex::new(&regex_src).map_err(|e| CoreError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            compiled.push(regex);
        }

        Ok(Self {
            raw,
            compiled,
            matches_all,
        })
    }

    /// `true` if this pattern list reduces to the universal `/**` fast path.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.matches_all
    }

    /// Does any sub-pattern match `path`?
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if self.matches_all {
            return true;
        }
        self.compiled.iter().any(|re| re.is_match(path))
    }

    /// Directory-aware match for the tree walker: a directory counts as a
    /// match only if its path is listed *explicitly* — i.e. some
    /// sub-pattern, taken as a literal string, equals `path` exactly. A
    /// wildcard pattern that happens to match the directory's path does not
    /// count (only the files under it do).
    #[must_use]
    pub fn matches_directory(&self, path: &str) -> bool {
        self.raw.iter().any(|p| p == path)
    }
}

/// Translate one ant-style glob pattern into an anchored regex source.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push_str(".*");
                    i += 2;
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}
