//! `%`-wildcard patterns used by the `$like` operator family and `$search` terms.
//!
//! A pattern is a literal string where every `%` stands for "any run of
//! characters, possibly empty". No other character is special. Backends turn a
//! pattern into an anchored regular expression or a SQLite `GLOB` via the
//! helpers below.

/// Wildcard marker.
pub const WILDCARD: char = '%';

/// A borrowed `%`-wildcard pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikePattern<'a> {
    source: &'a str,
}

impl<'a> LikePattern<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    pub fn as_str(&self) -> &'a str {
        self.source
    }

    /// Literal segments between wildcards.
    pub fn segments(&self) -> impl Iterator<Item = &'a str> {
        self.source.split(WILDCARD)
    }

    /// Anchored regular-expression body, without inline flags.
    ///
    /// Uses `\A` and `\z` so the expression behaves identically under the Rust
    /// `regex` engine and PCRE.
    pub fn regex_body(&self) -> String {
        format!(
            "\\A{}\\z",
            self.segments()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        )
    }

    /// Anchored regular expression with inline flags for the Rust `regex` engine.
    pub fn to_regex(&self, case_insensitive: bool) -> String {
        format!(
            "{}{}",
            if case_insensitive { "(?is)" } else { "(?s)" },
            self.regex_body()
        )
    }

    /// SQLite `GLOB` pattern (case-sensitive match).
    pub fn to_glob(&self) -> String {
        let mut glob = String::with_capacity(self.source.len());

        for ch in self.source.chars() {
            match ch {
                WILDCARD => glob.push('*'),
                '*' => glob.push_str("[*]"),
                '?' => glob.push_str("[?]"),
                '[' => glob.push_str("[[]"),
                other => glob.push(other),
            }
        }

        glob
    }
}

/// Splits a `$search` value into lowercase terms.
pub fn search_terms(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Case-insensitive regular expression matching `literal` anywhere in a value.
pub fn contains_regex(literal: &str) -> String {
    format!("(?is){}", regex::escape(literal))
}
