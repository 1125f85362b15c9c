//! Cached regular expressions for lenient coercion and LIKE matching.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

/// Characters kept when a non-numeric value is coerced to a number.
pub const NUMERIC_RESIDUE: &str = r"[^0-9.\-]";

/// Thread-safe cache of compiled patterns.
///
/// Patterns are compiled lazily on first use and kept for the lifetime of
/// the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

fn compiled(pattern: &str) -> Option<Regex> {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern = pattern, error = %e, "invalid regex pattern");
            None
        }
    }
}

/// Check if a string matches a regex pattern. Invalid patterns never match.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    compiled(pattern).is_some_and(|regex| regex.is_match(value))
}

/// Remove every match of `pattern` from `value`.
pub fn strip(value: &str, pattern: &str) -> String {
    match compiled(pattern) {
        Some(regex) => regex.replace_all(value, "").into_owned(),
        None => value.to_string(),
    }
}

/// Escape character emitted with `LIKE ... ESCAPE`.
pub const LIKE_ESCAPE: char = '\\';

/// Evaluate a SQL `LIKE` pattern (`%` any run, `_` one character).
pub fn sql_like(value: &str, like: &str) -> bool {
    sql_like_escaped(value, like, None)
}

/// [`sql_like`] where `escape` makes the following character literal.
pub fn sql_like_escaped(value: &str, like: &str, escape: Option<char>) -> bool {
    let mut pattern = String::with_capacity(like.len() + 8);
    pattern.push_str("(?s)^");
    let mut chars = like.chars();
    while let Some(ch) = chars.next() {
        match ch {
            _ if Some(ch) == escape => {
                let literal = chars.next().unwrap_or(ch);
                pattern.push_str(&regex::escape(&literal.to_string()));
            }
            '%' => pattern.push_str(".*"),
            '_' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    matches_pattern(value, &pattern)
}

/// `text` with LIKE metacharacters escaped by [`LIKE_ESCAPE`], or `None`
/// when it has none.
pub fn escape_like(text: &str) -> Option<String> {
    if !text.contains(['%', '_', LIKE_ESCAPE]) {
        return None;
    }
    let mut escaped = String::with_capacity(text.len() + 4);
    for ch in text.chars() {
        if matches!(ch, '%' | '_') || ch == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    Some(escaped)
}
