//! Context configuration.

use serde::Deserialize;

use crate::cache::CacheConfig;

/// What `save_changes` does when an optimistic update or delete matches
/// zero rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ConflictPolicy {
    /// Log a warning, count it in the commit summary and carry on.
    #[default]
    Report,
    /// Fail the commit with an optimistic-conflict error.
    Raise,
}

/// Settings a [`Context`](crate::Context) is built with.
///
/// ```ignore
/// let config: ContextConfig = serde_json::from_str(r#"{"conflict_policy": "Raise"}"#)?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Skip native begin/commit/rollback; each statement commits on its own.
    pub auto_commit: bool,
    pub conflict_policy: ConflictPolicy,
    pub cache: CacheConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert!(!config.auto_commit);
        assert_eq!(config.conflict_policy, ConflictPolicy::Report);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"conflict_policy": "Raise", "auto_commit": true}"#).unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::Raise);
        assert!(config.auto_commit);
        assert_eq!(config.cache.short_life.as_secs(), 30);
    }
}
