//! Deterministic cache key derivation.
//!
//! Keys are `"<namespace prefix>:<sha256 hex>"` where the digest covers the
//! operation namespace and the sorted `key:value` projection of the
//! parameters, so logically-equal parameter sets hash identically no matter
//! the field order they were built in.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cache namespaces with operation-specific default TTLs.
///
/// Diff contents churn with every push, so they get the shortest TTL;
/// completions for an identical prompt are stable and can live longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Raw pull-request diffs
    Diff,
    /// Pull-request metadata (title, author, state)
    PullRequest,
    /// Model completions for a fully-specified prompt
    Completion,
}

impl CacheNamespace {
    /// Get the default TTL for this namespace.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::Diff => Duration::from_secs(60),
            Self::PullRequest => Duration::from_secs(300),
            Self::Completion => Duration::from_secs(3600),
        }
    }

    /// Get the key prefix for this namespace.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Diff => "analysis:diff",
            Self::PullRequest => "analysis:pr",
            Self::Completion => "analysis:completion",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Derive the cache key for an operation and its parameters.
pub fn cache_key<T: Serialize>(namespace: CacheNamespace, params: &T) -> String {
    let projection = match serde_json::to_value(params) {
        Ok(serde_json::Value::Object(map)) => {
            let sorted: BTreeMap<String, serde_json::Value> = map.into_iter().collect();
            sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(":")
        }
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    };

    let mut hasher = Sha256::new();
    hasher.update(namespace.prefix().as_bytes());
    hasher.update(b":");
    hasher.update(projection.as_bytes());
    format!("{}:{}", namespace.prefix(), hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Params<'a> {
        owner: &'a str,
        repo: &'a str,
        pull_number: u64,
    }

    #[test]
    fn test_key_is_deterministic() {
        let params = Params {
            owner: "octocat",
            repo: "hello",
            pull_number: 42,
        };
        assert_eq!(
            cache_key(CacheNamespace::Diff, &params),
            cache_key(CacheNamespace::Diff, &params)
        );
    }

    #[test]
    fn test_key_varies_by_params_and_namespace() {
        let a = Params {
            owner: "octocat",
            repo: "hello",
            pull_number: 1,
        };
        let b = Params {
            owner: "octocat",
            repo: "hello",
            pull_number: 2,
        };
        assert_ne!(
            cache_key(CacheNamespace::Diff, &a),
            cache_key(CacheNamespace::Diff, &b)
        );
        assert_ne!(
            cache_key(CacheNamespace::Diff, &a),
            cache_key(CacheNamespace::PullRequest, &a)
        );
    }

    #[test]
    fn test_key_is_field_order_independent() {
        // Two maps with the same entries inserted in different orders
        let mut forward = serde_json::Map::new();
        forward.insert("a".into(), serde_json::json!(1));
        forward.insert("b".into(), serde_json::json!(2));

        let mut reverse = serde_json::Map::new();
        reverse.insert("b".into(), serde_json::json!(2));
        reverse.insert("a".into(), serde_json::json!(1));

        assert_eq!(
            cache_key(CacheNamespace::Completion, &forward),
            cache_key(CacheNamespace::Completion, &reverse)
        );
    }

    #[test]
    fn test_key_carries_namespace_prefix() {
        let key = cache_key(CacheNamespace::Completion, &serde_json::json!({"p": 1}));
        assert!(key.starts_with("analysis:completion:"));
    }

    #[test]
    fn test_namespace_ttls() {
        assert!(CacheNamespace::Diff.default_ttl() < CacheNamespace::PullRequest.default_ttl());
        assert!(
            CacheNamespace::PullRequest.default_ttl() < CacheNamespace::Completion.default_ttl()
        );
    }
}
