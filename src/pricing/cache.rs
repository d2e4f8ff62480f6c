//! Memoizing wrapper around a pricing source
//!
//! Entries are keyed by resource type, region and the canonical JSON of the
//! resource's properties, and live for the lifetime of the wrapper unless
//! `clear` is called. Only successful lookups are stored.

use super::{PriceLookup, PricingSource};
use crate::error::Result;
use crate::model::Properties;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    resource_type: String,
    region: String,
    properties: String,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CachedSource<S> {
    inner: S,
    entries: Arc<Mutex<HashMap<CacheKey, PriceLookup>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: PricingSource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            entries: Arc::new(Mutex::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Drop every cached entry
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<S: PricingSource> PricingSource for CachedSource<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn lookup(
        &self,
        resource_type: &str,
        region: &str,
        properties: &Properties,
    ) -> Result<PriceLookup> {
        let key = CacheKey {
            resource_type: resource_type.to_string(),
            region: region.to_string(),
            properties: canonical_json(properties),
        };

        let cached = self.entries.lock().await.get(&key).cloned();
        if let Some(hit) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(resource_type, region, "price cache hit");
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Lock is not held across the lookup; concurrent misses on one key both fetch
        let lookup = self.inner.lookup(resource_type, region, properties).await?;
        self.entries.lock().await.insert(key, lookup.clone());
        Ok(lookup)
    }
}

/// Serialize with object keys sorted at every level
fn canonical_json(properties: &Properties) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(&Value::Object(properties.clone())).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CostError;
    use crate::pricing::MockPricingSource;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_repeated_lookup_served_from_cache() {
        let mut mock = MockPricingSource::new();
        mock.expect_lookup()
            .times(1)
            .returning(|_, _, _| Ok(PriceLookup::Free));
        let cached = CachedSource::new(mock);

        let p = props(json!({ "a": 1, "b": { "y": 2, "x": 1 } }));
        let reordered = props(json!({ "b": { "x": 1, "y": 2 }, "a": 1 }));
        cached.lookup("AWS::IAM::Role", "us-east-1", &p).await.unwrap();
        cached.lookup("AWS::IAM::Role", "us-east-1", &reordered).await.unwrap();

        assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(cached.len().await, 1);
    }

    #[tokio::test]
    async fn test_region_is_part_of_key() {
        let mut mock = MockPricingSource::new();
        mock.expect_lookup()
            .times(2)
            .returning(|_, _, _| Ok(PriceLookup::Tiers(Vec::new())));
        let cached = CachedSource::new(mock);

        let p = Properties::new();
        cached.lookup("AWS::SQS::Queue", "us-east-1", &p).await.unwrap();
        cached.lookup("AWS::SQS::Queue", "eu-west-1", &p).await.unwrap();
        assert_eq!(cached.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mut mock = MockPricingSource::new();
        mock.expect_lookup()
            .times(2)
            .returning(|_, _, _| Err(CostError::lookup_failed("mock", "down", None)));
        let cached = CachedSource::new(mock);

        let p = Properties::new();
        assert!(cached.lookup("AWS::SQS::Queue", "us-east-1", &p).await.is_err());
        assert!(cached.lookup("AWS::SQS::Queue", "us-east-1", &p).await.is_err());
        assert_eq!(cached.len().await, 0);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let mut mock = MockPricingSource::new();
        mock.expect_lookup()
            .times(2)
            .returning(|_, _, _| Ok(PriceLookup::Free));
        let cached = CachedSource::new(mock);

        let p = Properties::new();
        cached.lookup("AWS::IAM::Role", "us-east-1", &p).await.unwrap();
        cached.clear().await;
        cached.lookup("AWS::IAM::Role", "us-east-1", &p).await.unwrap();
        assert_eq!(cached.stats().misses, 2);
    }
}
