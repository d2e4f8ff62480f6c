//! Pricing sources
//!
//! A pricing source answers one question: what are the price tiers for this
//! resource in this region? It has three distinguishable outcomes:
//!
//! - `Ok(PriceLookup::Tiers(..))` / `Ok(PriceLookup::Free)`
//! - `Err(CostError::UnsupportedResourceType)`: no mapping for the type
//! - `Err(CostError::PricingLookupFailed)`: the source was unreachable or its
//!   answer could not be read
//!
//! ## Implementations
//!
//! - `infracost`: Infracost Cloud Pricing GraphQL API over `reqwest`
//! - `aws`: AWS Price List API (`GetProducts`) over `aws-sdk-pricing`
//! - `static_table`: offline TOML price file, no network
//! - `cache`: wrapper that memoizes successful lookups of any source
//!
//! Network sources retry transient failures themselves; callers never retry.

pub mod aws;
pub mod cache;
pub mod infracost;
pub mod static_table;

pub use aws::AwsPriceListSource;
pub use cache::CachedSource;
pub use infracost::InfracostSource;
pub use static_table::StaticPriceTable;

use crate::config::{Config, PricingSourceKind};
use crate::error::{ConfigError, Result};
use crate::model::{PriceTier, Properties};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Successful answer from a pricing source
#[derive(Debug, Clone, PartialEq)]
pub enum PriceLookup {
    /// Ordered tier curve; may be empty when the source knows the type but
    /// returned no prices for it
    Tiers(Vec<PriceTier>),
    /// The resource type is never billed
    Free,
}

/// Something that can price a resource type in a region
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Short name recorded on every `ResourceCost` this source priced
    fn name(&self) -> &'static str;

    async fn lookup(
        &self,
        resource_type: &str,
        region: &str,
        properties: &Properties,
    ) -> Result<PriceLookup>;
}

#[async_trait]
impl<S: PricingSource + ?Sized> PricingSource for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn lookup(
        &self,
        resource_type: &str,
        region: &str,
        properties: &Properties,
    ) -> Result<PriceLookup> {
        (**self).lookup(resource_type, region, properties).await
    }
}

/// Build the configured pricing source, wrapped in a process-lifetime cache
pub async fn from_config(config: &Config) -> Result<Arc<dyn PricingSource>> {
    let source: Arc<dyn PricingSource> = match config.pricing.source {
        PricingSourceKind::Infracost => {
            let api_key = config
                .api_key()
                .ok_or_else(|| ConfigError::MissingField("pricing.api_key".to_string()))?;
            Arc::new(CachedSource::new(InfracostSource::from_config(
                &config.pricing,
                api_key,
            )?))
        }
        PricingSourceKind::Aws => {
            Arc::new(CachedSource::new(AwsPriceListSource::from_env(&config.pricing).await))
        }
        PricingSourceKind::Static => {
            let path = config
                .pricing
                .price_file
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField("pricing.price_file".to_string()))?;
            Arc::new(StaticPriceTable::load(path)?)
        }
    };
    Ok(source)
}

/// Order raw price points into a tier curve
///
/// Sources report tiers in whatever order the API returns them. The
/// aggregator validates contiguity, so this only sorts.
pub(crate) fn order_tiers(mut tiers: Vec<PriceTier>) -> Vec<PriceTier> {
    tiers.sort_by(|a, b| a.start_usage.cmp(&b.start_usage));
    tiers
}

/// Parse a price or range bound as reported by pricing APIs
///
/// `None` for an absent bound or one of the spellings of infinity.
pub(crate) fn parse_bound(raw: Option<&str>) -> std::result::Result<Option<Decimal>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("infinity") => {
            Ok(None)
        }
        Some(s) => Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .map(Some)
            .map_err(|e| format!("invalid number '{}': {}", s, e)),
    }
}
