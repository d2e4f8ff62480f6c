//! Offline price table
//!
//! A TOML file keyed by resource type. Every entry is either `free = true` or
//! a list of tiers sharing one unit:
//!
//! ```toml
//! [resources."AWS::IAM::Role"]
//! free = true
//!
//! [resources."AWS::SQS::Queue"]
//! unit = "Requests"
//! tiers = [
//!     { start = "0", end = "1000000", price = "0" },
//!     { start = "1000000", price = "0.0000004" },
//! ]
//! ```
//!
//! The table is region-agnostic. Types not listed are unsupported.

use super::{order_tiers, PriceLookup, PricingSource};
use crate::error::{ConfigError, CostError, Result};
use crate::model::{PriceTier, Properties};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceFile {
    #[serde(default)]
    pub resources: BTreeMap<String, PriceEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceEntry {
    #[serde(default)]
    pub free: bool,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub tiers: Vec<TierRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRow {
    #[serde(default)]
    pub start: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Decimal>,
    pub price: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct StaticPriceTable {
    entries: BTreeMap<String, PriceLookup>,
}

impl StaticPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: PriceFile = toml::from_str(content)
            .map_err(|e| CostError::Config(ConfigError::ParseError(e.to_string())))?;

        let mut table = Self::new();
        for (resource_type, entry) in file.resources {
            if entry.free {
                table = table.with_free(resource_type);
                continue;
            }
            let tiers = entry
                .tiers
                .into_iter()
                .map(|row| PriceTier::new(row.start, row.end, row.price, entry.unit.clone()))
                .collect();
            table = table.with_tiers(resource_type, order_tiers(tiers));
        }
        Ok(table)
    }

    pub fn with_tiers(mut self, resource_type: impl Into<String>, tiers: Vec<PriceTier>) -> Self {
        self.entries.insert(resource_type.into(), PriceLookup::Tiers(tiers));
        self
    }

    pub fn with_free(mut self, resource_type: impl Into<String>) -> Self {
        self.entries.insert(resource_type.into(), PriceLookup::Free);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PricingSource for StaticPriceTable {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn lookup(
        &self,
        resource_type: &str,
        _region: &str,
        _properties: &Properties,
    ) -> Result<PriceLookup> {
        self.entries
            .get(resource_type)
            .cloned()
            .ok_or_else(|| CostError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            })
    }
}
