//! Resource model shared by the diff engine, the resolver and the comparator
//!
//! Everything here is plain data: built once, never mutated afterwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Property bag of a declared resource
pub type Properties = Map<String, Value>;

/// A declared infrastructure object from one template snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Resource {
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties,
        }
    }
}

/// Outcome of a typed property lookup that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property '{key}' is missing")]
    Missing { key: String },

    #[error("property '{key}' is not a {expected}")]
    WrongType { key: String, expected: &'static str },
}

impl PropertyError {
    pub fn is_missing(&self) -> bool {
        matches!(self, PropertyError::Missing { .. })
    }
}

/// Typed accessors over a property bag
///
/// Templates quote numbers as often as not (`"MemorySize": "512"`), so the
/// numeric accessors also accept numeric strings.
pub trait PropertyAccess {
    fn raw_prop(&self, key: &str) -> Result<&Value, PropertyError>;

    fn str_prop(&self, key: &str) -> Result<&str, PropertyError> {
        self.raw_prop(key)?
            .as_str()
            .ok_or_else(|| wrong_type(key, "string"))
    }

    fn u64_prop(&self, key: &str) -> Result<u64, PropertyError> {
        match self.raw_prop(key)? {
            Value::Number(n) => n.as_u64().ok_or_else(|| wrong_type(key, "unsigned integer")),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| wrong_type(key, "unsigned integer")),
            _ => Err(wrong_type(key, "unsigned integer")),
        }
    }

    fn decimal_prop(&self, key: &str) -> Result<Decimal, PropertyError> {
        match self.raw_prop(key)? {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .map_err(|_| wrong_type(key, "decimal")),
            Value::String(s) => {
                Decimal::from_str(s.trim()).map_err(|_| wrong_type(key, "decimal"))
            }
            _ => Err(wrong_type(key, "decimal")),
        }
    }

    fn bool_prop(&self, key: &str) -> Result<bool, PropertyError> {
        match self.raw_prop(key)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(wrong_type(key, "boolean")),
        }
    }

    fn object_prop(&self, key: &str) -> Result<&Properties, PropertyError> {
        self.raw_prop(key)?
            .as_object()
            .ok_or_else(|| wrong_type(key, "object"))
    }

    fn array_prop(&self, key: &str) -> Result<&Vec<Value>, PropertyError> {
        self.raw_prop(key)?
            .as_array()
            .ok_or_else(|| wrong_type(key, "array"))
    }
}

fn wrong_type(key: &str, expected: &'static str) -> PropertyError {
    PropertyError::WrongType {
        key: key.to_string(),
        expected,
    }
}

impl PropertyAccess for Properties {
    fn raw_prop(&self, key: &str) -> Result<&Value, PropertyError> {
        self.get(key).ok_or_else(|| PropertyError::Missing {
            key: key.to_string(),
        })
    }
}

impl PropertyAccess for Resource {
    fn raw_prop(&self, key: &str) -> Result<&Value, PropertyError> {
        self.properties.raw_prop(key)
    }
}

/// One segment of a piecewise unit-price curve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// Inclusive lower bound
    pub start_usage: Decimal,
    /// Exclusive upper bound; `None` is unbounded
    pub end_usage: Option<Decimal>,
    pub unit_price: Decimal,
    pub unit: String,
}

impl PriceTier {
    pub fn new(
        start_usage: Decimal,
        end_usage: Option<Decimal>,
        unit_price: Decimal,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            start_usage,
            end_usage,
            unit_price,
            unit: unit.into(),
        }
    }

    /// Single unbounded tier starting at zero
    pub fn flat(unit_price: Decimal, unit: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, None, unit_price, unit)
    }

    /// Width of the tier, `None` when unbounded
    pub fn width(&self) -> Option<Decimal> {
        self.end_usage.map(|end| end - self.start_usage)
    }
}

/// How an estimated usage volume relates to the bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageBasis {
    /// Billed for the whole amount regardless of traffic (instance-hours)
    Provisioned,
    /// A guess at demand-driven consumption (requests, GB stored)
    Traffic,
}

/// Estimated monthly consumption in the unit of the resource's price tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageVolume {
    pub amount: Decimal,
    pub unit: String,
    pub basis: UsageBasis,
}

impl UsageVolume {
    pub fn provisioned(amount: Decimal, unit: impl Into<String>) -> Self {
        Self {
            amount,
            unit: unit.into(),
            basis: UsageBasis::Provisioned,
        }
    }

    pub fn traffic(amount: Decimal, unit: impl Into<String>) -> Self {
        Self {
            amount,
            unit: unit.into(),
            basis: UsageBasis::Traffic,
        }
    }
}

/// How a resource is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    Fixed,
    UsageBased,
    Free,
    Error,
}

impl fmt::Display for PricingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PricingModel::Fixed => "fixed",
            PricingModel::UsageBased => "usage-based",
            PricingModel::Free => "free",
            PricingModel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Usage consumed within one tier and what it cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierApplication {
    pub tier: PriceTier,
    pub applied_usage: Decimal,
    pub subtotal: Decimal,
}

/// Resolved cost of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCost {
    pub logical_id: String,
    pub resource_type: String,
    pub pricing_model: PricingModel,
    pub hourly_cost: Option<Decimal>,
    pub monthly_cost: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tier_breakdown: Vec<TierApplication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceCost {
    pub fn free(resource: &Resource, source: impl Into<String>) -> Self {
        Self {
            logical_id: resource.logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            pricing_model: PricingModel::Free,
            hourly_cost: Some(Decimal::ZERO),
            monthly_cost: Some(Decimal::ZERO),
            tier_breakdown: Vec::new(),
            usage: None,
            source: Some(source.into()),
            error: None,
        }
    }

    pub fn failed(resource: &Resource, message: impl Into<String>) -> Self {
        Self {
            logical_id: resource.logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            pricing_model: PricingModel::Error,
            hourly_cost: None,
            monthly_cost: None,
            tier_breakdown: Vec::new(),
            usage: None,
            source: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.pricing_model == PricingModel::Error
    }
}

/// Classification of one logical id across two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Modified => "modified",
            ChangeType::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Old and new value of one top-level property; `None` means absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub logical_id: String,
    pub resource_type: String,
    pub change_type: ChangeType,
    pub property_changes: BTreeMap<String, PropertyChange>,
}
