//! stackcost library
//!
//! Estimates the monthly cost impact of a change between two versions of a
//! CloudFormation template: a structural diff of the declared resources plus
//! a per-resource price resolved from tiered, usage-dependent price curves.

pub mod catalog;
pub mod compare;
pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod pricing;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod template;
pub mod tiers;
pub mod usage;

// Re-export commonly used types
pub use compare::{cancellation, CancelHandle, CancelToken, Side, StackComparator, StackComparison};
pub use config::Config;
pub use diff::{diff, summarize, DiffSummary};
pub use error::{CostError, Result};
pub use model::{
    ChangeType, PriceTier, PricingModel, Properties, PropertyAccess, Resource, ResourceCost,
    ResourceDiff, UsageVolume,
};
pub use pricing::{PriceLookup, PricingSource};
pub use resolver::CostResolver;
pub use tiers::aggregate;
