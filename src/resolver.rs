//! Per-resource cost resolution
//!
//! Glues a pricing source, the usage heuristics and the tier aggregator into
//! a single `ResourceCost`. `resolve` never fails: every error is folded into
//! a `PricingModel::Error` record for that resource so one bad lookup cannot
//! sink a whole comparison. Retrying is the pricing source's business.

use crate::error::{CostError, Result};
use crate::model::{PricingModel, Resource, ResourceCost, UsageBasis};
use crate::pricing::{PriceLookup, PricingSource};
use crate::tiers::{self, aggregate};
use crate::usage::{units_match, DefaultUsageHeuristics, UsageHeuristics};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const FALLBACK_SOURCE: &str = "fallback";
pub const NO_PRICING_DATA: &str = "no pricing data available";

pub struct CostResolver {
    source: Arc<dyn PricingSource>,
    heuristics: Arc<dyn UsageHeuristics>,
    fallback_costs: BTreeMap<String, Decimal>,
    usage_overrides: BTreeMap<String, Decimal>,
    region: String,
}

impl CostResolver {
    pub fn new(source: Arc<dyn PricingSource>, region: impl Into<String>) -> Self {
        Self {
            source,
            heuristics: Arc::new(DefaultUsageHeuristics),
            fallback_costs: BTreeMap::new(),
            usage_overrides: BTreeMap::new(),
            region: region.into(),
        }
    }

    pub fn with_heuristics(mut self, heuristics: Arc<dyn UsageHeuristics>) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Monthly figures used when the source knows a type but has no tiers for it
    pub fn with_fallback_costs(mut self, fallback_costs: BTreeMap<String, Decimal>) -> Self {
        self.fallback_costs = fallback_costs;
        self
    }

    /// Monthly usage amounts keyed by logical id, replacing the heuristic estimate
    pub fn with_usage_overrides(mut self, usage_overrides: BTreeMap<String, Decimal>) -> Self {
        self.usage_overrides = usage_overrides;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resolve the cost of one resource
    pub async fn resolve(&self, resource: &Resource) -> ResourceCost {
        match self.try_resolve(resource).await {
            Ok(cost) => {
                debug!(
                    logical_id = %resource.logical_id,
                    resource_type = %resource.resource_type,
                    model = %cost.pricing_model,
                    monthly = ?cost.monthly_cost,
                    "resolved resource cost"
                );
                cost
            }
            Err(e) => {
                warn!(
                    logical_id = %resource.logical_id,
                    resource_type = %resource.resource_type,
                    "failed to price resource: {}",
                    e
                );
                ResourceCost::failed(resource, e.to_string())
            }
        }
    }

    async fn try_resolve(&self, resource: &Resource) -> Result<ResourceCost> {
        let lookup = self
            .source
            .lookup(&resource.resource_type, &self.region, &resource.properties)
            .await?;

        let tiers = match lookup {
            PriceLookup::Free => return Ok(ResourceCost::free(resource, self.source.name())),
            PriceLookup::Tiers(tiers) if tiers.is_empty() => return self.fallback(resource),
            PriceLookup::Tiers(tiers) => tiers,
        };

        let mut usage = self
            .heuristics
            .estimate_usage(&resource.resource_type, &resource.properties);
        if let Some(amount) = self.usage_overrides.get(&resource.logical_id) {
            debug!(logical_id = %resource.logical_id, %amount, "using usage override");
            usage.amount = *amount;
        }
        if let Some(tier) = tiers.iter().find(|t| !units_match(&usage.unit, &t.unit)) {
            return Err(CostError::UnitMismatch {
                usage_unit: usage.unit,
                tier_unit: tier.unit.clone(),
            });
        }
        let result = aggregate(&tiers, usage.amount)?;

        let pricing_model = match usage.basis {
            UsageBasis::Provisioned => PricingModel::Fixed,
            UsageBasis::Traffic => PricingModel::UsageBased,
        };
        let tier_breakdown = if pricing_model == PricingModel::UsageBased && tiers.len() > 1 {
            result.breakdown
        } else {
            Vec::new()
        };

        Ok(ResourceCost {
            logical_id: resource.logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            pricing_model,
            hourly_cost: Some(tiers::round_hourly(tiers::hourly_from_monthly(result.total))),
            monthly_cost: Some(tiers::round_currency(result.total)),
            tier_breakdown,
            usage: Some(usage),
            source: Some(self.source.name().to_string()),
            error: None,
        })
    }

    fn fallback(&self, resource: &Resource) -> Result<ResourceCost> {
        let monthly = self
            .fallback_costs
            .get(&resource.resource_type)
            .copied()
            .ok_or_else(|| CostError::lookup_failed(self.source.name(), NO_PRICING_DATA, None))?;

        debug!(
            logical_id = %resource.logical_id,
            resource_type = %resource.resource_type,
            "using fallback cost"
        );
        Ok(ResourceCost {
            logical_id: resource.logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            pricing_model: PricingModel::Fixed,
            hourly_cost: Some(tiers::round_hourly(tiers::hourly_from_monthly(monthly))),
            monthly_cost: Some(tiers::round_currency(monthly)),
            tier_breakdown: Vec::new(),
            usage: None,
            source: Some(FALLBACK_SOURCE.to_string()),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PriceTier, Properties, UsageVolume};
    use crate::pricing::MockPricingSource;
    use mockall::predicate::eq;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    struct FixedUsage(UsageVolume);

    impl UsageHeuristics for FixedUsage {
        fn estimate_usage(&self, _: &str, _: &Properties) -> UsageVolume {
            self.0.clone()
        }
    }

    fn resource(resource_type: &str) -> Resource {
        Resource::new("Thing", resource_type, Properties::new())
    }

    fn mock_returning(lookup: Result<PriceLookup>) -> MockPricingSource {
        let mut mock = MockPricingSource::new();
        mock.expect_name().return_const("mock");
        let mut lookup = Some(lookup);
        mock.expect_lookup()
            .times(1)
            .returning(move |_, _, _| lookup.take().unwrap_or(Ok(PriceLookup::Free)));
        mock
    }

    fn two_tier() -> Vec<PriceTier> {
        vec![
            PriceTier::new(d("0"), Some(d("100")), d("1"), "Requests"),
            PriceTier::new(d("100"), None, d("0.5"), "Requests"),
        ]
    }

    #[tokio::test]
    async fn test_usage_based_with_breakdown() {
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(two_tier())))), "us-east-1")
            .with_heuristics(Arc::new(FixedUsage(UsageVolume::traffic(d("150"), "Requests"))));

        let cost = resolver.resolve(&resource("AWS::SQS::Queue")).await;
        assert_eq!(cost.pricing_model, PricingModel::UsageBased);
        assert_eq!(cost.monthly_cost, Some(d("125")));
        assert_eq!(cost.tier_breakdown.len(), 2);
        assert_eq!(cost.source.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_provisioned_is_fixed_without_breakdown() {
        let tiers = vec![PriceTier::flat(d("0.0104"), "Hrs")];
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(tiers)))), "us-east-1");

        let cost = resolver.resolve(&resource("AWS::EC2::Instance")).await;
        assert_eq!(cost.pricing_model, PricingModel::Fixed);
        assert_eq!(cost.monthly_cost, Some(d("7.59")));
        assert_eq!(cost.hourly_cost, Some(d("0.0104")));
        assert!(cost.tier_breakdown.is_empty());
    }

    #[tokio::test]
    async fn test_free_skips_usage() {
        struct PanickingUsage;
        impl UsageHeuristics for PanickingUsage {
            fn estimate_usage(&self, _: &str, _: &Properties) -> UsageVolume {
                panic!("usage must not be estimated for free resources");
            }
        }
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Free))), "us-east-1")
            .with_heuristics(Arc::new(PanickingUsage));

        let cost = resolver.resolve(&resource("AWS::IAM::Role")).await;
        assert_eq!(cost.pricing_model, PricingModel::Free);
        assert_eq!(cost.monthly_cost, Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_empty_tiers_use_fallback() {
        let mut fallback = BTreeMap::new();
        fallback.insert("AWS::EKS::Cluster".to_string(), d("73"));
        let resolver = CostResolver::new(
            Arc::new(mock_returning(Ok(PriceLookup::Tiers(Vec::new())))),
            "us-east-1",
        )
        .with_fallback_costs(fallback);

        let cost = resolver.resolve(&resource("AWS::EKS::Cluster")).await;
        assert_eq!(cost.pricing_model, PricingModel::Fixed);
        assert_eq!(cost.monthly_cost, Some(d("73")));
        assert_eq!(cost.hourly_cost, Some(d("0.1")));
        assert_eq!(cost.source.as_deref(), Some(FALLBACK_SOURCE));
    }

    #[tokio::test]
    async fn test_empty_tiers_without_fallback_is_error() {
        let resolver = CostResolver::new(
            Arc::new(mock_returning(Ok(PriceLookup::Tiers(Vec::new())))),
            "us-east-1",
        );
        let cost = resolver.resolve(&resource("AWS::Transfer::Server")).await;
        assert!(cost.is_error());
        assert!(cost.error.unwrap().contains(NO_PRICING_DATA));
    }

    #[tokio::test]
    async fn test_unsupported_and_failed_are_distinct_errors() {
        let unsupported = CostResolver::new(
            Arc::new(mock_returning(Err(CostError::UnsupportedResourceType {
                resource_type: "AWS::Made::Up".to_string(),
            }))),
            "us-east-1",
        )
        .resolve(&resource("AWS::Made::Up"))
        .await;
        let failed = CostResolver::new(
            Arc::new(mock_returning(Err(CostError::lookup_failed("mock", "timed out", None)))),
            "us-east-1",
        )
        .resolve(&resource("AWS::SQS::Queue"))
        .await;

        assert!(unsupported.is_error() && failed.is_error());
        assert_eq!(
            unsupported.error.as_deref(),
            Some("unsupported resource type: AWS::Made::Up")
        );
        assert!(failed.error.unwrap().contains("timed out"));
        assert_eq!(unsupported.monthly_cost, None);
    }

    #[tokio::test]
    async fn test_invalid_tiers_become_error() {
        let tiers = vec![PriceTier::new(d("10"), None, d("1"), "Hrs")];
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(tiers)))), "us-east-1");
        let cost = resolver.resolve(&resource("AWS::EC2::Instance")).await;
        assert!(cost.is_error());
        assert!(cost.error.unwrap().starts_with("invalid price tiers"));
    }

    #[tokio::test]
    async fn test_tiers_in_another_unit_become_error() {
        let tiers = vec![PriceTier::flat(d("0.0000002"), "Requests")];
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(tiers)))), "us-east-1");
        let properties = serde_json::json!({ "MemorySize": 512 }).as_object().cloned().unwrap();

        let cost = resolver
            .resolve(&Resource::new("Api", "AWS::Lambda::Function", properties))
            .await;
        assert!(cost.is_error());
        assert_eq!(cost.monthly_cost, None);
        assert!(cost.error.unwrap().contains("GB-Seconds"));
    }

    #[tokio::test]
    async fn test_unit_aliases_are_priced() {
        let tiers = vec![PriceTier::flat(d("0.0000166667"), "Lambda-GB-Second")];
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(tiers)))), "us-east-1")
            .with_heuristics(Arc::new(FixedUsage(UsageVolume::traffic(d("90000"), "GB-Seconds"))));

        let cost = resolver.resolve(&resource("AWS::Lambda::Function")).await;
        assert_eq!(cost.pricing_model, PricingModel::UsageBased);
        assert_eq!(cost.monthly_cost, Some(d("1.50")));
    }

    #[tokio::test]
    async fn test_usage_override_replaces_estimate() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Thing".to_string(), d("3000000"));
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(two_tier())))), "us-east-1")
            .with_heuristics(Arc::new(FixedUsage(UsageVolume::traffic(d("150"), "Requests"))))
            .with_usage_overrides(overrides);

        let cost = resolver.resolve(&resource("AWS::SQS::Queue")).await;
        let usage = cost.usage.unwrap();
        assert_eq!(usage.amount, d("3000000"));
        assert_eq!(usage.unit, "Requests");
        assert_eq!(usage.basis, UsageBasis::Traffic);
        // 100 x 1 + 2_999_900 x 0.5
        assert_eq!(cost.monthly_cost, Some(d("1500050")));
    }

    #[tokio::test]
    async fn test_usage_override_for_other_id_ignored() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Elsewhere".to_string(), d("1"));
        let resolver = CostResolver::new(Arc::new(mock_returning(Ok(PriceLookup::Tiers(two_tier())))), "us-east-1")
            .with_heuristics(Arc::new(FixedUsage(UsageVolume::traffic(d("150"), "Requests"))))
            .with_usage_overrides(overrides);

        let cost = resolver.resolve(&resource("AWS::SQS::Queue")).await;
        assert_eq!(cost.monthly_cost, Some(d("125")));
    }

    #[tokio::test]
    async fn test_region_passed_to_source() {
        let mut mock = MockPricingSource::new();
        mock.expect_name().return_const("mock");
        mock.expect_lookup()
            .with(eq("AWS::IAM::Role"), eq("eu-central-1"), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(PriceLookup::Free));

        let resolver = CostResolver::new(Arc::new(mock), "eu-central-1");
        assert_eq!(resolver.region(), "eu-central-1");
        let cost = resolver.resolve(&resource("AWS::IAM::Role")).await;
        assert_eq!(cost.pricing_model, PricingModel::Free);
    }
}
