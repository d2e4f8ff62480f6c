//! AWS Price List API source
//!
//! Uses `GetProducts` with `TERM_MATCH` filters derived from the catalog's
//! `ProductQuery`. The Price List API has no regex matching, so exact
//! attribute filters go to the API and regex filters are checked against
//! each returned product's attributes. A product that fails any regex is
//! skipped; when none is left the lookup yields an empty tier set. The API
//! is only served from a few regions; the client always talks to
//! `us-east-1` and filters on `regionCode` instead.

use super::{order_tiers, parse_bound, PriceLookup, PricingSource};
use crate::catalog::{Catalog, CatalogEntry, FilterValue, ProductQuery};
use crate::config::PricingConfig;
use crate::error::{CostError, Result};
use crate::model::{PriceTier, Properties};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_pricing::types::{Filter, FilterType};
use aws_sdk_pricing::Client as PricingClient;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const SOURCE_NAME: &str = "aws";
const PRICING_API_REGION: &str = "us-east-1";
const PAGE_SIZE: i32 = 100;

pub struct AwsPriceListSource {
    client: PricingClient,
    catalog: Arc<Catalog>,
    retry: ExponentialBackoffPolicy,
}

impl AwsPriceListSource {
    pub fn new(client: PricingClient) -> Self {
        Self {
            client,
            catalog: Arc::new(Catalog::aws()),
            retry: ExponentialBackoffPolicy::for_pricing_api(),
        }
    }

    /// Client from the default credential chain
    pub async fn from_env(config: &PricingConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(PRICING_API_REGION))
            .load()
            .await;
        Self::new(PricingClient::new(&sdk_config))
            .with_retry_policy(ExponentialBackoffPolicy::new(config.max_attempts))
    }

    pub fn with_retry_policy(mut self, policy: ExponentialBackoffPolicy) -> Self {
        self.retry = policy;
        self
    }

    async fn get_products(&self, query: &ProductQuery) -> Result<Vec<String>> {
        let filters = term_filters(query)?;
        let output = self
            .client
            .get_products()
            .service_code(&query.service)
            .set_filters(Some(filters))
            .format_version("aws_v1")
            .max_results(PAGE_SIZE)
            .send()
            .await
            .map_err(|e| {
                CostError::lookup_failed(SOURCE_NAME, format!("GetProducts failed: {}", e), None)
            })?;
        Ok(output.price_list().to_vec())
    }

    async fn fetch_tiers(&self, query: &ProductQuery) -> Result<Vec<PriceTier>> {
        let matchers = attribute_matchers(query)?;
        debug!(service = %query.service, family = %query.product_family, "querying AWS Price List");
        let price_list = self.retry.execute_with_retry(|| self.get_products(query)).await?;
        first_matching_tiers(&price_list, &matchers)
    }
}

/// Tiers of the first product whose attributes satisfy every matcher
fn first_matching_tiers(price_list: &[String], matchers: &[(String, Regex)]) -> Result<Vec<PriceTier>> {
    for item in price_list {
        let doc: Value = serde_json::from_str(item).map_err(|e| {
            CostError::lookup_failed(SOURCE_NAME, "malformed price list item", Some(Box::new(e)))
        })?;
        if !product_matches(&doc, matchers) {
            continue;
        }
        let tiers =
            on_demand_tiers(&doc).map_err(|msg| CostError::lookup_failed(SOURCE_NAME, msg, None))?;
        if !tiers.is_empty() {
            return Ok(tiers);
        }
    }
    debug!(candidates = price_list.len(), "no product matched the attribute patterns");
    Ok(Vec::new())
}

fn product_matches(doc: &Value, matchers: &[(String, Regex)]) -> bool {
    let attributes = doc.pointer("/product/attributes");
    matchers.iter().all(|(key, pattern)| {
        attributes
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map_or(false, |value| pattern.is_match(value))
    })
}

fn attribute_matchers(query: &ProductQuery) -> Result<Vec<(String, Regex)>> {
    query
        .attribute_filters
        .iter()
        .filter_map(|filter| match &filter.value {
            FilterValue::Regex(pattern) => Some((filter.key.clone(), compile_pattern(pattern))),
            FilterValue::Exact(_) => None,
        })
        .map(|(key, compiled)| compiled.map(|re| (key, re)))
        .collect()
}

/// `/pattern/flags` as used in the catalog; only the `i` flag is honoured
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) => (body, flags),
        None => (pattern, ""),
    };
    let source = if flags.contains('i') {
        format!("(?i){}", body)
    } else {
        body.to_string()
    };
    Regex::new(&source).map_err(|e| {
        CostError::lookup_failed(
            SOURCE_NAME,
            format!("invalid attribute pattern {}", pattern),
            Some(Box::new(e)),
        )
    })
}

#[async_trait]
impl PricingSource for AwsPriceListSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup(
        &self,
        resource_type: &str,
        region: &str,
        properties: &Properties,
    ) -> Result<PriceLookup> {
        match self.catalog.lookup_outcome(resource_type, properties, region)? {
            CatalogEntry::Free => Ok(PriceLookup::Free),
            CatalogEntry::Priced(query) => Ok(PriceLookup::Tiers(self.fetch_tiers(&query).await?)),
        }
    }
}

fn term_match(field: &str, value: &str) -> Result<Filter> {
    Filter::builder()
        .r#type(FilterType::TermMatch)
        .field(field)
        .value(value)
        .build()
        .map_err(|e| CostError::lookup_failed(SOURCE_NAME, format!("invalid filter: {}", e), None))
}

fn term_filters(query: &ProductQuery) -> Result<Vec<Filter>> {
    let mut filters = vec![term_match("productFamily", &query.product_family)?];
    if let Some(region) = &query.region {
        filters.push(term_match("regionCode", region)?);
    }
    for filter in &query.attribute_filters {
        if let FilterValue::Exact(value) = &filter.value {
            filters.push(term_match(&filter.key, value)?);
        }
    }
    Ok(filters)
}

/// Tiers from the `OnDemand` terms of one price list document
fn on_demand_tiers(doc: &Value) -> std::result::Result<Vec<PriceTier>, String> {
    let Some(terms) = doc.pointer("/terms/OnDemand").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut tiers = Vec::new();
    for term in terms.values() {
        let Some(dimensions) = term.get("priceDimensions").and_then(Value::as_object) else {
            continue;
        };
        for dim in dimensions.values() {
            let Some(unit_price) =
                parse_bound(dim.pointer("/pricePerUnit/USD").and_then(Value::as_str))?
            else {
                continue;
            };
            let start = parse_bound(dim.get("beginRange").and_then(Value::as_str))?.unwrap_or_default();
            let end = parse_bound(dim.get("endRange").and_then(Value::as_str))?;
            let unit = dim.get("unit").and_then(Value::as_str).unwrap_or_default();
            tiers.push(PriceTier::new(start, end, unit_price, unit));
        }
    }
    Ok(order_tiers(tiers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AttributeFilter;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn test_on_demand_tiers_parsed_and_sorted() {
        let doc = json!({
            "product": { "productFamily": "Storage" },
            "terms": { "OnDemand": { "SKU.JRTCKXETXF": { "priceDimensions": {
                "SKU.JRTCKXETXF.2": {
                    "unit": "GB-Mo", "beginRange": "51200", "endRange": "Inf",
                    "pricePerUnit": { "USD": "0.022" }
                },
                "SKU.JRTCKXETXF.1": {
                    "unit": "GB-Mo", "beginRange": "0", "endRange": "51200",
                    "pricePerUnit": { "USD": "0.023" }
                }
            }}}}
        });
        let tiers = on_demand_tiers(&doc).unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].unit_price, Decimal::new(23, 3));
        assert_eq!(tiers[0].end_usage, Some(Decimal::new(51200, 0)));
        assert_eq!(tiers[1].end_usage, None);
    }

    #[test]
    fn test_document_without_on_demand_terms() {
        let doc = json!({ "terms": { "Reserved": {} } });
        assert!(on_demand_tiers(&doc).unwrap().is_empty());
    }

    fn price_list_item(usage_type: &str, unit: &str, price: &str) -> String {
        json!({
            "product": { "attributes": { "usagetype": usage_type } },
            "terms": { "OnDemand": { "SKU.A": { "priceDimensions": {
                "SKU.A.1": { "unit": unit, "pricePerUnit": { "USD": price } }
            }}}}
        })
        .to_string()
    }

    #[test]
    fn test_regex_filter_skips_unmatched_products() {
        let price_list = vec![
            price_list_item("USE1-Request", "Requests", "0.0000002"),
            price_list_item("USE1-Lambda-GB-Second", "Lambda-GB-Second", "0.0000166667"),
        ];
        let matchers = vec![("usagetype".to_string(), compile_pattern("/GB-Second/").unwrap())];

        let tiers = first_matching_tiers(&price_list, &matchers).unwrap();
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].unit, "Lambda-GB-Second");
        assert_eq!(tiers[0].unit_price, Decimal::new(166667, 10));
    }

    #[test]
    fn test_no_matching_product_is_empty() {
        let price_list = vec![price_list_item("USE1-Request", "Requests", "0.0000002")];
        let matchers = vec![("usagetype".to_string(), compile_pattern("/GB-Second/").unwrap())];
        assert!(first_matching_tiers(&price_list, &matchers).unwrap().is_empty());

        // Products without the attribute never match
        let bare = vec![json!({ "terms": {} }).to_string()];
        assert!(first_matching_tiers(&bare, &matchers).unwrap().is_empty());
    }

    #[test]
    fn test_compile_pattern() {
        assert!(compile_pattern("/Requests-Tier1$/").unwrap().is_match("USE1-Requests-Tier1"));
        assert!(!compile_pattern("/Requests-Tier1$/").unwrap().is_match("USE1-Requests-Tier1-Extra"));
        assert!(compile_pattern("/natgateway-hours/i").unwrap().is_match("USE1-NatGateway-Hours"));
        assert!(compile_pattern("plain").unwrap().is_match("a plain value"));
        assert!(compile_pattern("/(unclosed/").is_err());
    }

    #[test]
    fn test_regex_filters_stay_client_side() {
        let query = ProductQuery {
            vendor: "aws".to_string(),
            service: "AmazonS3".to_string(),
            product_family: "Storage".to_string(),
            region: Some("us-east-1".to_string()),
            attribute_filters: vec![
                AttributeFilter::regex("usagetype", "/TimedStorage-ByteHrs/"),
                AttributeFilter::exact("storageClass", "General Purpose"),
            ],
            purchase_option: "on_demand".to_string(),
        };
        let filters = term_filters(&query).unwrap();
        let fields: Vec<&str> = filters.iter().map(|f| f.field()).collect();
        assert_eq!(fields, vec!["productFamily", "regionCode", "storageClass"]);

        let matchers = attribute_matchers(&query).unwrap();
        assert_eq!(matchers.len(), 1);
        assert_eq!(matchers[0].0, "usagetype");
        assert!(matchers[0].1.is_match("USE1-TimedStorage-ByteHrs"));
    }
}
