//! Infracost Cloud Pricing API client
//!
//! Sends one GraphQL `products` query per lookup, built from the catalog's
//! `ProductQuery`, and turns the `prices` of the first matching product into a
//! tier curve.

use super::{order_tiers, parse_bound, PriceLookup, PricingSource};
use crate::catalog::{Catalog, CatalogEntry, FilterValue, ProductQuery};
use crate::config::PricingConfig;
use crate::error::{CostError, Result};
use crate::model::{PriceTier, Properties};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SOURCE_NAME: &str = "infracost";

pub const DEFAULT_ENDPOINT: &str = "https://pricing.api.infracost.io/graphql";

const PRODUCTS_QUERY: &str = r#"query($filter: ProductFilter!, $priceFilter: PriceFilter) {
  products(filter: $filter) {
    prices(filter: $priceFilter) {
      USD
      unit
      description
      startUsageAmount
      endUsageAmount
    }
  }
}"#;

pub struct InfracostSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    catalog: Arc<Catalog>,
    retry: ExponentialBackoffPolicy,
}

impl InfracostSource {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, api_key, Duration::from_secs(30))
    }

    fn with_timeout(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CostError::lookup_failed(SOURCE_NAME, "failed to build HTTP client", Some(Box::new(e)))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            catalog: Arc::new(Catalog::aws()),
            retry: ExponentialBackoffPolicy::for_pricing_api(),
        })
    }

    pub fn from_config(config: &PricingConfig, api_key: String) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let source = Self::with_timeout(endpoint, api_key, Duration::from_secs(config.timeout_secs))?;
        Ok(source.with_retry_policy(ExponentialBackoffPolicy::new(config.max_attempts)))
    }

    pub fn with_retry_policy(mut self, policy: ExponentialBackoffPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// POST the request body; transport errors, 429 and 5xx are transient
    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CostError::lookup_failed(SOURCE_NAME, "request failed", Some(Box::new(e))))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(CostError::lookup_failed(
                SOURCE_NAME,
                format!("transient HTTP status {}", status),
                None,
            ));
        }
        Ok(response)
    }

    async fn fetch_tiers(&self, query: &ProductQuery) -> Result<Vec<PriceTier>> {
        let body = request_body(query);
        debug!(service = %query.service, family = %query.product_family, "querying Infracost");

        let response = self.retry.execute_with_retry(|| self.post(&body)).await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CostError::lookup_failed(
                SOURCE_NAME,
                format!("HTTP {}: {}", status, text.trim()),
                None,
            ));
        }

        let parsed: GraphQlResponse = response.json().await.map_err(|e| {
            CostError::lookup_failed(SOURCE_NAME, "malformed response body", Some(Box::new(e)))
        })?;

        if let Some(err) = parsed.errors.first() {
            return Err(CostError::lookup_failed(
                SOURCE_NAME,
                format!("GraphQL error: {}", err.message),
                None,
            ));
        }

        let prices = parsed
            .data
            .map(|d| d.products)
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.prices)
            .find(|prices| !prices.is_empty())
            .unwrap_or_default();

        tiers_from_prices(&prices).map_err(|msg| CostError::lookup_failed(SOURCE_NAME, msg, None))
    }
}

#[async_trait]
impl PricingSource for InfracostSource {
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

fn request_body(query: &ProductQuery) -> Value {
    let attribute_filters: Vec<Value> = query
        .attribute_filters
        .iter()
        .map(|f| match &f.value {
            FilterValue::Exact(v) => json!({ "key": f.key, "value": v }),
            FilterValue::Regex(r) => json!({ "key": f.key, "value_regex": r }),
        })
        .collect();

    let mut filter = json!({
        "vendorName": query.vendor,
        "service": query.service,
        "productFamily": query.product_family,
        "attributeFilters": attribute_filters,
    });
    if let (Some(region), Some(obj)) = (&query.region, filter.as_object_mut()) {
        obj.insert("region".to_string(), json!(region));
    }

    json!({
        "query": PRODUCTS_QUERY,
        "variables": {
            "filter": filter,
            "priceFilter": { "purchaseOption": query.purchase_option },
        },
    })
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ProductsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProductsData {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct Product {
    #[serde(default)]
    prices: Vec<Price>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Price {
    #[serde(rename = "USD")]
    usd: Option<String>,
    unit: Option<String>,
    start_usage_amount: Option<String>,
    end_usage_amount: Option<String>,
}

/// Convert Infracost price points into a tier curve
///
/// Prices without usage ranges are alternatives for the same product (an
/// idle and an attached EIP rate, say), not tiers; the first non-zero one
/// is used as a flat rate.
fn tiers_from_prices(prices: &[Price]) -> std::result::Result<Vec<PriceTier>, String> {
    let ranged = prices.iter().any(|p| p.start_usage_amount.is_some());

    let mut tiers = Vec::with_capacity(prices.len());
    for price in prices {
        let Some(unit_price) = parse_bound(price.usd.as_deref())? else {
            continue;
        };
        let unit = price.unit.clone().unwrap_or_default();

        if !ranged {
            tiers.push(PriceTier::flat(unit_price, unit));
            continue;
        }
        let start = parse_bound(price.start_usage_amount.as_deref())?.unwrap_or_default();
        let end = parse_bound(price.end_usage_amount.as_deref())?;
        tiers.push(PriceTier::new(start, end, unit_price, unit));
    }

    if !ranged && tiers.len() > 1 {
        let chosen = tiers
            .iter()
            .position(|t| !t.unit_price.is_zero())
            .unwrap_or(0);
        let tier = tiers.swap_remove(chosen);
        return Ok(vec![tier]);
    }

    Ok(order_tiers(tiers))
}
