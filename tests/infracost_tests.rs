//! Infracost client tests against a local mock server

use mockito::Matcher;
use rust_decimal::Decimal;
use serde_json::json;
use stackcost::error::CostError;
use stackcost::model::{PriceTier, PricingModel, Properties, Resource};
use stackcost::pricing::{CachedSource, InfracostSource, PriceLookup, PricingSource};
use stackcost::retry::ExponentialBackoffPolicy;
use stackcost::CostResolver;
use std::sync::Arc;
use std::time::Duration;

const API_KEY: &str = "test-key";

fn source(server: &mockito::Server) -> InfracostSource {
    InfracostSource::new(format!("{}/graphql", server.url()), API_KEY)
        .unwrap()
        .with_retry_policy(
            ExponentialBackoffPolicy::new(2).with_initial_delay(Duration::from_millis(1)),
        )
}

fn props(value: serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Properties::new(),
    }
}

fn products(prices: serde_json::Value) -> String {
    json!({ "data": { "products": [{ "prices": prices }] } }).to_string()
}

#[tokio::test]
async fn test_instance_price_parsed() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_header("x-api-key", API_KEY)
        .match_body(Matcher::PartialJson(json!({
            "variables": {
                "filter": {
                    "vendorName": "aws",
                    "service": "AmazonEC2",
                    "productFamily": "Compute Instance",
                    "region": "us-east-1"
                },
                "priceFilter": { "purchaseOption": "on_demand" }
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(products(json!([{ "USD": "0.0104", "unit": "Hrs" }])))
        .expect(1)
        .create_async()
        .await;

    let lookup = source(&server)
        .lookup(
            "AWS::EC2::Instance",
            "us-east-1",
            &props(json!({ "InstanceType": "t3.micro" })),
        )
        .await
        .unwrap();

    assert_eq!(
        lookup,
        PriceLookup::Tiers(vec![PriceTier::flat(Decimal::new(104, 4), "Hrs")])
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ranged_prices_become_tiers() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(products(json!([
            { "USD": "0.0000004", "unit": "Requests", "startUsageAmount": "1000000", "endUsageAmount": "Inf" },
            { "USD": "0", "unit": "Requests", "startUsageAmount": "0", "endUsageAmount": "1000000" }
        ])))
        .create_async()
        .await;

    let PriceLookup::Tiers(tiers) = source(&server)
        .lookup("AWS::SQS::Queue", "us-east-1", &Properties::new())
        .await
        .unwrap()
    else {
        panic!("expected tiers");
    };

    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[0].start_usage, Decimal::ZERO);
    assert_eq!(tiers[0].end_usage, Some(Decimal::from(1_000_000u64)));
    assert_eq!(tiers[1].end_usage, None);
}

#[tokio::test]
async fn test_server_error_retried_then_fails() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let err = source(&server)
        .lookup("AWS::SQS::Queue", "us-east-1", &Properties::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CostError::Retryable { attempt: 2, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(401)
        .with_body("invalid API key")
        .expect(1)
        .create_async()
        .await;

    let err = source(&server)
        .lookup("AWS::SQS::Queue", "us-east-1", &Properties::new())
        .await
        .unwrap_err();

    match err {
        CostError::PricingLookupFailed { message, .. } => {
            assert!(message.contains("401"));
            assert!(message.contains("invalid API key"));
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_graphql_error_reported() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(json!({ "errors": [{ "message": "Cannot query field" }] }).to_string())
        .create_async()
        .await;

    let err = source(&server)
        .lookup("AWS::SQS::Queue", "us-east-1", &Properties::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Cannot query field"));
}

#[tokio::test]
async fn test_no_products_is_empty_tier_set() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(json!({ "data": { "products": [] } }).to_string())
        .create_async()
        .await;

    let lookup = source(&server)
        .lookup("AWS::EKS::Cluster", "us-east-1", &Properties::new())
        .await
        .unwrap();
    assert_eq!(lookup, PriceLookup::Tiers(Vec::new()));
}

#[tokio::test]
async fn test_free_and_unsupported_types_skip_http() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let source = source(&server);

    let free = source
        .lookup("AWS::IAM::Role", "us-east-1", &Properties::new())
        .await
        .unwrap();
    assert_eq!(free, PriceLookup::Free);

    let err = source
        .lookup("AWS::Custom::Widget", "us-east-1", &Properties::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CostError::UnsupportedResourceType { .. }));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_cached_source_queries_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(products(json!([{ "USD": "0.0104", "unit": "Hrs" }])))
        .expect(1)
        .create_async()
        .await;

    let cached: Arc<dyn PricingSource> = Arc::new(CachedSource::new(source(&server)));
    let resolver = CostResolver::new(cached, "us-east-1");

    let instance_props = props(json!({ "InstanceType": "t3.micro" }));
    for id in ["Web", "Worker", "Batch"] {
        let resource = Resource::new(id, "AWS::EC2::Instance", instance_props.clone());
        let cost = resolver.resolve(&resource).await;
        assert_eq!(cost.pricing_model, PricingModel::Fixed);
        assert_eq!(cost.monthly_cost, Some(Decimal::new(759, 2)));
        assert_eq!(cost.source.as_deref(), Some("infracost"));
    }

    mock.assert_async().await;
}
