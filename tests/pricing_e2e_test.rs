//! End-to-end tests against the live pricing APIs
//!
//! These tests need network access and credentials.
//! Run with: STACKCOST_E2E=1 INFRACOST_API_KEY=... cargo test --test pricing_e2e_test --features e2e -- --ignored

#![cfg(feature = "e2e")]

use serde_json::json;
use stackcost::config::{Config, PricingSourceKind};
use stackcost::model::{PricingModel, Resource};
use stackcost::pricing::{self, PriceLookup, PricingSource};
use stackcost::CostResolver;
use std::env;

/// Check if E2E tests should run (require explicit opt-in)
fn should_run_e2e() -> bool {
    env::var("STACKCOST_E2E").is_ok()
}

fn t3_micro() -> Resource {
    let properties = json!({ "InstanceType": "t3.micro" })
        .as_object()
        .cloned()
        .unwrap_or_default();
    Resource::new("Web", "AWS::EC2::Instance", properties)
}

#[tokio::test]
#[ignore] // Requires INFRACOST_API_KEY and explicit opt-in
async fn test_infracost_prices_t3_micro() {
    if !should_run_e2e() {
        eprintln!("Skipping E2E test. Set STACKCOST_E2E=1 to run");
        return;
    }

    let config = Config::default();
    config.validate().expect("INFRACOST_API_KEY must be set");
    let source = pricing::from_config(&config).await.unwrap();

    let cost = CostResolver::new(source, "us-east-1").resolve(&t3_micro()).await;
    assert_eq!(cost.pricing_model, PricingModel::Fixed, "{:?}", cost.error);
    let monthly = cost.monthly_cost.unwrap();
    assert!(monthly > rust_decimal::Decimal::ZERO);
    println!("t3.micro in us-east-1: ${}/month", monthly);
}

#[tokio::test]
#[ignore] // Requires AWS credentials and explicit opt-in
async fn test_aws_price_list_prices_t3_micro() {
    if !should_run_e2e() {
        eprintln!("Skipping E2E test. Set STACKCOST_E2E=1 to run");
        return;
    }

    let mut config = Config::default();
    config.pricing.source = PricingSourceKind::Aws;
    let source = pricing::from_config(&config).await.unwrap();

    let lookup = source
        .lookup("AWS::EC2::Instance", "us-east-1", &t3_micro().properties)
        .await
        .expect("GetProducts failed");
    match lookup {
        PriceLookup::Tiers(tiers) => assert!(!tiers.is_empty()),
        PriceLookup::Free => panic!("EC2 instances are not free"),
    }
}
