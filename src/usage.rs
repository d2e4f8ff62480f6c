//! Usage heuristics
//!
//! Estimates a month of consumption for a resource from its declared
//! properties, in the same unit its price tiers are quoted in. Pure: no I/O,
//! no clock.
//!
//! Always-on resources (instances, gateways, keys) are estimated as
//! `Provisioned` and bill for the full month. Demand-driven resources
//! (requests, stored GB) are `Traffic` guesses and get reported as
//! usage-based.

use crate::model::{Properties, PropertyAccess, UsageVolume};
use crate::tiers::HOURS_PER_MONTH;
use rust_decimal::Decimal;

/// Estimates monthly usage for a resource
pub trait UsageHeuristics: Send + Sync {
    fn estimate_usage(&self, resource_type: &str, properties: &Properties) -> UsageVolume;
}

/// Property-driven estimates for the built-in catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUsageHeuristics;

impl UsageHeuristics for DefaultUsageHeuristics {
    fn estimate_usage(&self, resource_type: &str, properties: &Properties) -> UsageVolume {
        match resource_type {
            "AWS::Lambda::Function" => lambda(properties),
            "AWS::S3::Bucket" => s3(properties),
            "AWS::DynamoDB::Table" => dynamodb(properties),
            "AWS::ApiGateway::RestApi" | "AWS::ApiGatewayV2::Api" => api_gateway(properties),
            "AWS::SQS::Queue" | "AWS::SNS::Topic" => {
                UsageVolume::traffic(Decimal::from(1_000_000u64), "Requests")
            }
            "AWS::Logs::LogGroup" => UsageVolume::traffic(Decimal::from(5u64), "GB"),
            "AWS::EC2::Volume" => {
                let size = properties.u64_prop("Size").unwrap_or(8);
                UsageVolume::provisioned(Decimal::from(size), "GB-Mo")
            }
            "AWS::Kinesis::Stream" => {
                let shards = properties.u64_prop("ShardCount").unwrap_or(1);
                UsageVolume::provisioned(Decimal::from(shards) * HOURS_PER_MONTH, "ShardHour")
            }
            "AWS::KMS::Key" | "AWS::SecretsManager::Secret" | "AWS::CloudWatch::Alarm" => {
                UsageVolume::provisioned(Decimal::ONE, "Month")
            }
            _ => UsageVolume::provisioned(HOURS_PER_MONTH, "Hrs"),
        }
    }
}

/// Spellings of one billing unit across the pricing sources
const UNIT_ALIASES: &[&[&str]] = &[
    &["hrs", "hr", "hour", "hours"],
    &["gb-mo", "gb-month", "gb-months"],
    &["gb-seconds", "gb-second", "lambda-gb-second", "lambda-gb-seconds"],
    &["requests", "request"],
    &["shardhour", "shardhours", "shard-hour", "shard-hours"],
    &["readcapacityunit-hrs", "readcapacityunit-hours"],
    &["readrequestunits", "readrequestunit"],
    // per-item monthly charges
    &["month", "months", "mo", "keys", "secrets", "alarms"],
];

/// Whether a usage estimate and a price tier are quoted in the same unit
pub fn units_match(usage_unit: &str, tier_unit: &str) -> bool {
    let usage_unit = usage_unit.trim().to_ascii_lowercase();
    let tier_unit = tier_unit.trim().to_ascii_lowercase();
    if usage_unit.is_empty() || tier_unit.is_empty() {
        return false;
    }
    usage_unit == tier_unit
        || UNIT_ALIASES
            .iter()
            .any(|group| group.contains(&usage_unit.as_str()) && group.contains(&tier_unit.as_str()))
}

/// GB-seconds: invocations x average duration x configured memory
fn lambda(props: &Properties) -> UsageVolume {
    let memory_mb = props.u64_prop("MemorySize").unwrap_or(128);
    let timeout_secs = props.u64_prop("Timeout").unwrap_or(3);
    let runtime = props.str_prop("Runtime").unwrap_or("python3.12");

    let mut requests = Decimal::from(match memory_mb {
        0..=128 => 50_000u64,
        129..=512 => 100_000,
        _ => 200_000,
    });
    if runtime.contains("java") {
        requests *= Decimal::new(7, 1);
    } else if runtime.contains("node") {
        requests *= Decimal::new(12, 1);
    }

    // 60% of the timeout, capped at 5s
    let duration_secs = (Decimal::from(timeout_secs) * Decimal::new(6, 1)).min(Decimal::from(5u64));
    let memory_gb = Decimal::from(memory_mb) / Decimal::from(1024u64);

    UsageVolume::traffic(requests * duration_secs * memory_gb, "GB-Seconds")
}

fn s3(props: &Properties) -> UsageVolume {
    let mut storage_gb = Decimal::from(100u64);
    let versioned = props
        .object_prop("VersioningConfiguration")
        .and_then(|v| v.str_prop("Status"))
        .map_or(false, |status| status == "Enabled");
    if versioned {
        storage_gb *= Decimal::new(15, 1);
    }
    UsageVolume::traffic(storage_gb, "GB-Mo")
}

/// Read request units on demand, read capacity unit hours when provisioned
fn dynamodb(props: &Properties) -> UsageVolume {
    if props.str_prop("BillingMode").unwrap_or("PAY_PER_REQUEST") == "PROVISIONED" {
        let rcu = props
            .object_prop("ProvisionedThroughput")
            .and_then(|t| t.u64_prop("ReadCapacityUnits"))
            .unwrap_or(5);
        return UsageVolume::provisioned(Decimal::from(rcu) * HOURS_PER_MONTH, "ReadCapacityUnit-Hrs");
    }
    UsageVolume::traffic(Decimal::from(1_000_000u64), "ReadRequestUnits")
}

fn api_gateway(props: &Properties) -> UsageVolume {
    let mut requests = Decimal::from(100_000u64);

    let endpoint_types: Vec<&str> = props
        .object_prop("EndpointConfiguration")
        .and_then(|c| c.array_prop("Types"))
        .map(|types| types.iter().filter_map(|t| t.as_str()).collect())
        .unwrap_or_default();
    if endpoint_types.contains(&"REGIONAL") {
        requests *= Decimal::TWO;
    } else if endpoint_types.contains(&"PRIVATE") {
        requests *= Decimal::new(5, 1);
    }

    let name = props.str_prop("Name").unwrap_or_default().to_lowercase();
    let name_has = |words: &[&str]| words.iter().any(|w| name.contains(w));
    if name_has(&["prod", "production"]) {
        requests *= Decimal::TEN;
    } else if name_has(&["dev", "test", "staging"]) {
        requests *= Decimal::new(3, 1);
    } else if name_has(&["high", "scale", "enterprise"]) {
        requests *= Decimal::from(20u64);
    }

    UsageVolume::traffic(requests, "Requests")
}
