//! Resource-type pricing catalog
//!
//! Two tables keyed by CloudFormation resource type:
//!
//! - the set of categorically free types (configuration and plumbing
//!   resources that never appear on a bill), and
//! - a registry of product query builders for the priced types. A builder turns
//!   a resource's properties into a `ProductQuery` that the network pricing
//!   sources translate into their own request format.
//!
//! A type in neither table is unsupported.

use crate::error::{CostError, Result};
use crate::model::{Properties, PropertyAccess};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Attribute filter applied to the product search
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FilterValue {
    Exact(String),
    /// Regex filter in `/pattern/flags` form
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttributeFilter {
    pub key: String,
    pub value: FilterValue,
}

impl AttributeFilter {
    pub fn exact(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: FilterValue::Exact(value.into()),
        }
    }

    pub fn regex(key: &str, pattern: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: FilterValue::Regex(pattern.into()),
        }
    }
}

/// Provider-neutral description of the product whose price tiers we want
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProductQuery {
    pub vendor: String,
    pub service: String,
    pub product_family: String,
    /// `None` for global services
    pub region: Option<String>,
    pub attribute_filters: Vec<AttributeFilter>,
    pub purchase_option: String,
}

impl ProductQuery {
    fn aws(service: &str, product_family: &str, region: &str, filters: Vec<AttributeFilter>) -> Self {
        Self {
            vendor: "aws".to_string(),
            service: service.to_string(),
            product_family: product_family.to_string(),
            region: Some(region.to_string()),
            attribute_filters: filters,
            purchase_option: "on_demand".to_string(),
        }
    }
}

/// Builds a product query from a resource's properties and the pricing region
pub type QueryBuilderFn = fn(&Properties, &str) -> ProductQuery;

/// What the catalog knows about a resource type
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Free,
    Priced(ProductQuery),
}

/// Registry of free types and query builders
pub struct Catalog {
    free: HashSet<&'static str>,
    builders: HashMap<&'static str, QueryBuilderFn>,
}

impl Catalog {
    /// Empty catalog; every type is unsupported
    pub fn empty() -> Self {
        Self {
            free: HashSet::new(),
            builders: HashMap::new(),
        }
    }

    /// Catalog populated with the built-in AWS tables
    pub fn aws() -> Self {
        let mut catalog = Self::empty();
        for resource_type in FREE_RESOURCE_TYPES {
            catalog.free.insert(resource_type);
        }
        for (resource_type, builder) in QUERY_BUILDERS {
            catalog.register(resource_type, *builder);
        }
        catalog
    }

    pub fn register(&mut self, resource_type: &'static str, builder: QueryBuilderFn) {
        self.builders.insert(resource_type, builder);
    }

    pub fn is_free(&self, resource_type: &str) -> bool {
        self.free.contains(resource_type)
    }

    pub fn is_supported(&self, resource_type: &str) -> bool {
        self.is_free(resource_type) || self.builders.contains_key(resource_type)
    }

    /// Classify a resource: free, priced with a concrete query, or unsupported
    pub fn lookup_outcome(
        &self,
        resource_type: &str,
        properties: &Properties,
        region: &str,
    ) -> Result<CatalogEntry> {
        if self.is_free(resource_type) {
            return Ok(CatalogEntry::Free);
        }
        self.builders
            .get(resource_type)
            .map(|build| CatalogEntry::Priced(build(properties, region)))
            .ok_or_else(|| CostError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            })
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::aws()
    }
}

/// Resource types that are never billed
pub const FREE_RESOURCE_TYPES: &[&str] = &[
    "AWS::AccessAnalyzer::Analyzer",
    "AWS::ApiGateway::Account",
    "AWS::ApiGateway::ApiKey",
    "AWS::ApiGateway::Authorizer",
    "AWS::ApiGateway::BasePathMapping",
    "AWS::ApiGateway::Deployment",
    "AWS::ApiGateway::DomainName",
    "AWS::ApiGateway::GatewayResponse",
    "AWS::ApiGateway::Method",
    "AWS::ApiGateway::Model",
    "AWS::ApiGateway::RequestValidator",
    "AWS::ApiGateway::Resource",
    "AWS::ApiGateway::UsagePlan",
    "AWS::ApiGateway::UsagePlanKey",
    "AWS::ApiGatewayV2::ApiMapping",
    "AWS::ApiGatewayV2::Authorizer",
    "AWS::ApiGatewayV2::Deployment",
    "AWS::ApiGatewayV2::Integration",
    "AWS::ApiGatewayV2::Route",
    "AWS::ApiGatewayV2::Stage",
    "AWS::ApplicationAutoScaling::ScalingPolicy",
    "AWS::AutoScaling::LifecycleHook",
    "AWS::AutoScaling::ScalingPolicy",
    "AWS::AutoScaling::ScheduledAction",
    "AWS::Backup::BackupPlan",
    "AWS::Backup::BackupSelection",
    "AWS::CertificateManager::Certificate",
    "AWS::CloudFormation::WaitCondition",
    "AWS::CloudFormation::WaitConditionHandle",
    "AWS::CloudFront::OriginAccessIdentity",
    "AWS::EC2::EIPAssociation",
    "AWS::EC2::InternetGateway",
    "AWS::EC2::KeyPair",
    "AWS::EC2::LaunchTemplate",
    "AWS::EC2::NetworkAcl",
    "AWS::EC2::NetworkAclEntry",
    "AWS::EC2::Route",
    "AWS::EC2::RouteTable",
    "AWS::EC2::SecurityGroup",
    "AWS::EC2::SecurityGroupEgress",
    "AWS::EC2::SecurityGroupIngress",
    "AWS::EC2::Subnet",
    "AWS::EC2::SubnetRouteTableAssociation",
    "AWS::EC2::VPC",
    "AWS::EC2::VPCGatewayAttachment",
    "AWS::EC2::VolumeAttachment",
    "AWS::ECR::LifecyclePolicy",
    "AWS::ECS::Cluster",
    "AWS::ECS::TaskDefinition",
    "AWS::EFS::AccessPoint",
    "AWS::EFS::MountTarget",
    "AWS::ElasticLoadBalancingV2::Listener",
    "AWS::ElasticLoadBalancingV2::ListenerRule",
    "AWS::ElasticLoadBalancingV2::TargetGroup",
    "AWS::Events::Rule",
    "AWS::IAM::Group",
    "AWS::IAM::InstanceProfile",
    "AWS::IAM::ManagedPolicy",
    "AWS::IAM::Policy",
    "AWS::IAM::Role",
    "AWS::IAM::User",
    "AWS::Lambda::EventSourceMapping",
    "AWS::Lambda::Permission",
    "AWS::Lambda::Version",
    "AWS::Logs::LogStream",
    "AWS::Logs::MetricFilter",
    "AWS::Logs::SubscriptionFilter",
    "AWS::S3::BucketPolicy",
    "AWS::SNS::Subscription",
    "AWS::SNS::TopicPolicy",
    "AWS::SQS::QueuePolicy",
];

const QUERY_BUILDERS: &[(&str, QueryBuilderFn)] = &[
    ("AWS::EC2::Instance", ec2_instance),
    ("AWS::EC2::Volume", ebs_volume),
    ("AWS::EC2::EIP", elastic_ip),
    ("AWS::EC2::NatGateway", nat_gateway),
    ("AWS::RDS::DBInstance", rds_instance),
    ("AWS::Lambda::Function", lambda_function),
    ("AWS::S3::Bucket", s3_bucket),
    ("AWS::DynamoDB::Table", dynamodb_table),
    ("AWS::SQS::Queue", sqs_queue),
    ("AWS::SNS::Topic", sns_topic),
    ("AWS::ApiGateway::RestApi", rest_api),
    ("AWS::ApiGatewayV2::Api", http_api),
    ("AWS::KMS::Key", kms_key),
    ("AWS::SecretsManager::Secret", secret),
    ("AWS::CloudWatch::Alarm", cloudwatch_alarm),
    ("AWS::Logs::LogGroup", log_group),
    ("AWS::ElasticLoadBalancingV2::LoadBalancer", load_balancer),
    ("AWS::EKS::Cluster", eks_cluster),
    ("AWS::Kinesis::Stream", kinesis_stream),
];

/// Operating system implied by an AMI id; templates rarely say it directly
fn operating_system(image_id: &str) -> &'static str {
    let image_id = image_id.to_lowercase();
    if image_id.contains("windows") {
        "Windows"
    } else if image_id.contains("rhel") {
        "RHEL"
    } else if image_id.contains("suse") {
        "SUSE"
    } else {
        "Linux"
    }
}

fn ec2_instance(props: &Properties, region: &str) -> ProductQuery {
    let instance_type = props.str_prop("InstanceType").unwrap_or("t2.micro");
    let os = operating_system(props.str_prop("ImageId").unwrap_or_default());
    let tenancy = props
        .object_prop("Placement")
        .and_then(|p| p.str_prop("Tenancy"))
        .map(|t| match t {
            "dedicated" => "Dedicated",
            "host" => "Host",
            _ => "Shared",
        })
        .unwrap_or("Shared");

    ProductQuery::aws(
        "AmazonEC2",
        "Compute Instance",
        region,
        vec![
            AttributeFilter::exact("instanceType", instance_type),
            AttributeFilter::exact("operatingSystem", os),
            AttributeFilter::exact("tenancy", tenancy),
            AttributeFilter::exact("capacitystatus", "Used"),
            AttributeFilter::exact("preInstalledSw", "NA"),
        ],
    )
}

fn ebs_volume(props: &Properties, region: &str) -> ProductQuery {
    let volume_type = props.str_prop("VolumeType").unwrap_or("gp3");
    ProductQuery::aws(
        "AmazonEC2",
        "Storage",
        region,
        vec![AttributeFilter::exact("volumeApiName", volume_type)],
    )
}

fn elastic_ip(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonEC2",
        "IP Address",
        region,
        vec![AttributeFilter::regex("usagetype", "/ElasticIP:IdleAddress/")],
    )
}

fn nat_gateway(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonEC2",
        "NAT Gateway",
        region,
        vec![AttributeFilter::regex("usagetype", "/NatGateway-Hours/")],
    )
}

fn rds_instance(props: &Properties, region: &str) -> ProductQuery {
    let instance_class = props.str_prop("DBInstanceClass").unwrap_or("db.t3.micro");
    let engine = match props.str_prop("Engine").unwrap_or("mysql").to_lowercase().as_str() {
        "postgres" | "postgresql" => "PostgreSQL",
        "mariadb" => "MariaDB",
        e if e.starts_with("oracle") => "Oracle",
        e if e.starts_with("sqlserver") => "SQL Server",
        _ => "MySQL",
    };
    let deployment = if props.bool_prop("MultiAZ").unwrap_or(false) {
        "Multi-AZ"
    } else {
        "Single-AZ"
    };

    ProductQuery::aws(
        "AmazonRDS",
        "Database Instance",
        region,
        vec![
            AttributeFilter::exact("instanceType", instance_class),
            AttributeFilter::exact("databaseEngine", engine),
            AttributeFilter::exact("deploymentOption", deployment),
        ],
    )
}

fn lambda_function(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AWSLambda",
        "Serverless",
        region,
        vec![AttributeFilter::regex("usagetype", "/GB-Second/")],
    )
}

fn s3_bucket(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonS3",
        "Storage",
        region,
        vec![
            AttributeFilter::regex("usagetype", "/TimedStorage-ByteHrs/"),
            AttributeFilter::exact("storageClass", "General Purpose"),
        ],
    )
}

fn dynamodb_table(props: &Properties, region: &str) -> ProductQuery {
    let family = match props.str_prop("BillingMode").unwrap_or("PAY_PER_REQUEST") {
        "PROVISIONED" => "Provisioned IOPS",
        _ => "Amazon DynamoDB PayPerRequest Throughput",
    };
    ProductQuery::aws(
        "AmazonDynamoDB",
        family,
        region,
        vec![AttributeFilter::exact("group", "DDB-ReadUnits")],
    )
}

fn sqs_queue(props: &Properties, region: &str) -> ProductQuery {
    let queue_type = if props.bool_prop("FifoQueue").unwrap_or(false) {
        "FIFO (first-in, first-out)"
    } else {
        "Standard"
    };
    ProductQuery::aws(
        "AWSQueueService",
        "API Request",
        region,
        vec![AttributeFilter::exact("queueType", queue_type)],
    )
}

fn sns_topic(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonSNS",
        "API Request",
        region,
        vec![AttributeFilter::regex("usagetype", "/Requests-Tier1$/")],
    )
}

fn rest_api(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonApiGateway",
        "API Calls",
        region,
        vec![AttributeFilter::regex("usagetype", "/ApiGatewayRequest/")],
    )
}

fn http_api(props: &Properties, region: &str) -> ProductQuery {
    let usage_type = match props.str_prop("ProtocolType").unwrap_or("HTTP") {
        "WEBSOCKET" => "/ApiGatewayMessage/",
        _ => "/ApiGatewayHttpRequest/",
    };
    ProductQuery::aws(
        "AmazonApiGateway",
        "API Calls",
        region,
        vec![AttributeFilter::regex("usagetype", usage_type)],
    )
}

fn kms_key(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "awskms",
        "Encryption Key",
        region,
        vec![AttributeFilter::exact("usagetype", format!("{}-KMS-Keys", region))],
    )
}

fn secret(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws("AWSSecretsManager", "Secret", region, Vec::new())
}

fn cloudwatch_alarm(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonCloudWatch",
        "Alarm",
        region,
        vec![AttributeFilter::regex("usagetype", "/AlarmMonitorUsage/")],
    )
}

fn log_group(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonCloudWatch",
        "Data Payload",
        region,
        vec![AttributeFilter::regex("usagetype", "/DataProcessing-Bytes/")],
    )
}

fn load_balancer(props: &Properties, region: &str) -> ProductQuery {
    let family = match props.str_prop("Type").unwrap_or("application") {
        "network" => "Load Balancer-Network",
        "gateway" => "Load Balancer-Gateway",
        _ => "Load Balancer-Application",
    };
    ProductQuery::aws(
        "AWSELB",
        family,
        region,
        vec![AttributeFilter::regex("usagetype", "/LoadBalancerUsage/")],
    )
}

fn eks_cluster(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonEKS",
        "Compute",
        region,
        vec![AttributeFilter::regex("usagetype", "/AmazonEKS-Hours:perCluster/")],
    )
}

fn kinesis_stream(_props: &Properties, region: &str) -> ProductQuery {
    ProductQuery::aws(
        "AmazonKinesis",
        "Kinesis Streams",
        region,
        vec![AttributeFilter::regex("usagetype", "/Storage-ShardHour/")],
    )
}
