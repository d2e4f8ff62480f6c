use crate::error::{ConfigError, CostError};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const API_KEY_ENV: &str = "INFRACOST_API_KEY";
pub const REGION_ENV: &str = "AWS_REGION";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// Assumed monthly cost per resource type when the pricing source has no tiers
    #[serde(default = "default_fallback_costs")]
    pub fallback_costs: BTreeMap<String, Decimal>,
    /// Monthly usage per logical id, in the unit the resource is priced in
    #[serde(default)]
    pub usage_overrides: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSourceKind {
    #[default]
    Infracost,
    Aws,
    Static,
}

impl fmt::Display for PricingSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PricingSourceKind::Infracost => "infracost",
            PricingSourceKind::Aws => "aws",
            PricingSourceKind::Static => "static",
        };
        f.write_str(s)
    }
}

impl FromStr for PricingSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "infracost" => Ok(PricingSourceKind::Infracost),
            "aws" => Ok(PricingSourceKind::Aws),
            "static" => Ok(PricingSourceKind::Static),
            other => Err(ConfigError::InvalidSource(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub source: PricingSourceKind,
    /// Falls back to `AWS_REGION`, then `us-east-1`
    pub region: Option<String>,
    /// Infracost GraphQL endpoint override
    pub endpoint: Option<String>,
    /// Falls back to `INFRACOST_API_KEY`
    pub api_key: Option<String>,
    /// Price table for the `static` source
    pub price_file: Option<PathBuf>,
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            source: PricingSourceKind::Infracost,
            region: None,
            endpoint: None,
            api_key: None,
            price_file: None,
            max_attempts: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub max_concurrency: usize,
    /// Cancel outstanding resolutions after this many seconds
    pub deadline_secs: Option<u64>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deadline_secs: None,
        }
    }
}

fn default_fallback_costs() -> BTreeMap<String, Decimal> {
    [
        ("AWS::EKS::Cluster", Decimal::new(73, 0)),
        ("AWS::Kinesis::Stream", Decimal::new(11, 0)),
        ("AWS::Transfer::Server", Decimal::new(216, 0)),
        ("AWS::SecretsManager::Secret", Decimal::new(4, 1)),
        ("AWS::KMS::Key", Decimal::new(1, 0)),
        ("AWS::Route53::HostedZone", Decimal::new(5, 1)),
        ("AWS::CloudWatch::Alarm", Decimal::new(10, 2)),
        ("AWS::CloudWatch::Dashboard", Decimal::new(300, 2)),
    ]
    .into_iter()
    .map(|(resource_type, cost)| (resource_type.to_string(), cost))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            comparison: ComparisonConfig::default(),
            fallback_costs: default_fallback_costs(),
            usage_overrides: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p.to_path_buf()
        } else {
            // Try .stackcost.toml in current dir, then ~/.config/stackcost/config.toml
            let local = PathBuf::from(".stackcost.toml");
            if local.exists() {
                local
            } else {
                dirs::config_dir()
                    .map(|d| d.join("stackcost").join("config.toml"))
                    .unwrap_or_else(|| PathBuf::from(".stackcost.toml"))
            }
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            let config: Config = toml::from_str(&content).with_context(|| {
                let mut err = format!("Failed to parse config: {}", config_path.display());
                err.push_str("\n  Common issues:");
                err.push_str("\n    - Invalid TOML syntax");
                err.push_str("\n    - Unknown pricing source (use infracost, aws or static)");
                err.push_str("\n    - Costs must be quoted decimals, e.g. \"73.00\"");
                err.push_str("\n  Tip: Run 'stackcost init' to create a new config file");
                err
            })?;
            Ok(config)
        } else {
            // Use defaults but warn if user explicitly provided a path
            if path.is_some() {
                tracing::warn!(
                    "Config file not found: {}; using default configuration",
                    config_path.display()
                );
            }
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Check the settings a comparison depends on
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.comparison.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "comparison.max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.pricing.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pricing.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if let Some((resource_type, cost)) =
            self.fallback_costs.iter().find(|(_, cost)| cost.is_sign_negative())
        {
            return Err(ConfigError::InvalidValue {
                field: format!("fallback_costs.\"{}\"", resource_type),
                reason: format!("negative cost {}", cost),
            }
            .into());
        }
        if let Some((logical_id, amount)) =
            self.usage_overrides.iter().find(|(_, amount)| amount.is_sign_negative())
        {
            return Err(ConfigError::InvalidValue {
                field: format!("usage_overrides.{}", logical_id),
                reason: format!("negative usage {}", amount),
            }
            .into());
        }
        match self.pricing.source {
            PricingSourceKind::Infracost if self.api_key().is_none() => Err(CostError::Config(
                ConfigError::MissingField(format!("pricing.api_key (or {})", API_KEY_ENV)),
            )),
            PricingSourceKind::Static if self.pricing.price_file.is_none() => Err(
                CostError::Config(ConfigError::MissingField("pricing.price_file".to_string())),
            ),
            _ => Ok(()),
        }
    }

    /// Configured API key, else the environment
    pub fn api_key(&self) -> Option<String> {
        self.pricing
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }

    /// Configured region, else the environment, else `us-east-1`
    pub fn region(&self) -> String {
        self.pricing
            .region
            .clone()
            .or_else(|| std::env::var(REGION_ENV).ok().filter(|r| !r.is_empty()))
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }
}

pub fn init_config(output: &Path) -> Result<()> {
    let config = Config::default();
    config.save(output)?;
    println!("Created config file: {}", output.display());
    Ok(())
}
