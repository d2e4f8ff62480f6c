use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stackcost::config::{self, Config, PricingSourceKind};
use stackcost::report::{self, OutputFormat};
use stackcost::{cancellation, pricing, template, CostResolver, PricingSource, StackComparator};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackcost")]
#[command(
    about = "Estimate the cost impact of CloudFormation template changes",
    long_about = "stackcost diffs two versions of a CloudFormation template and prices every\ndeclared resource on both sides.\n\nPricing sources:\n  - Infracost Cloud Pricing API (default, needs INFRACOST_API_KEY)\n  - AWS Price List API (uses the default AWS credential chain)\n  - Static TOML price table (offline)\n\nUsage-based resources are estimated from their properties and reported\nseparately from the fixed monthly totals."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the monthly cost of two template versions
    ///
    /// Examples:
    ///   stackcost compare main.yaml feature.yaml
    ///   stackcost compare old.json new.json --region eu-west-1 --output json
    ///   stackcost compare old.yaml new.yaml --prices prices.toml
    Compare {
        /// Template before the change
        old: PathBuf,
        /// Template after the change
        new: PathBuf,
        /// Pricing region (default: config, then AWS_REGION, then us-east-1)
        #[arg(long)]
        region: Option<String>,
        /// Maximum concurrent price lookups
        #[arg(long)]
        concurrency: Option<usize>,
        /// Pricing source (infracost, aws, static)
        #[arg(long)]
        source: Option<PricingSourceKind>,
        /// Offline price table; implies --source static
        #[arg(long, value_name = "FILE")]
        prices: Option<PathBuf>,
        /// Give up on unfinished lookups after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Show resource changes between two template versions (no pricing)
    Diff {
        /// Template before the change
        old: PathBuf,
        /// Template after the change
        new: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Initialize configuration
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = ".stackcost.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging - suppress INFO by default, only show warnings and errors
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    // Logs go to stderr so --output json stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compare {
            old,
            new,
            region,
            concurrency,
            source,
            prices,
            deadline_secs,
            output,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(region) = region {
                config.pricing.region = Some(region);
            }
            if let Some(concurrency) = concurrency {
                config.comparison.max_concurrency = concurrency;
            }
            if let Some(source) = source {
                config.pricing.source = source;
            }
            if let Some(prices) = prices {
                config.pricing.source = PricingSourceKind::Static;
                config.pricing.price_file = Some(prices);
            }
            if deadline_secs.is_some() {
                config.comparison.deadline_secs = deadline_secs;
            }
            compare(&config, &old, &new, output).await?;
        }
        Commands::Diff { old, new, output } => {
            let old_template = load(&old)?;
            let new_template = load(&new)?;
            let diffs = stackcost::diff(&old_template.resources, &new_template.resources)?;
            let summary = stackcost::summarize(&old_template.resources, &diffs);
            println!("{}", report::render_diff(&diffs, summary, output)?);
        }
        Commands::Init { output } => {
            config::init_config(&output)?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<template::Template> {
    template::load_template(path)
        .with_context(|| format!("Failed to load template: {}", path.display()))
}

async fn compare(config: &Config, old: &Path, new: &Path, output: OutputFormat) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let old_template = load(old)?;
    let new_template = load(new)?;

    let source = pricing::from_config(config)
        .await
        .with_context(|| format!("Failed to set up {} pricing source", config.pricing.source))?;
    let region = config.region();
    info!(source = source.name(), region = %region, "pricing stack");

    let resolver = CostResolver::new(source, region)
        .with_fallback_costs(config.fallback_costs.clone())
        .with_usage_overrides(config.usage_overrides.clone());
    let comparator =
        StackComparator::new(resolver).with_max_concurrency(config.comparison.max_concurrency);

    let (handle, mut token) = cancellation();
    if let Some(secs) = config.comparison.deadline_secs {
        token = token.with_timeout(Duration::from_secs(secs));
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; reporting partial results");
            handle.cancel();
        }
    });

    let comparison = comparator
        .compare_with_cancel(&old_template.resources, &new_template.resources, token)
        .await?;

    println!("{}", report::render_comparison(&comparison, output)?);
    Ok(())
}
