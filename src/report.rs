//! Report rendering for comparisons and diffs

use crate::compare::{Side, StackComparison};
use crate::diff::DiffSummary;
use crate::error::Result;
use crate::model::{ChangeType, PricingModel, ResourceCost, ResourceDiff};
use comfy_table::{Cell, Color, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write;

pub const PRICING_UNAVAILABLE: &str = "pricing unavailable";

/// Output format of the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn render_comparison(comparison: &StackComparison, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(comparison)?),
        OutputFormat::Text => Ok(comparison_text(comparison)),
    }
}

#[derive(Serialize)]
struct DiffReport<'a> {
    summary: DiffSummary,
    diffs: &'a [ResourceDiff],
}

pub fn render_diff(diffs: &[ResourceDiff], summary: DiffSummary, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&DiffReport { summary, diffs })?),
        OutputFormat::Text => Ok(diff_text(diffs, summary)),
    }
}

/// "$12.34" for fixed, "~$1.20 (usage-based)" for estimates
pub fn format_cost(cost: &ResourceCost) -> String {
    match (cost.pricing_model, cost.monthly_cost) {
        (PricingModel::Error, _) | (_, None) => PRICING_UNAVAILABLE.to_string(),
        (PricingModel::Free, _) => "free".to_string(),
        (PricingModel::UsageBased, Some(m)) => format!("~${:.2} (usage-based)", m),
        (PricingModel::Fixed, Some(m)) => format!("${:.2}", m),
    }
}

fn format_delta(delta: Decimal) -> String {
    if delta.is_sign_negative() && !delta.is_zero() {
        format!("-${:.2}", delta.abs())
    } else {
        format!("+${:.2}", delta)
    }
}

fn change_cell(change: ChangeType) -> Cell {
    let cell = Cell::new(change.to_string());
    match change {
        ChangeType::Added => cell.fg(Color::Green),
        ChangeType::Removed => cell.fg(Color::Red),
        ChangeType::Modified => cell.fg(Color::Yellow),
        ChangeType::Unchanged => cell,
    }
}

/// Fixed monthly figure counted in the totals; `None` when not comparable
fn fixed_part(cost: Option<&ResourceCost>) -> Option<Decimal> {
    match cost {
        None => Some(Decimal::ZERO),
        Some(c) => match c.pricing_model {
            PricingModel::Fixed => c.monthly_cost,
            PricingModel::Free | PricingModel::UsageBased => Some(Decimal::ZERO),
            PricingModel::Error => None,
        },
    }
}

fn comparison_text(comparison: &StackComparison) -> String {
    let mut out = String::new();
    let summary = comparison.summary();
    let _ = writeln!(
        out,
        "Region: {} | {} added, {} removed, {} modified, {} unchanged",
        comparison.region, summary.added, summary.removed, summary.modified, summary.unchanged
    );
    if comparison.cancelled {
        let _ = writeln!(out, "WARNING: cost resolution was cancelled; some resources are unpriced");
    }

    if comparison.diffs.is_empty() {
        let _ = writeln!(out, "\nNo resource changes");
    } else {
        let mut table = Table::new();
        table.set_header(vec!["Logical ID", "Type", "Change", "Old/month", "New/month", "Delta"]);
        for d in &comparison.diffs {
            let (old, new) = comparison.cost_pair(&d.logical_id);
            let delta = match (fixed_part(old), fixed_part(new)) {
                (Some(o), Some(n)) => format_delta(n - o),
                _ => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(&d.logical_id),
                Cell::new(&d.resource_type),
                change_cell(d.change_type),
                Cell::new(old.map_or_else(|| "-".to_string(), format_cost)),
                Cell::new(new.map_or_else(|| "-".to_string(), format_cost)),
                Cell::new(delta),
            ]);
        }
        let _ = writeln!(out, "\n{}", table);
    }

    let _ = writeln!(
        out,
        "\nFixed monthly cost: ${:.2} -> ${:.2} ({})",
        comparison.old_total,
        comparison.new_total,
        format_delta(comparison.delta())
    );

    let usage_based = comparison.usage_based(Side::New);
    if !usage_based.is_empty() {
        let _ = writeln!(out, "\nUsage-based (estimated, not in totals):");
        for cost in usage_based {
            let basis = cost
                .usage
                .as_ref()
                .map(|u| format!(" for {} {}", u.amount.normalize(), u.unit))
                .unwrap_or_default();
            let _ = writeln!(out, "  {} ({}): {}{}", cost.logical_id, cost.resource_type, format_cost(cost), basis);
        }
    }

    let errors: Vec<&ResourceCost> = comparison
        .errors(Side::Old)
        .into_iter()
        .chain(comparison.errors(Side::New))
        .collect();
    if !errors.is_empty() {
        let _ = writeln!(out, "\nUnpriced resources:");
        for cost in errors {
            let _ = writeln!(
                out,
                "  {} ({}): {}",
                cost.logical_id,
                cost.resource_type,
                cost.error.as_deref().unwrap_or(PRICING_UNAVAILABLE)
            );
        }
    }

    out
}

fn diff_text(diffs: &[ResourceDiff], summary: DiffSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} added, {} removed, {} modified, {} unchanged",
        summary.added, summary.removed, summary.modified, summary.unchanged
    );
    if diffs.is_empty() {
        return out;
    }

    let mut table = Table::new();
    table.set_header(vec!["Logical ID", "Type", "Change", "Properties"]);
    for d in diffs {
        let keys: Vec<&str> = d.property_changes.keys().map(String::as_str).collect();
        table.add_row(vec![
            Cell::new(&d.logical_id),
            Cell::new(&d.resource_type),
            change_cell(d.change_type),
            Cell::new(keys.join(", ")),
        ]);
    }
    let _ = writeln!(out, "{}", table);
    out
}
