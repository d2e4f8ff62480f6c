//! Tiered cost aggregation
//!
//! Integrates a piecewise unit-price curve over an estimated usage volume.
//! Pure functions only: no I/O, no clock, no randomness. All arithmetic is
//! done in `Decimal`; rounding to the currency's minor unit happens only when a
//! figure leaves the crate (`round_currency`, `round_hourly`).

use crate::error::{CostError, Result};
use crate::model::{PriceTier, TierApplication};
use rust_decimal::{Decimal, RoundingStrategy};

/// Hours in the billing month used for hourly <-> monthly conversions
pub const HOURS_PER_MONTH: Decimal = Decimal::from_parts(730, 0, 0, false, 0);

const CURRENCY_DP: u32 = 2;
const HOURLY_DP: u32 = 4;

/// Result of integrating a tier curve
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Unrounded total cost
    pub total: Decimal,
    /// One entry per tier that consumed a non-zero amount
    pub breakdown: Vec<TierApplication>,
}

/// Check the ordering/contiguity invariant of a tier set
///
/// An empty set is valid here; callers decide what "no tiers" means.
pub fn validate_tiers(tiers: &[PriceTier]) -> Result<()> {
    let Some(first) = tiers.first() else {
        return Ok(());
    };

    if !first.start_usage.is_zero() {
        return Err(CostError::invalid_tiers(format!(
            "first tier starts at {} instead of 0",
            first.start_usage
        )));
    }

    for (i, tier) in tiers.iter().enumerate() {
        if tier.unit_price.is_sign_negative() && !tier.unit_price.is_zero() {
            return Err(CostError::invalid_tiers(format!(
                "tier {} has negative unit price {}",
                i, tier.unit_price
            )));
        }

        match tier.end_usage {
            Some(end) if end <= tier.start_usage => {
                return Err(CostError::invalid_tiers(format!(
                    "tier {} is empty or inverted ({}..{})",
                    i, tier.start_usage, end
                )));
            }
            None if i + 1 != tiers.len() => {
                return Err(CostError::invalid_tiers(format!(
                    "tier {} is unbounded but is not the last tier",
                    i
                )));
            }
            _ => {}
        }

        if let Some(next) = tiers.get(i + 1) {
            if tier.end_usage != Some(next.start_usage) {
                return Err(CostError::invalid_tiers(format!(
                    "tier {} ends at {:?} but tier {} starts at {}",
                    i,
                    tier.end_usage,
                    i + 1,
                    next.start_usage
                )));
            }
        }
    }

    Ok(())
}

/// Integrate `tiers` over `usage`
///
/// Tiers must satisfy `validate_tiers`; a violating set is rejected with
/// `CostError::InvalidTierSet` rather than producing a silently wrong total.
pub fn aggregate(tiers: &[PriceTier], usage: Decimal) -> Result<Aggregate> {
    if usage.is_sign_negative() && !usage.is_zero() {
        return Err(CostError::InvalidUsage(format!(
            "usage must be non-negative, got {}",
            usage
        )));
    }
    validate_tiers(tiers)?;

    let mut total = Decimal::ZERO;
    let mut breakdown = Vec::new();

    for tier in tiers {
        if usage <= tier.start_usage {
            break;
        }

        let upper = match tier.end_usage {
            Some(end) => end.min(usage),
            None => usage,
        };
        let applied = upper - tier.start_usage;
        let subtotal = applied * tier.unit_price;

        total += subtotal;
        breakdown.push(TierApplication {
            tier: tier.clone(),
            applied_usage: applied,
            subtotal,
        });

        if tier.end_usage.map_or(true, |end| usage <= end) {
            break;
        }
    }

    Ok(Aggregate { total, breakdown })
}

/// Round a monthly figure to cents
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Round an hourly figure; sub-cent hourly rates are common
pub fn round_hourly(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(HOURLY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Hourly cost for a monthly figure
pub fn hourly_from_monthly(monthly: Decimal) -> Decimal {
    monthly / HOURS_PER_MONTH
}
