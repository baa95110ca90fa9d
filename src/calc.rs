use crate::errors::{AppError, Result};
use crate::models::{Direction, PriceChange};

/// Decimal places kept on percentage changes.
pub const PERCENT_DECIMALS: i32 = 2;
/// Decimal places kept on absolute changes.
pub const ABSOLUTE_DECIMALS: i32 = 8;

/// Round `value` half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Compute the change from `old_price` to `new_price`.
///
/// # Errors
/// `AppError::InvalidBasePrice` when `old_price` is zero or not finite; the
/// percentage would otherwise be a silent division by zero.
pub fn compute(old_price: f64, new_price: f64) -> Result<PriceChange> {
    if old_price == 0.0 || !old_price.is_finite() {
        return Err(AppError::InvalidBasePrice(old_price));
    }
    let delta = new_price - old_price;
    Ok(PriceChange {
        percentage: round_to(delta / old_price * 100.0, PERCENT_DECIMALS),
        absolute_value: round_to(delta, ABSOLUTE_DECIMALS),
        direction: Direction::from_delta(delta),
    })
}

/// Build a change from statistics reported by the exchange (e.g. the 24h window).
pub fn from_reported(percentage: f64, absolute_value: f64) -> PriceChange {
    PriceChange {
        percentage: round_to(percentage, PERCENT_DECIMALS),
        absolute_value: round_to(absolute_value, ABSOLUTE_DECIMALS),
        direction: Direction::from_delta(absolute_value),
    }
}
