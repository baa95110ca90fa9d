//! Ticker payload -> canonical `PriceUpdate`.

use crate::calc;
use crate::cex::binance::TickerEvent;
use crate::errors::{AppError, Result};
use crate::models::PriceUpdate;

/// Lowercase `symbol` and strip the quote-asset suffix: `BTCUSDT` -> `btc`.
///
/// Returns `None` when the symbol is not quoted in `quote_asset`.
pub fn canonical_instrument_id(symbol: &str, quote_asset: &str) -> Option<String> {
    let symbol = symbol.to_lowercase();
    let base = symbol.strip_suffix(&quote_asset.to_lowercase())?;
    if base.is_empty() {
        return None;
    }
    Some(base.to_string())
}

/// Normalize one ticker event.
///
/// `previous_price` is the last price accepted for the same instrument; the
/// "1h" change is measured against it (falling back to the current price on
/// the first tick), an approximation of a true one-hour window.
pub fn normalize(
    event: &TickerEvent,
    quote_asset: &str,
    previous_price: Option<f64>,
    observed_at_epoch_millis: i64,
) -> Result<PriceUpdate> {
    let instrument_id = canonical_instrument_id(&event.symbol, quote_asset).ok_or_else(|| {
        AppError::MalformedPayload(format!(
            "symbol {:?} is not quoted in {quote_asset}",
            event.symbol
        ))
    })?;

    let price = parse_decimal("last price", &event.last_price)?;
    let change_24h = parse_decimal("24h change", &event.price_change)?;
    let change_percent_24h = parse_decimal("24h change percent", &event.price_change_percent)?;
    let base_volume = parse_decimal("24h volume", &event.volume)?;

    let change_1h = calc::compute(previous_price.unwrap_or(price), price)?;

    Ok(PriceUpdate {
        instrument_id,
        price,
        change_1h,
        change_24h: calc::from_reported(change_percent_24h, change_24h),
        volume_24h: base_volume * price,
        observed_at_epoch_millis,
    })
}

fn parse_decimal(field: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| AppError::MalformedPayload(format!("{field} {raw:?}: {e}")))?;
    if !value.is_finite() {
        return Err(AppError::MalformedPayload(format!("{field} {raw:?} is not finite")));
    }
    Ok(value)
}
