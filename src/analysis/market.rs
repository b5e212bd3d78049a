//! Market averages written onto a report

use crate::analysis::types::{Comparable, PriceAnalysis, RoomAnalysis};
use rust_decimal::prelude::*;

/// Mean sale price and the ratio of mean price to mean floor area,
/// both rounded to cents. None for an empty set.
pub fn analyze_prices(comps: &[Comparable]) -> Option<PriceAnalysis> {
    if comps.is_empty() {
        return None;
    }
    let n = Decimal::from(comps.len() as u64);
    let total_price: Decimal = comps.iter().map(|c| Decimal::from(c.price)).sum();
    let total_sqft: Decimal = comps.iter().map(|c| Decimal::from(c.area_sqft)).sum();

    let avg_price = total_price / n;
    let avg_sqft = total_sqft / n;
    let avg_pps = avg_price.checked_div(avg_sqft)?;

    Some(PriceAnalysis {
        avg_market_price: avg_price.round_dp(2),
        avg_price_per_sqft: avg_pps.round_dp(2),
    })
}

/// Rounded mean bedroom and bathroom counts
pub fn analyze_beds_baths(comps: &[Comparable]) -> Option<RoomAnalysis> {
    if comps.is_empty() {
        return None;
    }
    let n = comps.len() as f64;
    let beds = comps.iter().map(|c| c.beds as f64).sum::<f64>() / n;
    let baths = comps.iter().map(|c| c.baths as f64).sum::<f64>() / n;

    Some(RoomAnalysis {
        avg_beds: beds.round() as i32,
        avg_baths: baths.round() as i32,
    })
}
