// Library module for the report and chat pipelines

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod store;

/// Calculate price per square foot
/// Formula: price / area_sqft
pub fn price_per_sqft(price: f64, area_sqft: f64) -> Option<f64> {
    if !area_sqft.is_finite() || area_sqft <= 0.0 || !price.is_finite() {
        return None;
    }
    Some(price / area_sqft)
}
