//! Core data types for the analysis pipeline
//! Pure data structures with no I/O

use serde::{Deserialize, Serialize};

/// Minimum number of normalized comparables needed to train the price model
pub const MIN_SAMPLES: usize = 10;

/// Rating returned when comparables are too sparse or the subject is incomplete
pub const NEUTRAL_RATING: f64 = 2.5;

/// Upper bound on comparables handed to the narrative model
pub const COMPARABLE_SAMPLE_LIMIT: usize = 50;

/// A normalized comparable listing. Every field is strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparable {
    pub price: i64,
    pub area_sqft: i64,
    pub beds: i32,
    pub baths: i32,
}

impl Comparable {
    /// Composite key used for deduplication
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.price, self.area_sqft, self.beds, self.baths
        )
    }

    pub fn price_per_sqft(&self) -> f64 {
        crate::price_per_sqft(self.price as f64, self.area_sqft as f64).unwrap_or(0.0)
    }
}

/// Size profile of the subject used by the variance gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectProfile {
    pub area_sqft: i64,
    pub beds: i32,
    pub baths: i32,
}

/// The property being rated.
///
/// Fields are optional because a counterfactual extractor may leave some of
/// them unset; an incomplete subject always rates neutral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub price: Option<f64>,
    pub area_sqft: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
}

impl Subject {
    /// All four attributes present, finite and positive
    pub fn complete(&self) -> Option<CompleteSubject> {
        let valid = |v: Option<f64>| v.filter(|x| x.is_finite() && *x > 0.0);
        Some(CompleteSubject {
            price: valid(self.price)?,
            area_sqft: valid(self.area_sqft)?,
            beds: valid(self.beds)?,
            baths: valid(self.baths)?,
        })
    }

    /// Replace attributes with the ones a counterfactual supplies
    pub fn with_overrides(self, overrides: &Subject) -> Subject {
        Subject {
            price: overrides.price.or(self.price),
            area_sqft: overrides.area_sqft.or(self.area_sqft),
            beds: overrides.beds.or(self.beds),
            baths: overrides.baths.or(self.baths),
        }
    }

    /// Whole-number profile for the normalizer, if the subject is complete
    pub fn profile(&self) -> Option<SubjectProfile> {
        let s = self.complete()?;
        Some(SubjectProfile {
            area_sqft: s.area_sqft.floor() as i64,
            beds: s.beds.floor() as i32,
            baths: s.baths.floor() as i32,
        })
    }
}

/// A subject whose attributes have all been validated
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompleteSubject {
    pub price: f64,
    pub area_sqft: f64,
    pub beds: f64,
    pub baths: f64,
}

impl CompleteSubject {
    pub fn price_per_sqft(&self) -> f64 {
        crate::price_per_sqft(self.price, self.area_sqft).unwrap_or(0.0)
    }
}

/// Market-level averages over a normalized comparable set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketAverages {
    pub avg_price: f64,
    pub avg_sqft: f64,
    /// avg_price / avg_sqft
    pub avg_pps: f64,
    pub avg_beds: i32,
    pub avg_baths: i32,
}

/// Price component of the rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceComponent {
    pub predicted_price: f64,
    pub subject_price: f64,
    pub diff_pct: f64,
    pub score: f64,
    pub remarks: String,
}

/// Price-per-square-foot component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpsComponent {
    pub subject_pps: f64,
    pub market_pps: f64,
    pub diff_pct: f64,
    pub score: f64,
    pub remarks: String,
}

/// Bedroom count and space-worth component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedComponent {
    pub subject_beds: f64,
    pub market_beds: i32,
    pub count_score: f64,
    /// Matrix value when counts match, otherwise the space-per-bed adjustment
    pub worth_score: f64,
    pub sqft_per_bed: f64,
    pub market_sqft_per_bed: f64,
    pub score: f64,
    pub remarks: String,
}

/// Bathroom ratio and space-worth component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BathComponent {
    pub subject_baths: f64,
    pub market_baths: i32,
    pub bath_to_bed_ratio: f64,
    pub ratio_score: f64,
    pub worth_score: f64,
    pub sqft_per_bath: f64,
    pub market_sqft_per_bath: f64,
    pub score: f64,
    pub remarks: String,
}

/// Volatility of price per square foot across the comparables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityComponent {
    pub pps_mean: f64,
    pub pps_std_dev: f64,
    pub coefficient_of_variation: f64,
    pub score: f64,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutComponent {
    pub score: f64,
    pub remarks: String,
}

/// Every intermediate scalar behind a rating, consumed by the narrative model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub sample_size: usize,
    pub price: PriceComponent,
    pub price_per_sqft: PpsComponent,
    pub beds: BedComponent,
    pub baths: BathComponent,
    pub market_stability: StabilityComponent,
    pub layout: LayoutComponent,
    /// Sum of components before clipping and rounding
    pub raw_total: f64,
    pub final_rating: f64,
}

/// Result of the scoring engine. A missing breakdown marks the neutral fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingOutcome {
    pub rating: f64,
    pub breakdown: Option<Breakdown>,
}

impl RatingOutcome {
    pub fn neutral() -> Self {
        Self {
            rating: NEUTRAL_RATING,
            breakdown: None,
        }
    }

    pub fn is_neutral_fallback(&self) -> bool {
        self.breakdown.is_none()
    }

    /// Breakdown as JSON; the fallback serializes as `{}`
    pub fn breakdown_json(&self) -> serde_json::Value {
        match &self.breakdown {
            Some(b) => serde_json::to_value(b).unwrap_or_else(|_| serde_json::json!({})),
            None => serde_json::json!({}),
        }
    }
}

/// Output of the price analysis node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceAnalysis {
    pub avg_market_price: rust_decimal::Decimal,
    pub avg_price_per_sqft: rust_decimal::Decimal,
}

/// Output of the beds/baths analysis node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomAnalysis {
    pub avg_beds: i32,
    pub avg_baths: i32,
}
