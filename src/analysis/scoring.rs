//! Scoring engine - deterministic 0.0-5.0 investment rating
//!
//! A linear price model trained on the comparables predicts what the subject
//! should cost; six rule-based components then adjust around fixed centres.
//! The total is clipped to [0, 5] and rounded to the nearest half point.

use crate::analysis::regression::LinearModel;
use crate::analysis::types::{
    BathComponent, BedComponent, Breakdown, Comparable, CompleteSubject, LayoutComponent,
    MarketAverages, PpsComponent, PriceComponent, RatingOutcome, StabilityComponent, Subject,
    MIN_SAMPLES,
};
use tracing::debug;

const PRICE_CENTER: f64 = 1.4;
const PRICE_LIMIT: f64 = 2.0;
const PRICE_STEP: f64 = 0.6;
const PRICE_ABOVE_BAND: f64 = 0.20;
const PRICE_BELOW_BAND: f64 = 0.30;

const PPS_CENTER: f64 = 0.77;
const PPS_LIMIT: f64 = 1.1;
const PPS_STEP: f64 = 0.33;
const PPS_ABOVE_BAND: f64 = 0.10;
const PPS_BELOW_BAND: f64 = 0.15;

const BED_LIMIT: f64 = 0.8;
const BATH_LIMIT: f64 = 0.7;
/// Space per room must beat the market by this margin to count as roomy
const SPACE_MARGIN: f64 = 1.10;
const BATH_RATIO_THRESHOLD: f64 = 0.7;

const VOLATILITY_THRESHOLD: f64 = 0.15;
const VOLATILE_MARKET: f64 = -0.6;
const STABLE_MARKET: f64 = 0.3;

const MAX_RATING: f64 = 5.0;

/// Averages over a comparable set, or None when it is empty
pub fn market_averages(comps: &[Comparable]) -> Option<MarketAverages> {
    if comps.is_empty() {
        return None;
    }
    let n = comps.len() as f64;
    let avg_price = comps.iter().map(|c| c.price as f64).sum::<f64>() / n;
    let avg_sqft = comps.iter().map(|c| c.area_sqft as f64).sum::<f64>() / n;
    let avg_beds = comps.iter().map(|c| c.beds as f64).sum::<f64>() / n;
    let avg_baths = comps.iter().map(|c| c.baths as f64).sum::<f64>() / n;

    Some(MarketAverages {
        avg_price,
        avg_sqft,
        avg_pps: crate::price_per_sqft(avg_price, avg_sqft).unwrap_or(0.0),
        avg_beds: avg_beds.round() as i32,
        avg_baths: avg_baths.round() as i32,
    })
}

/// Rate the subject against the comparables.
///
/// Returns the neutral fallback when fewer than [`MIN_SAMPLES`] comparables are
/// available or any subject attribute is missing or zero.
pub fn analyze_investment_rating(
    market: &MarketAverages,
    comps: &[Comparable],
    subject: &Subject,
) -> RatingOutcome {
    let Some(subject) = subject.complete() else {
        debug!("Subject incomplete, returning neutral rating");
        return RatingOutcome::neutral();
    };
    if comps.len() < MIN_SAMPLES {
        debug!(
            "Only {} comparables (need {}), returning neutral rating",
            comps.len(),
            MIN_SAMPLES
        );
        return RatingOutcome::neutral();
    }
    let Some(model) = LinearModel::fit(comps) else {
        return RatingOutcome::neutral();
    };

    let mut predicted = model.predict(subject.area_sqft, subject.beds, subject.baths);
    if !predicted.is_finite() || predicted <= 0.0 {
        // Degenerate fit; fall back to the plain market average
        predicted = market.avg_price;
    }

    let price = price_component(&subject, predicted);
    let pps = pps_component(&subject, market);
    let beds = bed_component(&subject, market, predicted);
    let baths = bath_component(&subject, market, predicted);
    let stability = stability_component(comps);
    let layout = layout_component(&subject, predicted);

    let raw_total =
        price.score + pps.score + beds.score + baths.score + stability.score + layout.score;
    let rating = round_to_half(raw_total.clamp(0.0, MAX_RATING));

    debug!(
        "Rated subject {:.1} (raw {:.3}) from {} comparables",
        rating,
        raw_total,
        comps.len()
    );

    RatingOutcome {
        rating,
        breakdown: Some(Breakdown {
            sample_size: comps.len(),
            price,
            price_per_sqft: pps,
            beds,
            baths,
            market_stability: stability,
            layout,
            raw_total,
            final_rating: rating,
        }),
    }
}

/// Rate from scratch, or hand back a rating computed by an earlier attempt
pub fn rate_or_reuse(
    precomputed: Option<RatingOutcome>,
    comps: &[Comparable],
    subject: &Subject,
) -> RatingOutcome {
    if let Some(outcome) = precomputed {
        return outcome;
    }
    match market_averages(comps) {
        Some(market) => analyze_investment_rating(&market, comps, subject),
        None => RatingOutcome::neutral(),
    }
}

/// Nearest half point: round(2x) / 2
pub fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

fn price_component(subject: &CompleteSubject, predicted: f64) -> PriceComponent {
    let diff_pct = (subject.price - predicted) / predicted;
    let raw = if diff_pct > 0.0 {
        PRICE_CENTER - (diff_pct / PRICE_ABOVE_BAND) * PRICE_STEP
    } else {
        PRICE_CENTER - (diff_pct / PRICE_BELOW_BAND) * PRICE_STEP
    };
    let score = raw.clamp(-PRICE_LIMIT, PRICE_LIMIT);

    let remarks = if diff_pct > 0.0 {
        format!(
            "Asking price is {:.1}% above the model estimate of ${:.0}; overpricing drags the score.",
            diff_pct * 100.0,
            predicted
        )
    } else {
        format!(
            "Asking price is {:.1}% below the model estimate of ${:.0}; the discount lifts the score.",
            -diff_pct * 100.0,
            predicted
        )
    };

    PriceComponent {
        predicted_price: predicted,
        subject_price: subject.price,
        diff_pct,
        score,
        remarks,
    }
}

fn pps_component(subject: &CompleteSubject, market: &MarketAverages) -> PpsComponent {
    let subject_pps = subject.price_per_sqft();
    let market_pps = market.avg_pps;
    let diff_pct = if market_pps > 0.0 {
        (subject_pps - market_pps) / market_pps
    } else {
        0.0
    };

    let raw = if diff_pct >= 0.0 {
        PPS_CENTER - (diff_pct / PPS_ABOVE_BAND) * PPS_STEP
    } else {
        PPS_CENTER - (diff_pct / PPS_BELOW_BAND) * PPS_STEP
    };
    let score = raw.clamp(-PPS_LIMIT, PPS_LIMIT);

    let remarks = format!(
        "${:.0}/sqft against a market ${:.0}/sqft ({:+.1}%).",
        subject_pps,
        market_pps,
        diff_pct * 100.0
    );

    PpsComponent {
        subject_pps,
        market_pps,
        diff_pct,
        score,
        remarks,
    }
}

/// Shared 2x2 matrix used when a room count matches the market exactly:
/// (larger than average, at or under the model price) is the best case.
fn space_price_matrix(
    subject: &CompleteSubject,
    market: &MarketAverages,
    predicted: f64,
    values: [f64; 4],
) -> (f64, &'static str) {
    let spacious = subject.area_sqft >= market.avg_sqft;
    let fairly_priced = subject.price <= predicted;
    match (spacious, fairly_priced) {
        (true, true) => (values[0], "larger than average and priced at or below the model"),
        (true, false) => (values[1], "larger than average but priced above the model"),
        (false, true) => (values[2], "smaller than average though priced at or below the model"),
        (false, false) => (values[3], "smaller than average and priced above the model"),
    }
}

fn bed_component(
    subject: &CompleteSubject,
    market: &MarketAverages,
    predicted: f64,
) -> BedComponent {
    let market_beds = market.avg_beds as f64;
    let count_score = if subject.beds >= market_beds + 2.0 {
        0.5
    } else if subject.beds > market_beds {
        0.2
    } else if subject.beds == market_beds {
        0.0
    } else {
        -0.5
    };

    let sqft_per_bed = subject.area_sqft / subject.beds;
    let market_sqft_per_bed = if market.avg_beds > 0 {
        market.avg_sqft / market_beds
    } else {
        market.avg_sqft
    };

    let (worth_score, detail) = if subject.beds == market_beds {
        let (value, label) =
            space_price_matrix(subject, market, predicted, [0.5, 0.3, -0.2, -0.5]);
        (value, format!("Bedroom count matches the market; home is {label}."))
    } else if sqft_per_bed >= market_sqft_per_bed * SPACE_MARGIN {
        (
            0.3,
            format!(
                "{:.0} sqft per bedroom is roomier than the market's {:.0}.",
                sqft_per_bed, market_sqft_per_bed
            ),
        )
    } else {
        (
            -0.3,
            format!(
                "{:.0} sqft per bedroom is tight against the market's {:.0}.",
                sqft_per_bed, market_sqft_per_bed
            ),
        )
    };

    let score = (count_score + worth_score).clamp(-BED_LIMIT, BED_LIMIT);
    let remarks = format!(
        "{} bedrooms vs a market average of {}. {}",
        subject.beds, market.avg_beds, detail
    );

    BedComponent {
        subject_beds: subject.beds,
        market_beds: market.avg_beds,
        count_score,
        worth_score,
        sqft_per_bed,
        market_sqft_per_bed,
        score,
        remarks,
    }
}

fn bath_component(
    subject: &CompleteSubject,
    market: &MarketAverages,
    predicted: f64,
) -> BathComponent {
    let bath_to_bed_ratio = subject.baths / subject.beds;
    let ratio_score = if bath_to_bed_ratio >= BATH_RATIO_THRESHOLD {
        0.45
    } else {
        -0.45
    };

    let market_baths = market.avg_baths as f64;
    let sqft_per_bath = subject.area_sqft / subject.baths;
    let market_sqft_per_bath = if market.avg_baths > 0 {
        market.avg_sqft / market_baths
    } else {
        market.avg_sqft
    };

    let (worth_score, detail) = if subject.baths == market_baths {
        let (value, label) =
            space_price_matrix(subject, market, predicted, [0.4, 0.2, -0.1, -0.4]);
        (value, format!("Bathroom count matches the market; home is {label}."))
    } else if sqft_per_bath >= market_sqft_per_bath * SPACE_MARGIN {
        (
            0.25,
            format!(
                "{:.0} sqft per bathroom is generous against the market's {:.0}.",
                sqft_per_bath, market_sqft_per_bath
            ),
        )
    } else {
        (
            -0.25,
            format!(
                "{:.0} sqft per bathroom trails the market's {:.0}.",
                sqft_per_bath, market_sqft_per_bath
            ),
        )
    };

    let score = (ratio_score + worth_score).clamp(-BATH_LIMIT, BATH_LIMIT);
    let remarks = format!(
        "{:.2} baths per bedroom ({}). {}",
        bath_to_bed_ratio,
        if ratio_score > 0.0 { "healthy" } else { "short" },
        detail
    );

    BathComponent {
        subject_baths: subject.baths,
        market_baths: market.avg_baths,
        bath_to_bed_ratio,
        ratio_score,
        worth_score,
        sqft_per_bath,
        market_sqft_per_bath,
        score,
        remarks,
    }
}

fn stability_component(comps: &[Comparable]) -> StabilityComponent {
    let values: Vec<f64> = comps.iter().map(Comparable::price_per_sqft).collect();
    let n = values.len() as f64;
    let pps_mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - pps_mean).powi(2)).sum::<f64>() / n;
    let pps_std_dev = variance.sqrt();
    let coefficient_of_variation = if pps_mean > 0.0 {
        pps_std_dev / pps_mean
    } else {
        0.0
    };

    let (score, remarks) = if coefficient_of_variation > VOLATILITY_THRESHOLD {
        (
            VOLATILE_MARKET,
            format!(
                "Price per sqft varies {:.1}% across comparables; the market is volatile.",
                coefficient_of_variation * 100.0
            ),
        )
    } else {
        (
            STABLE_MARKET,
            format!(
                "Price per sqft varies only {:.1}% across comparables; the market is stable.",
                coefficient_of_variation * 100.0
            ),
        )
    };

    StabilityComponent {
        pps_mean,
        pps_std_dev,
        coefficient_of_variation,
        score,
        remarks,
    }
}

fn layout_component(subject: &CompleteSubject, predicted: f64) -> LayoutComponent {
    if subject.price > predicted {
        LayoutComponent {
            score: -0.1,
            remarks: "The layout is not enough to justify paying over the model price."
                .to_string(),
        }
    } else {
        LayoutComponent {
            score: 0.1,
            remarks: "The layout comes at or under the model price.".to_string(),
        }
    }
}
