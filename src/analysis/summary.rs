//! Narrative assembly for reports and chat replies

use crate::analysis::types::{Comparable, CompleteSubject, RatingOutcome, Subject, COMPARABLE_SAMPLE_LIMIT};
use serde::{Deserialize, Serialize};

/// Structured narrative returned by the insight model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default)]
    pub investment_summary: Option<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub weighted_analysis: Option<String>,
}

impl Insight {
    fn summary_text(&self) -> Option<&str> {
        self.investment_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// First comparables handed to the narrative model
pub fn comparable_sample(comps: &[Comparable]) -> &[Comparable] {
    &comps[..comps.len().min(COMPARABLE_SAMPLE_LIMIT)]
}

/// One decimal place, e.g. `3.5`
pub fn format_rating(rating: f64) -> String {
    format!("{:.1}", rating)
}

/// Final report text, or None when the model produced no summary
pub fn compose_report_summary(insight: &Insight) -> Option<String> {
    let summary = insight.summary_text()?;

    let mut out = String::from(summary);
    out.push_str("\n\nPROS:\n");
    out.push_str(&bullets(&insight.pros));
    out.push_str("\n\nCONS:\n");
    out.push_str(&bullets(&insight.cons));
    Some(out)
}

/// Chat reply for a what-if rerun
pub fn compose_chat_reply(insight: &Insight, rating: f64) -> String {
    let summary = insight.summary_text().unwrap_or_default();
    let analysis = insight
        .weighted_analysis
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    format!(
        "{summary}\n\n**New Projected Rating: {rating} / 5**\n\n**Analysis of Adjustments:**\n{analysis}\n\n**Key Strengths:**\n{pros}\n\n**Potential Risks:**\n{cons}",
        rating = format_rating(rating),
        pros = bullets(&insight.pros),
        cons = bullets(&insight.cons),
    )
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic narrative used when the insight model cannot produce one
pub fn generate_mock_summary(subject: &Subject, outcome: &RatingOutcome) -> Insight {
    let rating = format_rating(outcome.rating);

    let Some(breakdown) = &outcome.breakdown else {
        return Insight {
            investment_summary: Some(format!(
                "Too few comparable listings were found to model this market, so the property \
                 carries a neutral rating of {rating} / 5."
            )),
            pros: vec![
                "No pricing red flags could be detected from the available data.".to_string(),
                describe_subject(subject.complete().as_ref()),
            ],
            cons: vec![
                "Comparable sales are too sparse for a confident valuation.".to_string(),
                "Market volatility could not be measured.".to_string(),
            ],
            weighted_analysis: Some(
                "A neutral rating was assigned because the price model needs at least ten \
                 comparable listings."
                    .to_string(),
            ),
        };
    };

    let verdict = match outcome.rating {
        r if r >= 4.0 => "a strong",
        r if r >= 3.0 => "a reasonable",
        r if r >= 2.0 => "a marginal",
        _ => "a weak",
    };

    let mut components = vec![
        (breakdown.price.score, breakdown.price.remarks.clone()),
        (
            breakdown.price_per_sqft.score,
            breakdown.price_per_sqft.remarks.clone(),
        ),
        (breakdown.beds.score, breakdown.beds.remarks.clone()),
        (breakdown.baths.score, breakdown.baths.remarks.clone()),
        (
            breakdown.market_stability.score,
            breakdown.market_stability.remarks.clone(),
        ),
        (breakdown.layout.score, breakdown.layout.remarks.clone()),
    ];
    components.sort_by(|a, b| b.0.total_cmp(&a.0));

    let pros = components.iter().take(2).map(|(_, r)| r.clone()).collect();
    let cons = components.iter().rev().take(2).map(|(_, r)| r.clone()).collect();

    Insight {
        investment_summary: Some(format!(
            "Based on {} comparable listings this property is {verdict} investment, rated {rating} / 5.",
            breakdown.sample_size
        )),
        pros,
        cons,
        weighted_analysis: Some(format!(
            "Price {:+.2}, price per sqft {:+.2}, bedrooms {:+.2}, bathrooms {:+.2}, \
             market stability {:+.2}, layout {:+.2}.",
            breakdown.price.score,
            breakdown.price_per_sqft.score,
            breakdown.beds.score,
            breakdown.baths.score,
            breakdown.market_stability.score,
            breakdown.layout.score,
        )),
    }
}

fn describe_subject(subject: Option<&CompleteSubject>) -> String {
    match subject {
        Some(s) => format!(
            "{:.0} beds / {:.0} baths across {:.0} sqft at ${:.0}.",
            s.beds, s.baths, s.area_sqft, s.price
        ),
        None => "Property details are incomplete.".to_string(),
    }
}
