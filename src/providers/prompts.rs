//! System prompts and user-message builders for the three LLM calls

use crate::analysis::Subject;
use crate::providers::types::InsightRequest;

pub const FORMAT_COMPS_SYSTEM: &str = "You extract real-estate listings from scraped web text. \
Return a JSON object of the form {\"properties\": [{\"price\": number, \"area_sqft\": number, \
\"beds\": number, \"baths\": number}]}. Only include listings where all four values appear in \
the text. Never invent values. Return {\"properties\": []} when nothing qualifies.";

pub const INSIGHT_SYSTEM: &str = "You are a real-estate investment analyst. You receive a subject \
property, a sample of comparable listings, a 0-5 investment rating and the scoring breakdown \
behind it. Explain the rating without changing it. Return a JSON object with exactly these keys: \
\"investment_summary\" (one paragraph), \"pros\" (exactly two strings), \"cons\" (exactly two \
strings), \"weighted_analysis\" (one paragraph on which breakdown components moved the rating).";

pub const COUNTERFACTUAL_SYSTEM: &str = "You turn a user's what-if question about a property into \
updated property attributes. You receive the current attributes and the question. Return a JSON \
object with keys \"area_sqft\", \"beds\", \"baths\", \"price\" and \"error\". Copy every attribute \
the question does not change. If the question is not about changing this property's price, size, \
bedrooms or bathrooms, set every attribute to null and set \"error\" to \
\"Invalid request. Please try again.\". Otherwise set \"error\" to null.";

pub fn format_comps_prompt(raw_text: &str, area: &str, city: &str) -> String {
    format!("Location: {area}, {city}\n\nScraped listings:\n{raw_text}")
}

pub fn insight_prompt(request: &InsightRequest<'_>) -> String {
    let payload = serde_json::json!({
        "subject": request.subject,
        "investment_rating": request.rating,
        "breakdown": request.breakdown,
        "comparables": request.comparables,
    });
    format!("Analyze this property:\n{payload}")
}

pub fn counterfactual_prompt(current: &Subject, user_query: &str) -> String {
    let payload = serde_json::json!({
        "current_property": current,
        "question": user_query,
    });
    payload.to_string()
}
