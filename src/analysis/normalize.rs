//! Normalize functions - turn noisy comparable records into a clean, gated set

use crate::analysis::types::{Comparable, SubjectProfile};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Minimum plausible sale price
const MIN_PRICE: i64 = 10_000;
/// Listings at or above this are data errors; also keeps market averages inside NUMERIC(14,2)
const MAX_PRICE: i64 = 1_000_000_000;
/// Minimum plausible floor area
const MIN_AREA_SQFT: i64 = 100;
/// Allowed floor-area band relative to the subject
const SQFT_LOWER_RATIO: f64 = 0.7;
const SQFT_UPPER_RATIO: f64 = 1.3;
/// Allowed room-count distance from the subject
const MAX_ROOM_DELTA: i32 = 1;

/// Counters for one normalization pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    pub received: usize,
    pub uncoercible: usize,
    pub rejected: usize,
    pub out_of_band: usize,
    pub duplicates: usize,
    pub kept: usize,
}

impl std::fmt::Display for NormalizeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received: {}, uncoercible: {}, rejected: {}, out of band: {}, duplicates: {}, kept: {}",
            self.received,
            self.uncoercible,
            self.rejected,
            self.out_of_band,
            self.duplicates,
            self.kept
        )
    }
}

/// Coerce a JSON scalar into a whole number.
///
/// Numbers are floored; strings have `$`, `,` and whitespace stripped before
/// parsing. Anything else fails.
pub fn coerce_number(value: &Value) -> Option<i64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let clean = s.replace(['$', ','], "");
            clean.trim().parse::<f64>().ok()?
        }
        _ => return None,
    };

    if !raw.is_finite() {
        return None;
    }
    let floored = raw.floor();
    if floored.abs() > i64::MAX as f64 {
        return None;
    }
    Some(floored as i64)
}

/// Coerce a raw record (as parsed from web content) into a comparable.
/// No range checks happen here.
pub fn coerce_comparable(raw: &Value) -> Option<Comparable> {
    let field = |name: &str| raw.get(name).and_then(coerce_number);

    let beds = i32::try_from(field("beds")?).ok()?;
    let baths = i32::try_from(field("baths")?).ok()?;

    Some(Comparable {
        price: field("price")?,
        area_sqft: field("area_sqft")?,
        beds,
        baths,
    })
}

/// Reject records that cannot be a real listing
pub fn passes_hard_limits(comp: &Comparable) -> bool {
    comp.price > MIN_PRICE
        && comp.price < MAX_PRICE
        && comp.area_sqft > MIN_AREA_SQFT
        && comp.beds > 0
        && comp.baths > 0
}

/// Keep only comparables of similar size and layout to the subject
pub fn within_variance(comp: &Comparable, subject: &SubjectProfile) -> bool {
    let sqft = comp.area_sqft as f64;
    let subject_sqft = subject.area_sqft as f64;

    sqft >= SQFT_LOWER_RATIO * subject_sqft
        && sqft <= SQFT_UPPER_RATIO * subject_sqft
        && (comp.beds - subject.beds).abs() <= MAX_ROOM_DELTA
        && (comp.baths - subject.baths).abs() <= MAX_ROOM_DELTA
}

/// Run the whole normalization: coerce, hard reject, variance gates, dedupe.
/// Input order is preserved.
pub fn normalize_comparables(
    raw: &[Value],
    subject: &SubjectProfile,
) -> (Vec<Comparable>, NormalizeStats) {
    let mut stats = NormalizeStats {
        received: raw.len(),
        ..NormalizeStats::default()
    };
    let mut seen = HashSet::new();
    let mut kept = Vec::new();

    for record in raw {
        let Some(comp) = coerce_comparable(record) else {
            stats.uncoercible += 1;
            continue;
        };

        if !passes_hard_limits(&comp) {
            stats.rejected += 1;
            continue;
        }

        if !within_variance(&comp, subject) {
            stats.out_of_band += 1;
            continue;
        }

        if !seen.insert(comp.dedupe_key()) {
            stats.duplicates += 1;
            continue;
        }

        kept.push(comp);
    }

    stats.kept = kept.len();
    debug!("Normalized comparables: {}", stats);

    (kept, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject() -> SubjectProfile {
        SubjectProfile {
            area_sqft: 1_200,
            beds: 2,
            baths: 2,
        }
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(&json!("$750,000")), Some(750_000));
        assert_eq!(coerce_number(&json!(" 1,250 ")), Some(1_250));
        assert_eq!(coerce_number(&json!(2.5)), Some(2));
        assert_eq!(coerce_number(&json!("3.9")), Some(3));
        assert_eq!(coerce_number(&json!("call for price")), None);
        assert_eq!(coerce_number(&json!(null)), None);
        assert_eq!(coerce_number(&json!(true)), None);
    }

    #[test]
    fn test_coerce_comparable_requires_all_fields() {
        let full = json!({"price": "$480,000", "area_sqft": "1,100", "beds": 2, "baths": "2"});
        assert_eq!(
            coerce_comparable(&full),
            Some(Comparable {
                price: 480_000,
                area_sqft: 1_100,
                beds: 2,
                baths: 2
            })
        );

        let missing = json!({"price": 480_000, "area_sqft": 1_100, "beds": 2});
        assert_eq!(coerce_comparable(&missing), None);
    }

    #[test]
    fn test_hard_limits() {
        let ok = Comparable {
            price: 10_001,
            area_sqft: 101,
            beds: 1,
            baths: 1,
        };
        assert!(passes_hard_limits(&ok));

        assert!(!passes_hard_limits(&Comparable { price: 10_000, ..ok }));
        assert!(!passes_hard_limits(&Comparable { area_sqft: 100, ..ok }));
        assert!(!passes_hard_limits(&Comparable { beds: 0, ..ok }));
        assert!(!passes_hard_limits(&Comparable { baths: -1, ..ok }));

        assert!(passes_hard_limits(&Comparable { price: 999_999_999, ..ok }));
        assert!(!passes_hard_limits(&Comparable { price: 1_000_000_000, ..ok }));
        assert!(!passes_hard_limits(&Comparable { price: 1_000_000_000_000, ..ok }));
    }

    #[test]
    fn test_variance_gates() {
        let base = Comparable {
            price: 500_000,
            area_sqft: 1_200,
            beds: 2,
            baths: 2,
        };
        assert!(within_variance(&base, &subject()));
        assert!(within_variance(&Comparable { area_sqft: 840, ..base }, &subject()));
        assert!(within_variance(&Comparable { area_sqft: 1_560, ..base }, &subject()));
        assert!(!within_variance(&Comparable { area_sqft: 839, ..base }, &subject()));
        assert!(!within_variance(&Comparable { area_sqft: 1_561, ..base }, &subject()));
        assert!(within_variance(&Comparable { beds: 3, baths: 1, ..base }, &subject()));
        assert!(!within_variance(&Comparable { beds: 4, ..base }, &subject()));
        assert!(!within_variance(&Comparable { baths: 4, ..base }, &subject()));
    }

    #[test]
    fn test_normalize_preserves_order_and_dedupes() {
        let raw = vec![
            json!({"price": 510_000, "area_sqft": 1_150, "beds": 2, "baths": 2}),
            json!({"price": "n/a", "area_sqft": 1_150, "beds": 2, "baths": 2}),
            json!({"price": 5_000, "area_sqft": 1_150, "beds": 2, "baths": 2}),
            json!({"price": 490_000, "area_sqft": 3_000, "beds": 2, "baths": 2}),
            json!({"price": "$470,000", "area_sqft": 1_250, "beds": 3, "baths": 2}),
            json!({"price": 510_000, "area_sqft": 1_150, "beds": 2, "baths": 2}),
        ];

        let (comps, stats) = normalize_comparables(&raw, &subject());

        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].price, 510_000);
        assert_eq!(comps[1].price, 470_000);
        assert_eq!(stats.received, 6);
        assert_eq!(stats.uncoercible, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.out_of_band, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.kept, 2);
    }

    #[test]
    fn test_normalize_is_stable_under_self_union() {
        let raw: Vec<Value> = (0..15)
            .map(|i| {
                json!({
                    "price": 400_000 + i * 7_500,
                    "area_sqft": 1_000 + (i % 5) * 60,
                    "beds": 1 + i % 3,
                    "baths": 1 + i % 2,
                })
            })
            .collect();

        let (once, _) = normalize_comparables(&raw, &subject());
        let doubled: Vec<Value> = raw.iter().chain(raw.iter()).cloned().collect();
        let (twice, _) = normalize_comparables(&doubled, &subject());

        assert_eq!(once, twice);
    }
}
