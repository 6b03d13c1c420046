use serde::Serialize;

use crate::features::FEATURE_NAMES;
use crate::types::{Direction, FeatureContribution};

/// How many contributions each side of the explanation keeps.
pub const TOP_N: usize = 10;

/// Strongest contributions toward each verdict.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Explanation {
    pub top_safe: Vec<FeatureContribution>,
    pub top_unsafe: Vec<FeatureContribution>,
}

/// Sorts signed contributions (schema order) by magnitude and splits them by
/// direction. Zero contributions carry no signal and are left out.
pub fn rank(contributions: &[f64]) -> Explanation {
    let mut ranked: Vec<FeatureContribution> = FEATURE_NAMES
        .iter()
        .zip(contributions)
        .filter(|(_, value)| **value != 0.0 && value.is_finite())
        .map(|(name, value)| FeatureContribution::new(name, *value))
        .collect();
    ranked.sort_by(|a, b| b.shap_value.abs().total_cmp(&a.shap_value.abs()));

    let (safe, unsafe_): (Vec<_>, Vec<_>) = ranked
        .into_iter()
        .partition(|c| c.direction == Direction::Safe);

    Explanation {
        top_safe: safe.into_iter().take(TOP_N).collect(),
        top_unsafe: unsafe_.into_iter().take(TOP_N).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Feature, FEATURE_COUNT};

    #[test]
    fn splits_and_orders_by_magnitude() {
        let mut contributions = vec![0.0; FEATURE_COUNT];
        contributions[Feature::PhishHints.index()] = 0.8;
        contributions[Feature::SafeAnchor.index()] = -1.5;
        contributions[Feature::GoogleIndex.index()] = -0.2;
        contributions[Feature::LengthUrl.index()] = 0.1;

        let explanation = rank(&contributions);
        let safe: Vec<_> = explanation.top_safe.iter().map(|c| c.feature.as_str()).collect();
        let unsafe_: Vec<_> = explanation.top_unsafe.iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(safe, vec!["safe_anchor", "google_index"]);
        assert_eq!(unsafe_, vec!["phish_hints", "length_url"]);
    }

    #[test]
    fn keeps_at_most_ten_per_side() {
        let contributions: Vec<f64> = (0..FEATURE_COUNT)
            .map(|i| if i % 2 == 0 { i as f64 + 1.0 } else { -(i as f64) })
            .collect();
        let explanation = rank(&contributions);
        assert_eq!(explanation.top_safe.len(), TOP_N);
        assert_eq!(explanation.top_unsafe.len(), TOP_N);
        assert_eq!(explanation.top_unsafe[0].feature, FEATURE_NAMES[FEATURE_COUNT - 2]);
    }

    #[test]
    fn serializes_direction_lowercase() {
        let explanation = rank(&{
            let mut c = vec![0.0; FEATURE_COUNT];
            c[0] = -0.25;
            c
        });
        let json = serde_json::to_value(&explanation).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "top_safe": [{"feature": "google_index", "shap_value": -0.25, "direction": "safe"}],
                "top_unsafe": []
            })
        );
    }
}
