use std::collections::BTreeSet;

use crate::driver::dom::normalize_text;

/// Lowercased alphanumeric word tokens
fn tokens(s: &str) -> BTreeSet<String> {
    normalize_text(s)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sørensen–Dice coefficient over word tokens, in `[0, 1]`
pub fn dice(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    2.0 * shared as f64 / (ta.len() + tb.len()) as f64
}

/// Confidence that a candidate sits in the same surroundings as the recorded
/// target. Nearby text weighs 0.7 and parent text 0.3 when both were
/// recorded; with only one recorded it carries the full weight.
pub fn context_score(
    recorded_nearby: &[String],
    recorded_parent: Option<&str>,
    candidate_nearby: &[String],
    candidate_parent: Option<&str>,
) -> f64 {
    let nearby = if recorded_nearby.is_empty() {
        None
    } else {
        Some(dice(&recorded_nearby.join(" "), &candidate_nearby.join(" ")))
    };
    let parent = recorded_parent
        .filter(|p| !p.trim().is_empty())
        .map(|p| dice(p, candidate_parent.unwrap_or("")));

    match (nearby, parent) {
        (Some(n), Some(p)) => 0.7 * n + 0.3 * p,
        (Some(n), None) => n,
        (None, Some(p)) => p,
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dice() {
        assert_eq!(dice("Sign in", "sign  IN"), 1.0);
        assert_eq!(dice("a b", "c d"), 0.0);
        assert!((dice("user name field", "user name") - 0.8).abs() < 1e-9);
        assert_eq!(dice("", ""), 0.0);
    }

    #[test]
    fn test_context_score_weights() {
        let nearby = vec!["Username".to_string(), "Forgot password?".to_string()];
        let same = context_score(&nearby, Some("Login form"), &nearby, Some("Login form"));
        assert!((same - 1.0).abs() < 1e-9);

        let parent_only = context_score(&nearby, Some("Login form"), &[], Some("Login form"));
        assert!((parent_only - 0.3).abs() < 1e-9);

        let nothing_recorded = context_score(&[], None, &nearby, Some("Login form"));
        assert_eq!(nothing_recorded, 0.0);
    }
}
