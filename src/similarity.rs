//! Trait vectors and pairwise trait-set comparisons
//!
//! Everything here is pure: no store access, no clock. Vectors are keyed
//! by lower-cased trait name and iterated in key order, which keeps the
//! floating-point sums identical no matter which side is passed first.

use crate::error::{EngineError, EngineResult};
use crate::types::{mean_trait_score, RelationshipType, Trait, MAX_TRAIT_SCORE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Lower-cased trait name -> weight in [0, 1]
pub type TraitVector = BTreeMap<String, f64>;

/// Max score gap for two same-named traits to count as matching
pub const MATCH_SCORE_TOLERANCE: u8 = 2;
/// Similarity (0-100) above which two users are friends
pub const FRIEND_THRESHOLD: f64 = 80.0;
/// Similarity (0-100) below which two users are rivals
pub const RIVAL_THRESHOLD: f64 = 40.0;
/// Credit for a trait the other side has and the user lacks
pub const COMPLEMENTARY_TRAIT_CREDIT: f64 = 0.5;

/// Normalize a trait list into a comparable vector (`score / 10`)
pub fn vectorize(traits: &[Trait]) -> TraitVector {
    traits
        .iter()
        .map(|t| (t.key(), t.score as f64 / MAX_TRAIT_SCORE as f64))
        .collect()
}

/// Cosine similarity over the union of keys, absent keys counting as 0
///
/// Weights are non-negative so the result lies in [0, 1]. Fails with
/// [`EngineError::DegenerateInput`] when either vector has zero norm.
pub fn cosine_similarity(a: &TraitVector, b: &TraitVector) -> EngineResult<f64> {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for key in keys {
        let va = a.get(key).copied().unwrap_or(0.0);
        let vb = b.get(key).copied().unwrap_or(0.0);
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(EngineError::DegenerateInput);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0))
}

/// Compatibility of two trait sets on a 0-100 scale
pub fn compatibility(a: &[Trait], b: &[Trait]) -> EngineResult<f64> {
    Ok(cosine_similarity(&vectorize(a), &vectorize(b))? * 100.0)
}

/// [`compatibility`], scoring a side without traits as 0
pub fn compatibility_or_zero(a: &[Trait], b: &[Trait]) -> EngineResult<f64> {
    match compatibility(a, b) {
        Err(EngineError::DegenerateInput) => Ok(0.0),
        other => other,
    }
}

/// Which of the user's traits line up with the other side
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchExplanation {
    pub matching_traits: Vec<String>,
    pub different_traits: Vec<String>,
}

impl MatchExplanation {
    /// One-line human readable account of the comparison
    pub fn summary(&self) -> String {
        let mut summary = String::from("You match because ");
        if !self.matching_traits.is_empty() {
            summary.push_str(&format!(
                "you share these traits: {}. ",
                self.matching_traits.join(", ")
            ));
        }
        if !self.different_traits.is_empty() {
            summary.push_str(&format!(
                "However, you differ in: {}.",
                self.different_traits.join(", ")
            ));
        }
        summary.trim_end().to_string()
    }
}

/// Classify each of the user's traits the other side also has
///
/// Traits without a counterpart are left out of both lists. Names keep
/// the user's display casing.
pub fn match_explanation(user_traits: &[Trait], other_traits: &[Trait]) -> MatchExplanation {
    let mut explanation = MatchExplanation::default();
    for user_trait in user_traits {
        let Some(other) = other_traits.iter().find(|t| t.matches_name(user_trait)) else {
            continue;
        };
        if user_trait.score.abs_diff(other.score) <= MATCH_SCORE_TOLERANCE {
            explanation.matching_traits.push(user_trait.name.clone());
        } else {
            explanation.different_traits.push(user_trait.name.clone());
        }
    }
    explanation
}

/// Friendship score rewarding overlap plus complementary traits
///
/// Each shared trait contributes `(10 - |diff|) / 10`, each trait only the
/// other side has contributes a flat 0.5, normalized by the longer list.
pub fn friendship_score(user_traits: &[Trait], other_traits: &[Trait]) -> f64 {
    let denominator = user_traits.len().max(other_traits.len());
    if denominator == 0 {
        return 0.0;
    }

    let mut score = 0.0;
    let mut shared: HashSet<String> = HashSet::new();
    for user_trait in user_traits {
        if let Some(other) = other_traits.iter().find(|t| t.matches_name(user_trait)) {
            let diff = user_trait.score.abs_diff(other.score) as f64;
            score += (MAX_TRAIT_SCORE as f64 - diff) / MAX_TRAIT_SCORE as f64;
            shared.insert(user_trait.key());
        }
    }

    score += other_traits
        .iter()
        .filter(|t| !shared.contains(&t.key()))
        .count() as f64
        * COMPLEMENTARY_TRAIT_CREDIT;

    score / denominator as f64
}

/// Relationship between a user and another, given their 0-100 similarity
pub fn relationship_type(
    similarity: f64,
    user_traits: &[Trait],
    other_traits: &[Trait],
) -> RelationshipType {
    if similarity > FRIEND_THRESHOLD {
        return RelationshipType::Friend;
    }
    if similarity < RIVAL_THRESHOLD {
        return RelationshipType::Rival;
    }
    if mean_trait_score(user_traits) > mean_trait_score(other_traits) {
        RelationshipType::Mentor
    } else {
        RelationshipType::Mentee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn traits(pairs: &[(&str, i64)]) -> Vec<Trait> {
        pairs.iter().map(|(n, s)| Trait::new(*n, *s)).collect()
    }

    #[test]
    fn test_vectorize_normalizes_and_lowercases() {
        let v = vectorize(&traits(&[("Bold", 8), ("Creative", 6)]));
        assert_eq!(v.len(), 2);
        assert!((v["bold"] - 0.8).abs() < 1e-12);
        assert!((v["creative"] - 0.6).abs() < 1e-12);
        assert_eq!(v, vectorize(&traits(&[("Bold", 8), ("Creative", 6)])));
    }

    #[test]
    fn test_cosine_of_worked_example() {
        let a = vectorize(&traits(&[("Bold", 8), ("Creative", 6)]));
        let b = vectorize(&traits(&[("Bold", 6), ("Creative", 9)]));
        let sim = cosine_similarity(&a, &b).unwrap();
        // 1.02 / sqrt(1.17)
        assert!((sim - 0.94299).abs() < 1e-4, "got {sim}");
    }

    #[test]
    fn test_cosine_disjoint_traits_is_zero() {
        let a = vectorize(&traits(&[("Bold", 8)]));
        let b = vectorize(&traits(&[("Shy", 8)]));
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_rejects_empty_vectors() {
        let empty = TraitVector::new();
        let a = vectorize(&traits(&[("Bold", 8)]));
        assert!(matches!(
            cosine_similarity(&empty, &empty),
            Err(EngineError::DegenerateInput)
        ));
        assert!(matches!(
            cosine_similarity(&a, &empty),
            Err(EngineError::DegenerateInput)
        ));
    }

    #[test]
    fn test_match_explanation_splits_on_tolerance() {
        let a = traits(&[("Bold", 8), ("Creative", 6), ("Loyal", 5)]);
        let b = traits(&[("bold", 6), ("CREATIVE", 9)]);
        let explanation = match_explanation(&a, &b);
        assert_eq!(explanation.matching_traits, vec!["Bold".to_string()]);
        assert_eq!(explanation.different_traits, vec!["Creative".to_string()]);

        let summary = explanation.summary();
        assert!(summary.contains("share these traits: Bold"));
        assert!(summary.contains("differ in: Creative"));
    }

    #[test]
    fn test_friendship_score_rewards_complementary_traits() {
        let user = traits(&[("Bold", 8), ("Creative", 6)]);
        let identical = traits(&[("Bold", 8), ("Creative", 6)]);
        // 1.0 + 1.0 + 0.5 over max(2, 3)
        let complementary = traits(&[("Bold", 8), ("Creative", 6), ("Patient", 7)]);
        assert!((friendship_score(&user, &identical) - 1.0).abs() < 1e-12);
        assert!((friendship_score(&user, &complementary) - 2.5 / 3.0).abs() < 1e-12);

        // A richer partner beats a merely identical one once overlap is partial
        let partial = traits(&[("Bold", 8)]);
        let partial_plus = traits(&[("Bold", 8), ("Patient", 7)]);
        assert!(friendship_score(&user, &partial_plus) > friendship_score(&user, &partial));
        assert_eq!(friendship_score(&[], &[]), 0.0);
    }

    #[test]
    fn test_relationship_thresholds() {
        let high = traits(&[("Bold", 9), ("Calm", 9)]);
        let low = traits(&[("Bold", 3), ("Calm", 3)]);
        assert_eq!(relationship_type(85.0, &high, &low), RelationshipType::Friend);
        assert_eq!(relationship_type(35.0, &high, &low), RelationshipType::Rival);
        assert_eq!(relationship_type(60.0, &high, &low), RelationshipType::Mentor);
        assert_eq!(relationship_type(60.0, &low, &high), RelationshipType::Mentee);
        // equal means -> mentee, boundaries are exclusive
        assert_eq!(relationship_type(80.0, &high, &high), RelationshipType::Mentee);
        assert_eq!(relationship_type(40.0, &low, &low), RelationshipType::Mentee);
    }

    fn trait_list() -> impl Strategy<Value = Vec<Trait>> {
        let names = prop::sample::select(vec!["bold", "calm", "witty", "loyal", "shy", "Bold"]);
        prop::collection::vec((names, 1i64..=10), 1..6)
            .prop_map(|v| v.into_iter().map(|(n, s)| Trait::new(n, s)).collect())
    }

    proptest! {
        #[test]
        fn prop_cosine_in_unit_range_and_symmetric(a in trait_list(), b in trait_list()) {
            let va = vectorize(&a);
            let vb = vectorize(&b);
            let ab = cosine_similarity(&va, &vb).unwrap();
            let ba = cosine_similarity(&vb, &va).unwrap();
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_cosine_self_is_one(a in trait_list()) {
            let va = vectorize(&a);
            let sim = cosine_similarity(&va, &va).unwrap();
            prop_assert!((sim - 1.0).abs() < 1e-9);
        }
    }
}
