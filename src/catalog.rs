//! Fictional characters users are compared against
//!
//! The catalog is read-only once loaded. Trait extraction from free text
//! happens elsewhere; everything here works on already-scored traits.

use crate::error::{EngineError, EngineResult};
use crate::similarity::{cosine_similarity, friendship_score, match_explanation, vectorize, MatchExplanation};
use crate::types::{EngineConfig, Trait};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SEED_CATALOG: &str = include_str!("../data/catalog.json");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DominantTrait {
    pub name: String,
    /// Share of the universe's characters showing the trait, 0-1
    pub frequency: f64,
}

/// A show, film or book series characters come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub dominant_traits: Vec<DominantTrait>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub universe: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CharacterMatch {
    pub character: Character,
    /// Cosine similarity, 0-1
    pub similarity: f64,
    pub explanation: MatchExplanation,
    pub summary: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UniverseSuggestion {
    pub universe: Universe,
    pub best_match: CharacterMatch,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BestFriendMatch {
    pub character: Character,
    pub score: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub universes: Vec<Universe>,
    #[serde(default)]
    pub characters: Vec<Character>,
}

pub struct CharacterCatalog {
    data: CatalogData,
    match_limit: usize,
    suggestion_limit: usize,
}

impl CharacterCatalog {
    pub fn new(data: CatalogData, config: &EngineConfig) -> Self {
        Self {
            data,
            match_limit: config.character_match_limit,
            suggestion_limit: config.universe_suggestion_limit,
        }
    }

    pub fn from_json(json: &str, config: &EngineConfig) -> EngineResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?, config))
    }

    /// Catalog bundled with the crate
    pub fn seeded(config: &EngineConfig) -> EngineResult<Self> {
        Self::from_json(SEED_CATALOG, config)
    }

    pub fn universes(&self) -> &[Universe] {
        &self.data.universes
    }

    pub fn characters(&self) -> &[Character] {
        &self.data.characters
    }

    /// Closest characters by cosine similarity, best first
    ///
    /// `universe` narrows the search to one universe by exact name.
    /// Characters without traits never match.
    pub fn find_matching_characters(
        &self,
        traits: &[Trait],
        universe: Option<&str>,
    ) -> EngineResult<Vec<CharacterMatch>> {
        if traits.is_empty() {
            return Err(EngineError::DegenerateInput);
        }
        let user_vector = vectorize(traits);

        let mut matches = Vec::new();
        for character in &self.data.characters {
            if universe.is_some_and(|u| u != character.universe) || character.traits.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(&user_vector, &vectorize(&character.traits))?;
            let explanation = match_explanation(traits, &character.traits);
            matches.push(CharacterMatch {
                character: character.clone(),
                similarity,
                summary: explanation.summary(),
                explanation,
            });
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(self.match_limit);
        debug!(universe = ?universe, matches = matches.len(), "character matches");
        Ok(matches)
    }

    /// Universes ranked by how well their best character fits
    pub fn suggest_alternate_universes(&self, traits: &[Trait]) -> EngineResult<Vec<UniverseSuggestion>> {
        let mut suggestions = Vec::new();
        for universe in &self.data.universes {
            let Some(best) = self
                .find_matching_characters(traits, Some(&universe.name))?
                .into_iter()
                .next()
            else {
                continue;
            };
            suggestions.push(UniverseSuggestion {
                universe: universe.clone(),
                confidence: best.similarity,
                best_match: best,
            });
        }

        suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        suggestions.truncate(self.suggestion_limit);
        Ok(suggestions)
    }

    /// Character with the highest friendship score; first in catalog order on ties
    pub fn find_best_friend(&self, traits: &[Trait]) -> Option<BestFriendMatch> {
        let mut best: Option<BestFriendMatch> = None;
        for character in &self.data.characters {
            let score = friendship_score(traits, &character.traits);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestFriendMatch {
                    character: character.clone(),
                    score,
                });
            }
        }
        best
    }
}
