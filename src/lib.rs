//! Trait-based matching, audience-voted duels and leaderboards for character personas

pub mod catalog;
pub mod clock;
pub mod duel;
pub mod error;
pub mod friendship;
pub mod leaderboard;
pub mod matchmaker;
pub mod progress;
pub mod similarity;
pub mod simulation;
pub mod store;
pub mod types;

pub use catalog::CharacterCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use duel::{DuelObserver, DuelService};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use friendship::FriendshipService;
pub use leaderboard::LeaderboardEngine;
pub use matchmaker::Matchmaker;
pub use progress::{ProgressSort, ProgressTracker};
pub use simulation::{Simulation, SimulationStats};
pub use store::MemoryStore;
pub use types::*;

use serde::Serialize;
use store::UserStore;
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn js_error(e: EngineError) -> JsValue {
    JsValue::from_str(
        &serde_json::json!({
            "kind": e.kind(),
            "message": e.to_string(),
        })
        .to_string(),
    )
}

fn parse_id<T: std::str::FromStr<Err = EngineError>>(raw: &str) -> Result<T, JsValue> {
    raw.parse().map_err(js_error)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| js_error(e.into()))
}

fn parse_traits(traits_json: &str) -> Result<Vec<Trait>, JsValue> {
    serde_json::from_str(traits_json).map_err(|e| js_error(e.into()))
}

/// WASM-exposed engine over a simulated population
#[wasm_bindgen]
pub struct ArenaEngine {
    sim: Simulation,
}

#[wasm_bindgen]
impl ArenaEngine {
    /// Create a new engine with default config
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> Result<ArenaEngine, JsValue> {
        let sim = Simulation::new(SimulationConfig::default(), seed).map_err(js_error)?;
        Ok(ArenaEngine { sim })
    }

    /// Create with custom config
    pub fn new_with_config(seed: u64, config_json: &str) -> Result<ArenaEngine, JsValue> {
        let config = SimulationConfig::from_json(config_json).map_err(js_error)?;
        let sim = Simulation::new(config, seed).map_err(js_error)?;
        Ok(ArenaEngine { sim })
    }

    /// Get default config as JSON
    pub fn get_default_config() -> String {
        serde_json::to_string(&SimulationConfig::default()).unwrap_or_default()
    }

    pub fn generate_population(&mut self, count: usize) -> Result<(), JsValue> {
        self.sim.generate_population(count).map_err(js_error)
    }

    /// Run single tick
    pub fn tick(&mut self) -> Result<(), JsValue> {
        self.sim.tick().map_err(js_error)
    }

    /// Run multiple ticks
    pub fn run(&mut self, ticks: u64) -> Result<(), JsValue> {
        self.sim.run(ticks).map_err(js_error)
    }

    /// Get current simulation state as JSON
    pub fn get_state(&self) -> String {
        self.sim.get_state_json()
    }

    pub fn get_tick(&self) -> u64 {
        self.sim.current_tick
    }

    /// Get statistics JSON
    pub fn get_stats(&self) -> String {
        serde_json::to_string(&self.sim.stats).unwrap_or_default()
    }

    /// Reset statistics (keep population)
    pub fn reset_stats(&mut self) -> Result<(), JsValue> {
        self.sim.reset_stats().map_err(js_error)
    }

    pub fn get_users(&self) -> Result<String, JsValue> {
        to_json(&self.sim.store().users().map_err(js_error)?)
    }

    pub fn get_leaderboard(&self, category: &str, limit: Option<usize>) -> Result<String, JsValue> {
        let category: Category = category.parse().map_err(js_error)?;
        to_json(&self.sim.leaderboard().get_leaderboard(category, limit).map_err(js_error)?)
    }

    pub fn get_duel(&self, duel_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.duels().duel(parse_id(duel_id)?).map_err(js_error)?)
    }

    pub fn get_duel_history(&self, user_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.duels().get_duel_history(parse_id(user_id)?).map_err(js_error)?)
    }

    pub fn create_automatic_duel(&self, user_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.matchmaker().create_automatic_duel(parse_id(user_id)?).map_err(js_error)?)
    }

    pub fn create_challenge(&self, challenger_id: &str, opponent_id: &str) -> Result<String, JsValue> {
        let duel = self
            .sim
            .duels()
            .create_challenge(parse_id(challenger_id)?, parse_id(opponent_id)?)
            .map_err(js_error)?;
        to_json(&duel)
    }

    pub fn accept_challenge(&self, duel_id: &str, user_id: &str) -> Result<String, JsValue> {
        let duel = self
            .sim
            .duels()
            .accept_challenge(parse_id(duel_id)?, parse_id(user_id)?)
            .map_err(js_error)?;
        to_json(&duel)
    }

    pub fn add_viewer(&self, duel_id: &str, viewer_id: &str) -> Result<String, JsValue> {
        let duel = self
            .sim
            .duels()
            .add_viewer(parse_id(duel_id)?, parse_id(viewer_id)?)
            .map_err(js_error)?;
        to_json(&duel)
    }

    pub fn vote(&self, duel_id: &str, voter_id: &str, voted_for_id: &str) -> Result<String, JsValue> {
        let duel = self
            .sim
            .duels()
            .vote(parse_id(duel_id)?, parse_id(voter_id)?, parse_id(voted_for_id)?)
            .map_err(js_error)?;
        to_json(&duel)
    }

    pub fn end_duel(&self, duel_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.duels().end_duel(parse_id(duel_id)?).map_err(js_error)?)
    }

    pub fn send_friend_request(&self, requester_id: &str, recipient_id: &str) -> Result<String, JsValue> {
        let friendship = self
            .sim
            .friendships()
            .send_friend_request(parse_id(requester_id)?, parse_id(recipient_id)?)
            .map_err(js_error)?;
        to_json(&friendship)
    }

    pub fn respond_to_friend_request(
        &self,
        friendship_id: &str,
        user_id: &str,
        accept: bool,
    ) -> Result<String, JsValue> {
        let friendship = self
            .sim
            .friendships()
            .respond_to_friend_request(parse_id(friendship_id)?, parse_id(user_id)?, accept)
            .map_err(js_error)?;
        to_json(&friendship)
    }

    pub fn get_friends(&self, user_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.friendships().friends_list(parse_id(user_id)?).map_err(js_error)?)
    }

    pub fn get_progress(&self, user_id: &str) -> Result<String, JsValue> {
        to_json(&self.sim.progress().progress(parse_id(user_id)?))
    }

    /// `sort` is one of `xp`, `level`, `duels_won`
    pub fn get_progress_leaderboard(&self, sort: &str, limit: Option<usize>) -> Result<String, JsValue> {
        let sort: ProgressSort = sort.parse().map_err(js_error)?;
        to_json(&self.sim.progress().leaderboard(sort, limit))
    }

    /// `traits_json` is an array of `{name, score}`
    pub fn find_matching_characters(
        &self,
        traits_json: &str,
        universe: Option<String>,
    ) -> Result<String, JsValue> {
        let traits = parse_traits(traits_json)?;
        let matches = self
            .sim
            .catalog()
            .find_matching_characters(&traits, universe.as_deref())
            .map_err(js_error)?;
        to_json(&matches)
    }

    pub fn suggest_alternate_universes(&self, traits_json: &str) -> Result<String, JsValue> {
        let traits = parse_traits(traits_json)?;
        to_json(
            &self
                .sim
                .catalog()
                .suggest_alternate_universes(&traits)
                .map_err(js_error)?,
        )
    }

    pub fn find_best_friend(&self, user_id: &str) -> Result<String, JsValue> {
        let user_id: UserId = parse_id(user_id)?;
        let user = self
            .sim
            .store()
            .user(user_id)
            .map_err(js_error)?
            .ok_or_else(|| js_error(EngineError::user_not_found(user_id)))?;
        let pick = self
            .sim
            .progress()
            .best_friend(user_id, &user.traits, self.sim.catalog())
            .map_err(js_error)?;
        to_json(&pick)
    }
}

/// Compare two configs over the same seed
#[wasm_bindgen]
pub fn compare_configs(
    config_a_json: &str,
    config_b_json: &str,
    population: usize,
    ticks: u64,
    seed: u64,
) -> Result<String, JsValue> {
    let mut stats = Vec::with_capacity(2);
    for config_json in [config_a_json, config_b_json] {
        let config = SimulationConfig::from_json(config_json).map_err(js_error)?;
        let mut sim = Simulation::new(config, seed).map_err(js_error)?;
        sim.generate_population(population).map_err(js_error)?;
        sim.run(ticks).map_err(js_error)?;
        stats.push(sim.stats);
    }

    to_json(&serde_json::json!({
        "config_a": { "stats": stats[0] },
        "config_b": { "stats": stats[1] },
    }))
}
