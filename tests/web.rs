//! Facade tests, run with `wasm-pack test --node`
#![cfg(target_arch = "wasm32")]

use persona_duel_engine::ArenaEngine;
use wasm_bindgen_test::*;

fn engine() -> ArenaEngine {
    let mut engine = ArenaEngine::new(7).unwrap();
    engine.generate_population(12).unwrap();
    engine
}

fn first_user_id(engine: &ArenaEngine) -> String {
    let users: serde_json::Value = serde_json::from_str(&engine.get_users().unwrap()).unwrap();
    users[0]["id"].as_str().unwrap().to_string()
}

#[wasm_bindgen_test]
fn test_run_and_report() {
    let mut engine = engine();
    engine.run(20).unwrap();
    assert_eq!(engine.get_tick(), 20);

    let stats: serde_json::Value = serde_json::from_str(&engine.get_stats()).unwrap();
    assert_eq!(stats["total_users"], 12);
    assert!(engine.get_leaderboard("dramatic", Some(5)).is_ok());
    assert!(engine.get_leaderboard("villain", None).is_err());
    assert!(engine.get_progress_leaderboard("duels_won", Some(3)).is_ok());
    assert!(engine.get_progress_leaderboard("karma", None).is_err());
}

#[wasm_bindgen_test]
fn test_duel_round_trip_through_facade() {
    let engine = engine();
    let user = first_user_id(&engine);

    let duel: serde_json::Value =
        serde_json::from_str(&engine.create_automatic_duel(&user).unwrap()).unwrap();
    assert_eq!(duel["status"], "active");

    let duel_id = duel["id"].as_str().unwrap();
    let ended: serde_json::Value = serde_json::from_str(&engine.end_duel(duel_id).unwrap()).unwrap();
    assert_eq!(ended["status"], "cancelled");
}

#[wasm_bindgen_test]
fn test_errors_carry_their_kind() {
    let engine = engine();
    let err = engine.get_duel_history("not-a-uuid").unwrap_err();
    let body: serde_json::Value = serde_json::from_str(&err.as_string().unwrap()).unwrap();
    assert_eq!(body["kind"], "invalid_input");

    let matches = engine
        .find_matching_characters(r#"[{"name":"Humorous","score":9}]"#, None)
        .unwrap();
    assert!(matches.contains("Chandler Bing"));
}
