//! End-to-end Agent journey: two turns small enough to force a flush
//! between them, exercising retrieval, distillation, and the resulting
//! memory surfacing back into the next turn's context.

use longmem_core::{Agent, AgentConfig};
use longmem_e2e_tests::{test_store, ScriptedLlmClient};

const EXTRACTION_RESPONSE: &str = r#"{"memories": [
    {"action": "add", "type": "preference", "category": "personal",
     "key": "user_name", "value": "Arjun", "confidence": 0.9,
     "reasoning": "user introduced themselves by name"}
]}"#;

const VALIDATION_RESPONSE: &str = r#"{"validations": [
    {"key": "user_name", "verdict": "accept", "reason": "explicitly stated in the conversation"}
]}"#;

#[tokio::test]
async fn a_name_learned_in_turn_one_surfaces_in_turn_two() {
    let (store, dir) = test_store();

    // Tiny window so the second turn's pre-flight check (message_count() > 0
    // by then) trips a flush before the reply is generated.
    let config = AgentConfig {
        context_limit: 40,
        flush_threshold: 0.3,
        keep_last_turns: 1,
        consolidate_every_n_flushes: 1,
        top_k: 5,
        min_score: 0.0,
        snapshot_dir: dir.path().join("snapshots"),
    };

    let client = ScriptedLlmClient::new(vec![
        "Nice to meet you, Arjun!",
        EXTRACTION_RESPONSE,
        VALIDATION_RESPONSE,
        "Your name is Arjun.",
    ]);

    let mut agent = Agent::new(store, client, config).unwrap();

    let turn_one = agent.chat("Hi, my name is Arjun.").await.unwrap();
    assert_eq!(turn_one.turn_id, 1);
    assert!(!turn_one.flush_triggered);

    let turn_two = agent.chat("What's my name?").await.unwrap();
    assert_eq!(turn_two.turn_id, 2);
    assert!(turn_two.flush_triggered, "expected the tiny context window to force a flush before turn two");
    assert_eq!(turn_two.response, "Your name is Arjun.");

    assert!(
        turn_two.active_memories.iter().any(|m| m.content.contains("Arjun")),
        "expected the distilled user_name memory to be retrieved for turn two, got {:?}",
        turn_two.active_memories
    );
    assert_eq!(turn_two.total_memories, 1);

    let memories = agent.get_all_memories().unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].key, "user_name");
    assert_eq!(memories[0].value, "Arjun");
}
