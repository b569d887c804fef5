//! Two-pass distillation journey, driven through a scripted LLM client so
//! pass 1 and pass 2 can each be pinned to a specific canned response.

use longmem_core::{Distiller, MemoryAction};
use longmem_e2e_tests::ScriptedLlmClient;

const EXTRACTION_RESPONSE: &str = r#"{"memories": [
    {"action": "add", "type": "preference", "category": "dietary",
     "key": "dietary_preference", "value": "vegetarian", "confidence": 0.85,
     "reasoning": "user stated it directly"}
]}"#;

/// Scenario 3 (spec §8): pass 1 proposes a candidate, pass 2 rejects it -
/// the final mutation list is empty, and no memory is ever written.
#[test]
fn pass_two_rejection_yields_no_mutations() {
    let rejection = r#"{"validations": [
        {"key": "dietary_preference", "verdict": "reject", "reason": "conversation is hypothetical, not a real preference"}
    ]}"#;
    let client = ScriptedLlmClient::new(vec![EXTRACTION_RESPONSE, rejection]);
    let distiller = Distiller::new(client);

    let conversation = "USER: what would a vegetarian dish even look like?\n\nASSISTANT: something like a lentil curry.";
    let rt = tokio::runtime::Runtime::new().unwrap();
    let distilled = rt.block_on(distiller.distill(conversation, &[], 1, 2)).unwrap();

    assert!(distilled.is_empty(), "expected pass 2 rejection to drop the candidate, got {:?}", distilled);
}

/// The accept path: the same candidate, but pass 2 accepts it, so it
/// survives into the mutation list unchanged.
#[test]
fn pass_two_acceptance_preserves_the_candidate() {
    let acceptance = r#"{"validations": [
        {"key": "dietary_preference", "verdict": "accept", "reason": "explicitly and directly stated"}
    ]}"#;
    let client = ScriptedLlmClient::new(vec![EXTRACTION_RESPONSE, acceptance]);
    let distiller = Distiller::new(client);

    let conversation = "USER: I'm vegetarian, so no meat in any recipes please.\n\nASSISTANT: noted, I'll keep that in mind.";
    let rt = tokio::runtime::Runtime::new().unwrap();
    let distilled = rt.block_on(distiller.distill(conversation, &[], 1, 2)).unwrap();

    assert_eq!(distilled.len(), 1);
    match &distilled[0].action {
        MemoryAction::Add { key, value, .. } => {
            assert_eq!(key, "dietary_preference");
            assert_eq!(value, "vegetarian");
        }
        other => panic!("expected an Add action, got {:?}", other),
    }
}

/// `keep`/`expire` verdicts bypass pass 2 entirely - a segment that only
/// proposes those never burns a validation call.
#[test]
fn keep_and_expire_skip_validation_entirely() {
    let extraction = r#"{"memories": [
        {"action": "keep", "key": "timezone", "reasoning": "still accurate, nothing changed"},
        {"action": "expire", "key": "old_project", "reasoning": "project was cancelled"}
    ]}"#;
    // Only one scripted response: if validation were invoked, the client
    // would panic on an empty queue, failing this test.
    let client = ScriptedLlmClient::new(vec![extraction]);
    let distiller = Distiller::new(client);

    use longmem_core::{Memory, MemoryType};
    let now = chrono::Utc::now();
    let existing = vec![Memory {
        id: "a".into(),
        r#type: MemoryType::Fact,
        category: "general".into(),
        key: "timezone".into(),
        value: "IST".into(),
        confidence: 0.9,
        reasoning: String::new(),
        source_turn: 1,
        last_used_turn: 0,
        is_active: true,
        created_at: now,
        updated_at: now,
    }];

    let rt = tokio::runtime::Runtime::new().unwrap();
    let distilled = rt.block_on(distiller.distill("USER: still in IST, and the old project's dead.", &existing, 3, 4)).unwrap();

    assert_eq!(distilled.len(), 2);
    assert!(distilled.iter().any(|d| matches!(&d.action, MemoryAction::Keep { key, .. } if key == "timezone")));
    assert!(distilled.iter().any(|d| matches!(&d.action, MemoryAction::Expire { key, .. } if key == "old_project")));
}
