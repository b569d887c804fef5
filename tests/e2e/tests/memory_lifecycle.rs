//! Store + Retriever journeys: inserting, updating and retrieving memories
//! the way the Agent's turn loop does, without the LLM in the loop.

use longmem_core::{MemoryType, Retriever, Store};
use longmem_e2e_tests::test_store;

fn store_with(db: fn() -> (Store, tempfile::TempDir)) -> (Store, tempfile::TempDir) {
    db()
}

/// Scenario 1 (spec §8): add a name preference, retrieve it by a natural
/// language query, expect it back with a final score above the floor.
#[test]
fn add_and_retrieve_a_name() {
    let (store, _dir) = store_with(test_store);
    store
        .add_memory(MemoryType::Preference, "personal", "user_name", "Arjun", 0.95, "stated directly", 1)
        .unwrap();

    let retriever = Retriever::new(&store).with_min_score(0.01);
    let results = retriever.retrieve("What is the user's name?", 5, 2).unwrap();

    let hit = results.iter().find(|r| r.memory.key == "user_name");
    assert!(hit.is_some(), "expected user_name memory in results, got {:?}", results);
    assert!(hit.unwrap().score > 0.1, "score was {}", hit.unwrap().score);
}

/// Scenario 2 (spec §8): an `update` mutation collapses to a single active
/// memory, and the retired value never resurfaces in search.
#[test]
fn update_collapses_to_single_active_memory() {
    let (store, _dir) = store_with(test_store);
    store.add_memory(MemoryType::Fact, "location", "user_location", "Mumbai", 0.9, "t", 1).unwrap();
    let count_after_first_add = store.active_count().unwrap();

    store.deactivate_by_key("user_location").unwrap();
    store.add_memory(MemoryType::Fact, "location", "user_location", "Berlin", 0.9, "t", 2).unwrap();

    assert_eq!(store.active_count().unwrap(), count_after_first_add);
    assert_eq!(store.find_by_key("user_location").unwrap().unwrap().value, "Berlin");

    let retriever = Retriever::new(&store).with_min_score(0.0);
    let results = retriever.retrieve("where does the user live", 5, 3).unwrap();
    assert!(results.iter().all(|r| r.memory.value != "Mumbai"));
}

/// Deactivating the sole memory for a key removes it from every query path:
/// `find_by_key`, `get_by_id`, and keyword search all see it as gone.
#[test]
fn deactivate_by_key_is_invisible_everywhere() {
    let (store, _dir) = store_with(test_store);
    let mem = store
        .add_memory(MemoryType::Fact, "dietary", "dietary_preference", "vegetarian", 0.9, "t", 1)
        .unwrap();

    store.deactivate_by_key("dietary_preference").unwrap();

    assert!(store.find_by_key("dietary_preference").unwrap().is_none());
    assert!(store.get_memory_by_id(&mem.id).unwrap().is_none());
    assert!(store.search_fts("vegetarian", 5).unwrap().is_empty());
    assert_eq!(store.active_count().unwrap(), 0);
}

/// A preference/fact/constraint populates the profile projection
/// immediately on insert; an instruction-typed memory never does.
#[test]
fn profile_projection_is_maintained_on_write() {
    let (store, _dir) = store_with(test_store);
    store
        .add_memory(MemoryType::Preference, "language", "preferred_language", "Kannada", 0.95, "t", 1)
        .unwrap();
    store
        .add_memory(MemoryType::Instruction, "style", "formatting", "use bullet points", 0.9, "t", 1)
        .unwrap();

    let profile = store.get_profile().unwrap();
    assert_eq!(profile.get("preferred_language").unwrap(), "Kannada");
    assert!(!profile.contains_key("formatting"));
}
