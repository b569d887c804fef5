//! Consolidator journeys: duplicate merge and the decay -> expire pipeline,
//! run against a real `Store` the way the Agent's periodic maintenance does.

use longmem_core::{Consolidator, MemoryType};
use longmem_e2e_tests::test_store;

/// Scenario 5 (spec §8): two memories under the same key are merged into
/// one, and the survivor is the higher-confidence one.
#[test]
fn duplicate_merge_keeps_highest_confidence() {
    let (store, _dir) = test_store();
    store.add_memory(MemoryType::Fact, "personal", "user_name", "Arjun", 0.7, "t", 1).unwrap();
    store.add_memory(MemoryType::Fact, "personal", "user_name", "Arjun Kumar", 0.95, "t", 2).unwrap();
    assert_eq!(store.active_count().unwrap(), 2);

    let report = Consolidator::new(&store).run_consolidation(5).unwrap();
    assert_eq!(report.duplicates_merged, 1);

    assert_eq!(store.active_count().unwrap(), 1);
    let survivor = store.find_by_key("user_name").unwrap().unwrap();
    assert_eq!(survivor.confidence, 0.95);
    assert_eq!(survivor.value, "Arjun Kumar");
}

/// Scenario 7 (spec §8): a memory just above the expiration floor survives
/// one decay step and is expired by the second, crossing the 0.3 line.
#[test]
fn decay_then_expire_crosses_confidence_floor() {
    let (store, _dir) = test_store();
    let mem = store.add_memory(MemoryType::Fact, "general", "timezone", "IST", 0.35, "t", 1).unwrap();
    store.touch_memory(&mem.id, 5).unwrap();

    let report_1 = Consolidator::new(&store).run_consolidation(300).unwrap();
    assert_eq!(report_1.memories_decayed, 1);
    assert_eq!(report_1.memories_expired, 0);
    let after_first = store.find_by_key("timezone").unwrap().unwrap();
    assert!((after_first.confidence - 0.315).abs() < 1e-4);
    assert!(after_first.is_active);

    let report_2 = Consolidator::new(&store).run_consolidation(600).unwrap();
    assert_eq!(report_2.memories_expired, 1);
    assert!(store.find_by_key("timezone").unwrap().is_none());
}

/// Consolidation never grows the active set: a run over an already-clean
/// store is a no-op on the count.
#[test]
fn consolidation_never_grows_active_count() {
    let (store, _dir) = test_store();
    store.add_memory(MemoryType::Fact, "general", "k1", "v1", 0.8, "t", 1).unwrap();
    store.add_memory(MemoryType::Fact, "general", "k2", "v2", 0.8, "t", 1).unwrap();

    let before = store.active_count().unwrap();
    let report = Consolidator::new(&store).run_consolidation(2).unwrap();
    assert!(report.total_active_after <= before);
}
