//! On-disk pattern store tests

use hive_kernel::{Pattern, PatternStore};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_concurrent_appends_are_not_lost() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(PatternStore::open(&temp_dir.path().join("patterns.db")).unwrap());

    let p1 = Pattern::new("Flow beats force", "design", "reduce friction", 0.9);
    let p2 = Pattern::new("Slow is smooth", "music", "practice below tempo", 0.85);

    let handles: Vec<_> = [p1.clone(), p2.clone()]
        .into_iter()
        .map(|p| {
            let store = store.clone();
            std::thread::spawn(move || store.append(p))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let ids: HashSet<String> = store.list_recent(2).into_iter().map(|p| p.id).collect();
    assert!(ids.contains(&p1.id));
    assert!(ids.contains(&p2.id));
}

#[test]
fn test_many_writers() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(PatternStore::open(&temp_dir.path().join("patterns.db")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    store.append(Pattern::new(&format!("p-{}-{}", t, i), "test", "x", 0.5));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 200);
    assert_eq!(store.list_recent(1000).len(), 200);
}

#[test]
fn test_patterns_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("patterns.db");

    let pattern = Pattern::new("Root", "cooking", "set before release", 0.88)
        .with_domains(["construction".to_string()]);
    {
        let store = PatternStore::open(&path).unwrap();
        assert!(store.append(pattern.clone()));
    }

    let store = PatternStore::open(&path).unwrap();
    let loaded = store.get(&pattern.id).unwrap().expect("pattern persisted");
    assert_eq!(loaded.name, "Root");
    assert_eq!(loaded.source_domain, "cooking");
    assert!(loaded.potential_domains.contains("construction"));
    assert_eq!(
        loaded.created_at.timestamp_millis(),
        pattern.created_at.timestamp_millis()
    );
}

#[test]
fn test_recent_window_displaces_oldest() {
    let temp_dir = TempDir::new().unwrap();
    let store = PatternStore::open(&temp_dir.path().join("patterns.db")).unwrap();

    let first = Pattern::new("first", "a", "b", 0.5);
    store.append(first.clone());
    assert_eq!(store.list_recent(1)[0].id, first.id);

    store.append(Pattern::new("second", "a", "b", 0.5));
    let recent = store.list_recent(1);
    assert_eq!(recent[0].name, "second");

    // Displaced from the window, never mutated
    let still = store.get(&first.id).unwrap().unwrap();
    assert_eq!(still, store.list_recent(2)[1]);
}
