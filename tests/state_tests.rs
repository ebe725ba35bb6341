use channelfold::{StateError, StateRepository, StorageConfig, StorageStrategy};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn json_len(value: &str) -> u64 {
    serde_json::to_vec(value).unwrap().len() as u64
}

#[test]
fn test_put_get_remove() {
    let repo = StateRepository::<String>::in_memory();
    assert_eq!(repo.put("a", "1".to_string()).unwrap(), None);
    assert_eq!(repo.put("b", "2".to_string()).unwrap(), None);

    assert_eq!(repo.get("a").as_deref(), Some("1"));
    assert_eq!(repo.get("missing"), None);
    assert_eq!(repo.size(), 2);

    assert_eq!(repo.remove("a").as_deref(), Some("1"));
    assert_eq!(repo.remove("a"), None);
    assert_eq!(repo.size(), 1);
}

#[test]
fn test_put_returns_replaced_value() {
    let repo = StateRepository::<String>::in_memory();
    repo.put("a", "old".to_string()).unwrap();
    assert_eq!(repo.put("a", "new".to_string()).unwrap().as_deref(), Some("old"));
    assert_eq!(repo.get("a").as_deref(), Some("new"));
    assert_eq!(repo.size(), 1);
}

#[test]
fn test_keys_and_iter_cover_all_entries() {
    let repo = StateRepository::<String>::in_memory();
    for i in 0..20 {
        repo.put(format!("key-{i}"), format!("value-{i}")).unwrap();
    }
    let keys: HashSet<String> = repo.keys().collect();
    assert_eq!(keys.len(), 20);
    assert!(keys.contains("key-7"));

    for (key, value) in repo.iter() {
        assert_eq!(key.replace("key", "value"), value);
    }
    // Each call starts a fresh pass.
    assert_eq!(repo.keys().count(), 20);
}

#[test]
fn test_byte_counter_tracks_stored_values() {
    let repo = StateRepository::<String>::in_memory();
    repo.put("a", "12345".to_string()).unwrap();
    assert_eq!(repo.bytes_used(), json_len("12345"));

    repo.put("a", "1".to_string()).unwrap();
    assert_eq!(repo.bytes_used(), json_len("1"));

    repo.put("b", "xy".to_string()).unwrap();
    assert_eq!(repo.bytes_used(), json_len("1") + json_len("xy"));

    repo.remove("a");
    repo.remove("b");
    assert_eq!(repo.bytes_used(), 0);
}

#[test]
fn test_clear_resets_entries_and_counter() {
    let repo = StateRepository::<String>::in_memory();
    for i in 0..10 {
        repo.put(i.to_string(), "v".repeat(i)).unwrap();
    }
    repo.clear();
    assert!(repo.is_empty());
    assert_eq!(repo.bytes_used(), 0);
    assert!(!repo.is_closed());

    repo.put("again", "1".to_string()).unwrap();
    assert_eq!(repo.size(), 1);
}

#[test]
fn test_closed_repository_ignores_operations() {
    let repo = StateRepository::<String>::in_memory();
    repo.put("a", "1".to_string()).unwrap();
    repo.close();
    repo.close();

    assert!(repo.is_closed());
    assert_eq!(repo.put("b", "2".to_string()).unwrap(), None);
    assert_eq!(repo.get("a"), None);
    assert_eq!(repo.get("b"), None);
    assert_eq!(repo.remove("a"), None);
    assert_eq!(repo.size(), 0);
    assert_eq!(repo.bytes_used(), 0);
    assert_eq!(repo.keys().count(), 0);
    assert_eq!(repo.iter().count(), 0);
}

#[test]
fn test_compressed_strategy_round_trips_values() {
    let repo = StateRepository::<String>::new(StorageConfig::compressed());
    assert_eq!(repo.strategy(), StorageStrategy::Compressed);

    let large = "event-sourcing ".repeat(500);
    repo.put("large", large.clone()).unwrap();
    repo.put("small", "s".to_string()).unwrap();

    assert_eq!(repo.get("large"), Some(large.clone()));
    assert!(repo.bytes_used() < json_len(&large));
    assert_eq!(
        repo.put("large", "replaced".to_string()).unwrap(),
        Some(large)
    );
    assert_eq!(repo.remove("small").as_deref(), Some("s"));
    repo.remove("large");
    assert_eq!(repo.bytes_used(), 0);
}

#[test]
fn test_structured_values_are_supported() {
    let repo = StateRepository::<serde_json::Value>::new(StorageConfig::compressed());
    let value = serde_json::json!({"name": "order", "lines": [1, 2, 3]});
    repo.put("o-1", value.clone()).unwrap();
    assert_eq!(repo.get("o-1"), Some(value));
}

#[test]
fn test_bounded_repository_rejects_overflow() {
    let repo = StateRepository::<String>::new(StorageConfig::heap().with_max_bytes(10));
    repo.put("a", "12345".to_string()).unwrap();

    let err = repo.put("b", "123".to_string()).unwrap_err();
    match err {
        StateError::CapacityExceeded {
            key,
            requested,
            max_bytes,
        } => {
            assert_eq!(key, "b");
            assert_eq!(requested, 12);
            assert_eq!(max_bytes, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(repo.get("b"), None);
    assert_eq!(repo.size(), 1);
    assert_eq!(repo.bytes_used(), 7);

    // Shrinking an entry is always allowed and frees room.
    repo.put("a", "1".to_string()).unwrap();
    repo.put("b", "123".to_string()).unwrap();
    assert_eq!(repo.bytes_used(), 8);
}

#[test]
fn test_concurrent_writers_keep_counter_consistent() {
    let repo = Arc::new(StateRepository::<String>::in_memory());
    let handles: Vec<_> = (0..16)
        .map(|t| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                for i in 0..1000 {
                    let key = format!("key-{}", (t * 7 + i) % 50);
                    if i % 3 == 0 {
                        repo.remove(&key);
                    } else {
                        repo.put(key, "x".repeat(i % 17)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected: u64 = repo.iter().map(|(_, value)| json_len(&value)).sum();
    assert_eq!(repo.bytes_used(), expected);

    let keys: Vec<String> = repo.keys().collect();
    for key in keys {
        repo.remove(&key);
    }
    assert_eq!(repo.size(), 0);
    assert_eq!(repo.bytes_used(), 0);
}

#[test]
fn test_concurrent_writers_of_one_key_do_not_double_count() {
    let repo = Arc::new(StateRepository::<String>::in_memory());
    let handles: Vec<_> = (0..12)
        .map(|t| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                for i in 0..1000 {
                    repo.put("hot", "v".repeat((t + i) % 9)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let value = repo.get("hot").unwrap();
    assert_eq!(repo.bytes_used(), json_len(&value));
    repo.remove("hot");
    assert_eq!(repo.bytes_used(), 0);
}

#[test]
fn test_close_racing_with_writers_leaves_nothing_behind() {
    for _ in 0..20 {
        let repo = Arc::new(StateRepository::<String>::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("key-{}", (t + i) % 40);
                        if i % 4 == 0 {
                            repo.remove(&key);
                        } else {
                            repo.put(key, "v".repeat(i % 11)).unwrap();
                        }
                    }
                })
            })
            .collect();
        thread::yield_now();
        repo.close();
        for handle in handles {
            handle.join().unwrap();
        }

        // Debug reports the raw map and counter, not the closed-state view.
        let debug = format!("{repo:?}");
        assert!(debug.contains("entries: 0"), "{debug}");
        assert!(debug.contains("bytes_used: 0"), "{debug}");
    }
}
