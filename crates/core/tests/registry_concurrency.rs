//! Cross-thread behaviour of the content and command registries

mod common;

use common::{ok_handler, owner};
use mirai_api::{
    CommandRegistry, CommandSpec, ContentDefinition, ContentKind, GameRegistry, Identifier, RegistryError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 16;

fn block(name: &str) -> ContentDefinition {
    ContentDefinition::new(ContentKind::Block, name)
}

#[test]
fn test_concurrent_distinct_registrations() {
    let registry = Arc::new(GameRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.register_str(&format!("test:block_{}", i), block("Block"), &owner(&format!("plugin_{}", i)))
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap().is_ok());
    }

    let snapshot = registry.snapshot_ids();
    assert_eq!(snapshot.len(), THREADS);
    assert_eq!(registry.owner_count(), THREADS);

    let mut deduped = snapshot.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), THREADS);
}

#[test]
fn test_concurrent_distinct_command_registrations() {
    let registry = Arc::new(CommandRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let spec = CommandSpec::new(format!("cmd{}", i), ok_handler).alias(format!("c{}", i));
                registry.register(spec, &owner(&format!("plugin_{}", i)))
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap().is_ok());
    }

    let names = registry.snapshot_names();
    assert_eq!(names.len(), THREADS);
    assert_eq!(registry.len(), THREADS);

    for i in 0..THREADS {
        let entry = registry.lookup(&format!("c{}", i)).unwrap();
        assert_eq!(entry.name(), format!("cmd{}", i));
        assert_eq!(entry.owner(), &owner(&format!("plugin_{}", i)));
        assert_eq!(registry.names_owned_by(entry.owner()), vec![format!("cmd{}", i)]);
    }
}

#[test]
fn test_concurrent_duplicate_registration_has_one_winner() {
    let registry = Arc::new(GameRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .register_str("test:contested", block(&format!("Variant {}", i)), &owner(&format!("plugin_{}", i)))
                    .map(|_| i)
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let winners: Vec<usize> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, RegistryError::DuplicateIdentifier(_))));

    let id = Identifier::parse("test:contested").unwrap();
    let stored = registry.lookup(&id).unwrap();
    assert_eq!(stored.display_name(), format!("Variant {}", winners[0]));
    assert_eq!(registry.owner_of(&id), Some(owner(&format!("plugin_{}", winners[0]))));
}

#[test]
fn test_unregister_all_is_atomic_to_snapshots() {
    const GROUP: usize = 32;
    let registry = Arc::new(GameRegistry::new());
    let doomed = owner("doomed");
    let bystander = owner("bystander");

    registry.register_str("keep:anchor", block("Anchor"), &bystander).unwrap();

    for _ in 0..20 {
        for i in 0..GROUP {
            registry
                .register_str(&format!("doomed:block_{}", i), block("Doomed"), &doomed)
                .unwrap();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    let snapshot = registry.snapshot_ids();
                    observed.push(snapshot.iter().filter(|id| id.namespace() == "doomed").count());
                    assert!(snapshot.iter().any(|id| id.as_str() == "keep:anchor"));
                }
                observed
            })
        };

        let removed = registry.unregister_all(&doomed);
        assert_eq!(removed.len(), GROUP);
        stop.store(true, Ordering::Release);

        for count in reader.join().unwrap() {
            assert!(count == 0 || count == GROUP, "saw partial removal of {} entries", count);
        }
        assert_eq!(registry.len(), 1);
    }
}

#[test]
fn test_command_unregister_all_removes_aliases_atomically() {
    let registry = Arc::new(CommandRegistry::new());
    let doomed = owner("doomed");

    for _ in 0..20 {
        registry
            .register(CommandSpec::new("warp", ok_handler).alias("w").alias("goto"), &doomed)
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let by_name = registry.lookup("warp").is_some();
                    let by_alias = registry.lookup("goto").is_some();
                    // A later lookup can only see less than an earlier one.
                    assert!(by_name || !by_alias);
                }
            })
        };

        assert_eq!(registry.unregister_all(&doomed), vec!["warp".to_string()]);
        stop.store(true, Ordering::Release);
        reader.join().unwrap();

        for label in ["warp", "w", "goto"] {
            assert!(registry.lookup(label).is_none());
        }
    }
}

#[test]
fn test_concurrent_alias_collision_leaves_no_partial_state() {
    let registry = Arc::new(CommandRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    // Every command has a unique name but all share the alias "x".
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .register(
                        CommandSpec::new(format!("cmd{}", i), ok_handler).alias("x"),
                        &owner(&format!("plugin_{}", i)),
                    )
                    .is_ok()
            })
        })
        .collect();

    let successes = workers.into_iter().map(|w| w.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(successes, 1);
    assert_eq!(registry.len(), 1);

    let winner = registry.lookup("x").unwrap();
    assert_eq!(registry.snapshot_names(), vec![winner.name().to_string()]);
}

#[test]
fn test_lookup_sees_completed_registration_from_other_thread() {
    let registry = Arc::new(GameRegistry::new());
    let writer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            registry.register_str("test:visible", block("Visible"), &owner("writer")).unwrap();
        })
    };
    writer.join().unwrap();

    assert!(registry.lookup_str("test:visible").is_some());
}
