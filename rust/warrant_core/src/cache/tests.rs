use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use super::*;

fn local(capacity: usize) -> (Arc<LocalCache>, DependencyCache) {
    let backend = Arc::new(LocalCache::new(NonZeroUsize::new(capacity).unwrap()));
    let cache = DependencyCache::new(backend.clone());
    (backend, cache)
}

/// Backend whose operations can be switched to fail.
#[derive(Default)]
struct Flaky {
    inner: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl Flaky {
    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("down".into()))
        } else {
            Ok(())
        }
    }
}

impl CacheBackend for Flaky {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.check()?;
        self.inner.lock().unwrap().clear();
        Ok(())
    }
}

#[test]
fn test_store_then_fetch_counts_hit() {
    let (_, cache) = local(16);
    let alice = EntityRef::identity("a@x.com");
    let key = derived_key(&alice, "all_groups");

    assert_eq!(cache.fetch::<Vec<String>>(&key), None);
    cache.store(&key, &vec!["admins".to_string()], &[alice]);
    assert_eq!(cache.fetch::<Vec<String>>(&key), Some(vec!["admins".to_string()]));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_invalidate_sweeps_every_dependant() {
    let (backend, cache) = local(64);
    let alice = EntityRef::identity("a@x.com");
    let admins = EntityRef::group("admins");
    let ops = EntityRef::group("ops");

    let groups_key = derived_key(&alice, "all_groups");
    let member_key = derived_pair_key(&admins, "has_member", &alice);
    let ops_key = derived_key(&ops, "members");
    cache.store(&groups_key, &1u8, &[alice.clone(), admins.clone()]);
    cache.store(&member_key, &true, &[admins.clone(), alice.clone()]);
    cache.store(&ops_key, &2u8, &[ops.clone()]);

    cache.invalidate(&[admins.clone()]);

    assert!(!backend.contains(&groups_key));
    assert!(!backend.contains(&member_key));
    assert!(!backend.contains(&dependants_key(&admins)));
    // Unrelated entries survive; alice's set keeps its (now dangling) edges.
    assert!(backend.contains(&ops_key));
    assert!(backend.contains(&dependants_key(&alice)));
    assert_eq!(cache.stats().invalidated, 2);
}

#[test]
fn test_invalidate_without_dependants_is_noop() {
    let (backend, cache) = local(8);
    cache.invalidate(&[EntityRef::permission("deploy")]);
    assert!(backend.is_empty());
}

#[test]
fn test_add_to_set_is_atomic_under_contention() {
    let (backend, cache) = local(1024);
    let alice = EntityRef::identity("a@x.com");

    std::thread::scope(|s| {
        for t in 0..8 {
            let cache = &cache;
            let alice = &alice;
            s.spawn(move || {
                for i in 0..25 {
                    cache.add_dependants(&format!("k{t}-{i}"), std::slice::from_ref(alice));
                }
            });
        }
    });

    let bytes = backend.get(&dependants_key(&alice)).unwrap().unwrap();
    assert_eq!(decode_set(&bytes).unwrap().len(), 200);
}

#[test]
fn test_evicting_dependants_set_drops_its_derived_keys() {
    let (backend, cache) = local(3);
    let alice = EntityRef::identity("a@x.com");
    let key = derived_key(&alice, "all_groups");
    // Entries: alice's set, then the value.
    cache.store(&key, &1u8, &[alice.clone()]);
    assert!(backend.contains(&key));

    // Touch the value so alice's set becomes least recently used.
    assert_eq!(cache.fetch::<u8>(&key), Some(1));
    backend.set("filler-1", vec![0]).unwrap();
    backend.set("filler-2", vec![0]).unwrap();

    assert!(!backend.contains(&dependants_key(&alice)));
    assert!(!backend.contains(&key));
}

#[test]
fn test_set_overwrites_within_capacity() {
    let (backend, _) = local(2);
    backend.set("a", vec![1]).unwrap();
    backend.set("a", vec![2]).unwrap();
    assert_eq!(backend.len(), 1);
    assert_eq!(backend.get("a").unwrap(), Some(vec![2]));

    backend.set("b", vec![3]).unwrap();
    backend.set("c", vec![4]).unwrap();
    assert_eq!(backend.len(), 2);
    assert!(!backend.contains("a"));
    assert_eq!(backend.get("c").unwrap(), Some(vec![4]));
}

#[test]
fn test_undecodable_entry_is_a_miss() {
    let (backend, cache) = local(8);
    backend.set("junk", vec![0xff]).unwrap();
    assert_eq!(cache.fetch::<String>("junk"), None);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_undecodable_dependants_set_clears_everything() {
    let (backend, cache) = local(8);
    let alice = EntityRef::identity("a@x.com");
    backend.set("unrelated", vec![1]).unwrap();
    backend.set(&dependants_key(&alice), vec![0xff, 0xff, 0xff, 0xff, 0xff]).unwrap();

    cache.invalidate(&[alice]);
    assert!(backend.is_empty());
}

#[test]
fn test_failing_backend_degrades_to_misses() {
    let backend = Arc::new(Flaky::default());
    let cache = DependencyCache::new(backend.clone());
    let alice = EntityRef::identity("a@x.com");
    let key = derived_key(&alice, "all_groups");

    backend.failing.store(true, Ordering::SeqCst);
    cache.store(&key, &1u8, &[alice.clone()]);
    assert_eq!(cache.fetch::<u8>(&key), None);
    cache.invalidate(&[alice.clone()]);

    backend.failing.store(false, Ordering::SeqCst);
    assert!(backend.inner.lock().unwrap().is_empty());
    cache.store(&key, &1u8, &[alice]);
    assert_eq!(cache.fetch::<u8>(&key), Some(1));
}

#[test]
fn test_default_add_to_set_accumulates() {
    let backend = Flaky::default();
    backend.add_to_set("s", "a").unwrap();
    backend.add_to_set("s", "b").unwrap();
    backend.add_to_set("s", "a").unwrap();
    let set = decode_set(&backend.get("s").unwrap().unwrap()).unwrap();
    assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn test_disabled_cache_never_hits() {
    let cache = DependencyCache::disabled();
    let alice = EntityRef::identity("a@x.com");
    cache.store("k", &1u8, &[alice.clone()]);
    assert_eq!(cache.fetch::<u8>("k"), None);
    cache.invalidate(&[alice]);
    assert_eq!(cache.stats(), CacheStats::default());
}

#[test]
fn test_dependants_key_detection() {
    let alice = EntityRef::identity("a@x.com");
    assert!(is_dependants_key(&dependants_key(&alice)));
    assert!(!is_dependants_key(&derived_key(&alice, "all_groups")));
    assert!(!is_dependants_key("group:dependants"));
}

#[test]
fn test_value_is_dropped_when_a_dependants_set_cannot_stay_resident() {
    let (backend, cache) = local(2);
    let alice = EntityRef::identity("a@x.com");
    let admins = EntityRef::group("admins");
    let key = derived_key(&alice, "all_groups");

    // Two sets plus the value do not fit in two entries.
    cache.store(&key, &1u8, &[alice, admins]);
    assert!(!backend.contains(&key));
    assert_eq!(cache.fetch::<u8>(&key), None);
}
