use std::rc::Rc;
use std::time::Duration;

use crate::cache::{CachedSubResourceState, LookupResult, SharedSubResourceCache};
use crate::config::CacheConfig;
use crate::expiration::CacheExpirationTime;
use crate::metadata::{NetworkMetadata, ResponseHead};
use crate::node::{LoadingNode, iter_chain};
use crate::principal::{OriginAttributes, OriginAttributesPattern, PartitionKey, Principal};
use crate::singleton::CacheSingleton;
use crate::test::{self, TestKey, TestLoader, TestNode, TestValue};

fn cache() -> SharedSubResourceCache<TestNode> {
    test::setup();
    SharedSubResourceCache::new("test")
}

#[test]
fn lookup_misses_on_empty_cache() {
    let cache = cache();
    let loader = TestLoader::new(test::principal("example.com"));
    let key = TestKey::new(test::principal("example.com"), "https://example.com/a.css");

    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&loader, &key, true),
        LookupResult::Miss
    ));
}

#[test]
fn end_to_end_coalesced_load() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader_a = TestLoader::new(principal.clone());
    let loader_b = TestLoader::new(principal.clone());

    // A looks up the key, misses, and starts the fetch.
    let node_a = TestNode::new(&loader_a, key.clone());
    assert!(matches!(
        cache.lookup(&loader_a, &key, false),
        LookupResult::Miss
    ));
    cache.load_started(&key, &node_a);
    assert!(node_a.is_loading());

    // B finds the in-flight load and becomes a passenger.
    let node_b = TestNode::new(&loader_b, key.clone());
    let result = cache.lookup(&loader_b, &key, false);
    let LookupResult::Loading(head) = &result else {
        panic!("expected the in-flight chain");
    };
    assert!(Rc::ptr_eq(head, &node_a));
    assert!(cache.coalesce_load(&key, &node_b, result.state()));
    assert_eq!(node_b.coalesced_count(), 1);

    // Both nodes are reachable from the chain head.
    let chain: Vec<_> = iter_chain(&node_a).collect();
    assert_eq!(chain.len(), 2);
    assert!(Rc::ptr_eq(&chain[0], &node_a));
    assert!(Rc::ptr_eq(&chain[1], &node_b));

    // A's fetch finishes.
    let value = TestValue::new("body { color: red }");
    node_a.finish_with(Rc::clone(&value));
    node_a.set_metadata(Rc::new(NetworkMetadata::new(
        None,
        Some(ResponseHead {
            status: 200,
            headers: vec![("Content-Type".into(), "text/css".into())],
        }),
    )));
    cache.insert(&node_a);
    cache.load_completed(&node_a);
    assert!(node_a.is_completed());

    // Any subsequent lookup is served from the complete table.
    let LookupResult::Complete {
        value: cached,
        network_metadata,
    } = cache.lookup(&loader_b, &key, false)
    else {
        panic!("expected a complete entry");
    };
    assert!(Rc::ptr_eq(&cached, &value));
    let metadata = network_metadata.unwrap();
    assert_eq!(metadata.response_head().unwrap().status, 200);
}

#[test]
fn sync_loads_never_join_an_async_fetch() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal.clone());
    let node = TestNode::new(&loader, key.clone());
    cache.load_started(&key, &node);

    let sync_loader = TestLoader::new(principal);
    assert!(matches!(
        cache.lookup(&sync_loader, &key, true),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&sync_loader, &key, false),
        LookupResult::Loading(_)
    ));
}

#[test]
fn many_loaders_share_one_fetch() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let first_loader = TestLoader::new(principal.clone());
    let first = TestNode::new(&first_loader, key.clone());
    assert!(matches!(
        cache.lookup(&first_loader, &key, false),
        LookupResult::Miss
    ));
    cache.load_started(&key, &first);

    let mut passengers = Vec::new();
    for _ in 0..5 {
        let loader = TestLoader::new(principal.clone());
        let node = TestNode::new(&loader, key.clone());
        let result = cache.lookup(&loader, &key, false);
        assert!(matches!(result, LookupResult::Loading(_)));
        assert!(cache.coalesce_load(&key, &node, result.state()));
        passengers.push(node);
    }

    // Exactly one fetch is in flight, with every node on its chain.
    let chain: Vec<_> = iter_chain(&first).collect();
    assert_eq!(chain.len(), 6);
    assert!(chain.iter().filter(|node| node.is_loading()).count() == 1);
    for (node, passenger) in chain[1..].iter().zip(&passengers) {
        assert!(Rc::ptr_eq(node, passenger));
    }
}

#[test]
fn coalesce_returns_false_without_an_existing_load() {
    let cache = cache();
    let loader = TestLoader::new(test::principal("example.com"));
    let key = TestKey::new(test::principal("example.com"), "https://example.com/a.css");
    let node = TestNode::new(&loader, key.clone());

    assert!(!cache.coalesce_load(&key, &node, CachedSubResourceState::Miss));
    assert!(!cache.coalesce_load(&key, &node, CachedSubResourceState::Complete));
}

#[test]
fn deferred_loads_park_in_the_pending_table() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/print.css");

    let loader = TestLoader::new(principal);
    let node = TestNode::new(&loader, key.clone());
    node.set_defer(true);
    cache.defer_load(&key, &node);

    let result = cache.lookup(&loader, &key, false);
    let LookupResult::Pending(head) = result else {
        panic!("expected the pending chain");
    };
    assert!(Rc::ptr_eq(&head, &node));
}

#[test]
fn pending_promotion_makes_the_new_node_the_head() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    // Two deferring loaders park a chain in the pending table.
    let loader_a = TestLoader::new(principal.clone());
    let node_a = TestNode::new(&loader_a, key.clone());
    node_a.set_defer(true);
    cache.defer_load(&key, &node_a);

    let loader_a2 = TestLoader::new(principal.clone());
    let node_a2 = TestNode::new(&loader_a2, key.clone());
    node_a2.set_defer(true);
    let result = cache.lookup(&loader_a2, &key, false);
    assert!(cache.coalesce_load(&key, &node_a2, result.state()));

    // A non-deferring request must start the fetch itself, inheriting the
    // pending chain as passengers.
    let loader_b = TestLoader::new(principal);
    let node_b = TestNode::new(&loader_b, key.clone());
    let result = cache.lookup(&loader_b, &key, false);
    assert_eq!(result.state(), CachedSubResourceState::Pending);
    assert!(!cache.coalesce_load(&key, &node_b, result.state()));

    // The old chain hangs off the new head, in order.
    let chain: Vec<_> = iter_chain(&node_b).collect();
    assert_eq!(chain.len(), 3);
    assert!(Rc::ptr_eq(&chain[0], &node_b));
    assert!(Rc::ptr_eq(&chain[1], &node_a));
    assert!(Rc::ptr_eq(&chain[2], &node_a2));

    // Every passenger's loader was notified exactly once, the promoting
    // loader not at all.
    assert_eq!(loader_a.pending_notifications(), 1);
    assert_eq!(loader_a2.pending_notifications(), 1);
    assert_eq!(loader_b.pending_notifications(), 0);

    // The pending entry is gone; the new head is expected to fetch.
    assert!(matches!(
        cache.lookup(&loader_b, &key, false),
        LookupResult::Miss
    ));
    cache.load_started(&key, &node_b);
    assert!(matches!(
        cache.lookup(&loader_b, &key, false),
        LookupResult::Loading(_)
    ));
}

#[test]
fn start_pending_loads_starts_whole_chains() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader_a = TestLoader::new(principal.clone());
    let node_a = TestNode::new(&loader_a, key.clone());
    node_a.set_defer(true);
    cache.defer_load(&key, &node_a);

    let loader_b = TestLoader::new(principal.clone());
    let node_b = TestNode::new(&loader_b, key.clone());
    node_b.set_defer(true);
    let result = cache.lookup(&loader_b, &key, false);
    assert!(cache.coalesce_load(&key, &node_b, result.state()));

    // A predicate that matches nothing starts nothing.
    cache.start_pending_loads_for_loader(&loader_b, |_| false);
    assert!(matches!(
        cache.lookup(&loader_b, &key, false),
        LookupResult::Pending(_)
    ));

    // Starting for B's loader takes the whole chain with it, even though A
    // heads it.
    cache.start_pending_loads_for_loader(&loader_b, |_| true);
    assert!(matches!(
        cache.lookup(&loader_b, &key, false),
        LookupResult::Miss
    ));
    assert_eq!(loader_a.pending_notifications(), 1);
    assert_eq!(loader_b.pending_notifications(), 1);
    assert!(node_a.pending_start_requested());
    assert!(!node_b.pending_start_requested());
}

#[test]
fn cancel_pending_splices_out_only_the_loaders_nodes() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader_l = TestLoader::new(principal.clone());
    let loader_m = TestLoader::new(principal);

    // Build the pending chain L1 -> M1 -> L2 -> M2.
    let node_l1 = TestNode::new(&loader_l, key.clone());
    node_l1.set_defer(true);
    cache.defer_load(&key, &node_l1);

    let mut others = Vec::new();
    for loader in [&loader_m, &loader_l, &loader_m] {
        let node = TestNode::new(loader, key.clone());
        node.set_defer(true);
        assert!(cache.coalesce_load(&key, &node, CachedSubResourceState::Pending));
        others.push(node);
    }
    let (node_m1, node_l2, node_m2) = (&others[0], &others[1], &others[2]);

    cache.cancel_pending_loads_for_loader(&loader_l);

    // Only L's nodes were detached and notified.
    assert!(node_l1.was_cancelled_while_pending());
    assert!(node_l2.was_cancelled_while_pending());
    assert!(!node_m1.was_cancelled_while_pending());
    assert!(!node_m2.was_cancelled_while_pending());

    // The entry survives with M's nodes intact and in order.
    let result = cache.lookup(&loader_m, &key, false);
    let LookupResult::Pending(head) = result else {
        panic!("expected the pending chain to survive");
    };
    let chain: Vec<_> = iter_chain(&head).collect();
    assert_eq!(chain.len(), 2);
    assert!(Rc::ptr_eq(&chain[0], node_m1));
    assert!(Rc::ptr_eq(&chain[1], node_m2));

    // Cancelling the last interested loader removes the entry entirely.
    cache.cancel_pending_loads_for_loader(&loader_m);
    assert!(matches!(
        cache.lookup(&loader_m, &key, false),
        LookupResult::Miss
    ));
}

#[test]
fn cancelling_a_loader_keeps_the_shared_fetch_running() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader_a = TestLoader::new(principal.clone());
    let node_a = TestNode::new(&loader_a, key.clone());
    cache.load_started(&key, &node_a);

    let loader_b = TestLoader::new(principal);
    let node_b = TestNode::new(&loader_b, key.clone());
    assert!(cache.coalesce_load(&key, &node_b, CachedSubResourceState::Loading));

    cache.cancel_loads_for_loader(&loader_b);

    // B's node is cancelled, but the fetch and its entry remain for A.
    assert!(node_b.is_cancelled());
    assert!(!node_a.is_cancelled());
    assert!(node_a.is_loading());
    assert!(matches!(
        cache.lookup(&loader_a, &key, false),
        LookupResult::Loading(_)
    ));
}

#[test]
fn load_completed_is_idempotent() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal);
    let node = TestNode::new(&loader, key.clone());

    // Completing a node that never started loading is a no-op.
    cache.load_completed(&node);
    assert!(!node.is_completed());

    cache.load_started(&key, &node);
    cache.load_completed(&node);
    assert!(node.is_completed());

    // A redundant completion signal, e.g. after cancellation, is harmless.
    cache.load_completed(&node);
}

#[test]
fn principal_refcount_purges_only_on_the_last_unregister() {
    let cache = cache();
    let principal = test::principal("example.com");
    let other_principal = test::principal("other.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");
    let other_key = TestKey::new(other_principal.clone(), "https://other.com/b.css");

    let loader = TestLoader::new(principal.clone());
    let other_loader = TestLoader::new(other_principal);
    for _ in 0..3 {
        cache.register_loader(&loader);
    }
    cache.register_loader(&other_loader);

    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);
    let other_node = TestNode::new(&other_loader, other_key.clone());
    other_node.finish_with(TestValue::new("b"));
    cache.insert(&other_node);

    // Intermediate unregisters purge nothing.
    cache.unregister_loader(&loader);
    cache.unregister_loader(&loader);
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Complete { .. }
    ));

    // The last one purges this principal's entries, and only those.
    cache.unregister_loader(&loader);
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&other_loader, &other_key, false),
        LookupResult::Complete { .. }
    ));
}

#[test]
fn expired_entries_are_served_only_to_documents_that_loaded_them() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal.clone());
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    node.set_expiration(CacheExpirationTime::from_now(Duration::ZERO));
    cache.insert(&node);

    // Stale for a fresh loader.
    let fresh_loader = TestLoader::new(principal.clone());
    assert!(matches!(
        cache.lookup(&fresh_loader, &key, false),
        LookupResult::Miss
    ));

    // A document that already used the entry keeps seeing it, even when
    // bypassing the cache.
    let returning_loader = TestLoader::new(principal);
    returning_loader.note_loaded(key.clone());
    assert!(matches!(
        cache.lookup(&returning_loader, &key, false),
        LookupResult::Complete { .. }
    ));
    returning_loader.set_bypass_cache(true);
    assert!(matches!(
        cache.lookup(&returning_loader, &key, false),
        LookupResult::Complete { .. }
    ));
}

#[test]
fn bypassing_loaders_skip_fresh_entries() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal.clone());
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);

    let bypassing = TestLoader::new(principal);
    bypassing.set_bypass_cache(true);
    assert!(matches!(
        cache.lookup(&bypassing, &key, false),
        LookupResult::Miss
    ));

    // The reload may then overwrite the fresh entry.
    let reload = TestNode::new(&bypassing, key.clone());
    reload.finish_with(TestValue::new("a v2"));
    cache.insert(&reload);

    let reader = TestLoader::new(test::principal("example.com"));
    let LookupResult::Complete { value, .. } = cache.lookup(&reader, &key, false) else {
        panic!("expected the reloaded entry");
    };
    assert_eq!(value.text, "a v2");
}

#[test]
fn async_results_supersede_sync_placeholders() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal);
    let sync_node = TestNode::new_sync(&loader, key.clone());
    sync_node.finish_with(TestValue::new("sync"));
    cache.insert(&sync_node);

    let async_node = TestNode::new(&loader, key.clone());
    async_node.finish_with(TestValue::new("async"));
    cache.insert(&async_node);

    let LookupResult::Complete { value, .. } = cache.lookup(&loader, &key, false) else {
        panic!("expected a complete entry");
    };
    assert_eq!(value.text, "async");
}

#[test]
fn clear_in_process_without_arguments_clears_everything() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal.clone());
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);

    cache.clear_in_process(None, None, None);
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
}

#[test]
fn clear_in_process_by_exact_principal() {
    let cache = cache();
    let principal = test::principal("example.com");
    let other_principal = test::principal("other.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");
    let other_key = TestKey::new(other_principal.clone(), "https://other.com/b.css");

    let loader = TestLoader::new(principal.clone());
    let other_loader = TestLoader::new(other_principal);
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);
    let other_node = TestNode::new(&other_loader, other_key.clone());
    other_node.finish_with(TestValue::new("b"));
    cache.insert(&other_node);

    cache.clear_in_process(Some(&principal), None, None);
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&other_loader, &other_key, false),
        LookupResult::Complete { .. }
    ));
}

#[test]
fn clear_in_process_by_site_includes_partitioned_entries() {
    let cache = cache();

    // A first-party entry for example.com.
    let example = test::principal("example.com");
    let example_key = TestKey::new(example.clone(), "https://example.com/a.css");

    // other.com embedded under example.com: partition principal carries a
    // partition key for example.com.
    let partitioned = Principal::new(
        "https://other.com",
        "other.com",
        OriginAttributes {
            partition_key: Some(PartitionKey::new("example.com")),
            ..Default::default()
        },
    );
    let partitioned_key = TestKey::with_partition(
        partitioned.clone(),
        partitioned.clone(),
        "https://other.com/embedded.css",
    );

    // An unrelated first-party entry for other.com.
    let other = test::principal("other.com");
    let other_key = TestKey::new(other.clone(), "https://other.com/b.css");

    let example_loader = TestLoader::new(example);
    let partitioned_loader = TestLoader::new(partitioned);
    let other_loader = TestLoader::new(other);

    for (loader, key) in [
        (&example_loader, &example_key),
        (&partitioned_loader, &partitioned_key),
        (&other_loader, &other_key),
    ] {
        let node = TestNode::new(loader, (*key).clone());
        node.finish_with(TestValue::new("x"));
        cache.insert(&node);
    }

    let pattern = OriginAttributesPattern {
        private_browsing_id: Some(0),
        ..Default::default()
    };
    cache.clear_in_process(None, Some("example.com"), Some(&pattern));

    // The site's own entry and the copy partitioned under it are gone, the
    // unrelated other.com entry stays.
    assert!(matches!(
        cache.lookup(&example_loader, &example_key, false),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&partitioned_loader, &partitioned_key, false),
        LookupResult::Miss
    ));
    assert!(matches!(
        cache.lookup(&other_loader, &other_key, false),
        LookupResult::Complete { .. }
    ));
}

#[test]
fn clear_in_process_by_site_honors_the_pattern() {
    let cache = cache();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal);
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);

    // A pattern restricted to private browsing does not touch the
    // non-private entry.
    let pattern = OriginAttributesPattern {
        private_browsing_id: Some(1),
        ..Default::default()
    };
    cache.clear_in_process(None, Some("example.com"), Some(&pattern));
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Complete { .. }
    ));
}

#[test]
fn disabled_cache_does_not_store_entries() {
    test::setup();
    let cache: SharedSubResourceCache<TestNode> = SharedSubResourceCache::with_config(
        "test",
        CacheConfig {
            enabled: false,
            ..Default::default()
        },
    );
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal);
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    cache.insert(&node);

    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
}

#[test]
fn default_expiration_clamps_entry_lifetime() {
    test::setup();
    let cache: SharedSubResourceCache<TestNode> = SharedSubResourceCache::with_config(
        "test",
        CacheConfig {
            default_expiration: Some(Duration::ZERO),
            ..Default::default()
        },
    );
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");

    let loader = TestLoader::new(principal.clone());
    let node = TestNode::new(&loader, key.clone());
    node.finish_with(TestValue::new("a"));
    // The node itself would never expire; the configured TTL wins.
    cache.insert(&node);

    let fresh_loader = TestLoader::new(principal);
    assert!(matches!(
        cache.lookup(&fresh_loader, &key, false),
        LookupResult::Miss
    ));
}

#[test]
fn size_of_accounts_cached_values() {
    let cache = cache();
    assert_eq!(cache.size_of(), 0);

    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");
    let loader = TestLoader::new(principal);
    let node = TestNode::new(&loader, key);
    node.finish_with(TestValue::new("0123456789"));
    cache.insert(&node);

    assert!(cache.size_of() >= 10);
}

#[test]
fn long_chains_tear_down_iteratively() {
    test::setup();
    let principal = test::principal("example.com");
    let key = TestKey::new(principal.clone(), "https://example.com/a.css");
    let loader = TestLoader::new(principal);

    // Deep enough that one drop frame per node would overflow the stack.
    let head = TestNode::new(&loader, key.clone());
    let mut tail = Rc::clone(&head);
    for _ in 0..100_000 {
        let node = TestNode::new(&loader, key.clone());
        tail.link().set_next(Some(Rc::clone(&node)));
        tail = node;
    }

    drop(tail);
    drop(head);
}

#[test]
fn singleton_has_an_explicit_lifecycle() {
    test::setup();
    let singleton: CacheSingleton<TestNode> = CacheSingleton::new();
    assert!(singleton.get().is_none());

    let cache = singleton.get_or_init(|| SharedSubResourceCache::new("test"));
    let again = singleton.get().unwrap();
    assert!(Rc::ptr_eq(&cache, &again));

    singleton.delete();
    assert!(singleton.get().is_none());

    // An outstanding handle stays usable after teardown.
    let loader = TestLoader::new(test::principal("example.com"));
    let key = TestKey::new(test::principal("example.com"), "https://example.com/a.css");
    assert!(matches!(
        cache.lookup(&loader, &key, false),
        LookupResult::Miss
    ));
}
