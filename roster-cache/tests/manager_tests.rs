//! Layered cache behavior: fallback order, throttling, session loss and the
//! full consumer lifecycle.

use proptest::prelude::*;
use roster_cache::{
    Collaborators, GetUserDataOptions, InMemoryQueryCache, LoadState, LocalStore, QueryCache,
    Tier, UserDataContext, UserDataManager,
};
use roster_core::{normalize, CacheEntry, CacheKey, CachePolicy, QueryKey, SessionId};
use roster_test_utils::fixtures::{raw_envelope_user, raw_flat_user, sample_record};
use roster_test_utils::generators::arb_raw_response;
use roster_test_utils::{MemoryStore, MockUserApi, StaticSession, UserRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct Harness {
    api: Arc<MockUserApi>,
    store: Arc<MemoryStore>,
    query_cache: Arc<InMemoryQueryCache>,
    session: Arc<StaticSession>,
}

impl Harness {
    fn new(api: MockUserApi) -> Self {
        Self {
            api: Arc::new(api),
            store: Arc::new(MemoryStore::new()),
            query_cache: Arc::new(InMemoryQueryCache::new()),
            session: Arc::new(StaticSession::logged_in("token", "s-1")),
        }
    }

    fn manager(&self, policy: CachePolicy) -> UserDataManager {
        UserDataManager::new(
            self.api.clone(),
            self.store.clone(),
            self.query_cache.clone(),
            self.session.clone(),
            policy,
        )
    }

    fn context(&self) -> UserDataContext {
        let collaborators =
            Collaborators::new(self.api.clone(), self.store.clone(), self.session.clone())
                .with_query_cache(self.query_cache.clone());
        UserDataContext::create(collaborators, CachePolicy::default()).unwrap()
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::new(&CacheKey::from("/api/me"), Some(&SessionId::new("s-1")))
    }
}

fn me() -> CacheKey {
    CacheKey::from("/api/me")
}

#[tokio::test]
async fn test_reads_fall_back_through_tiers_in_order() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let manager = harness.manager(CachePolicy::default());

    let first = manager
        .read_user_data(GetUserDataOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.tier(), Tier::Network);

    let hit = manager
        .read_user_data(GetUserDataOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.tier(), Tier::QueryCache);

    harness.query_cache.invalidate_queries(&QueryKey::route_prefix(&me()));
    let hit = manager
        .read_user_data(GetUserDataOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.tier(), Tier::Manager);

    // A fresh manager over the same store only has the persisted copy.
    let cold = harness.manager(CachePolicy::default());
    harness.query_cache.invalidate_queries(&QueryKey::route_prefix(&me()));
    let hit = cold
        .read_user_data(GetUserDataOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.tier(), Tier::PersistedStore);
    assert_eq!(hit.fetched_at(), None);
    assert_eq!(hit.into_value(), sample_record());

    assert_eq!(harness.api.call_count(), 1);
}

#[tokio::test]
async fn test_query_cache_value_wins_over_lower_tiers() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let manager = harness.manager(CachePolicy::default());
    manager.get_user_data(GetUserDataOptions::new()).await.unwrap();

    let newer = UserRecord {
        email: "newer@example.com".to_string(),
        ..Default::default()
    };
    harness
        .query_cache
        .set_query_data(harness.query_key(), CacheEntry::fetched_now(newer.clone()));

    assert_eq!(manager.get_cached_user_data(), Some(newer));
}

#[tokio::test(start_paused = true)]
async fn test_forced_refresh_is_throttled_inside_cooldown() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let manager = harness.manager(CachePolicy::default().with_throttle_window(Duration::from_secs(10)));
    let forced = || GetUserDataOptions::new().force_refresh();

    let first = manager.read_user_data(forced()).await.unwrap().unwrap();
    assert_eq!(first.tier(), Tier::Network);

    tokio::time::advance(Duration::from_secs(5)).await;
    let second = manager.read_user_data(forced()).await.unwrap().unwrap();
    assert!(second.was_cache_hit());
    assert_eq!(second.into_value(), sample_record());
    assert_eq!(harness.api.call_count(), 1);
    assert_eq!(manager.stats().throttled, 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    let third = manager.read_user_data(forced()).await.unwrap().unwrap();
    assert_eq!(third.tier(), Tier::Network);
    assert_eq!(harness.api.call_count(), 2);
    assert!(harness.api.requested_options().iter().all(|options| options.no_cache));
}

#[tokio::test]
async fn test_forced_refresh_during_active_fetch_does_not_start_another() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()).with_gate(Arc::clone(&gate)));
    let manager = Arc::new(harness.manager(CachePolicy::default()));

    let leader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get_user_data(GetUserDataOptions::new()).await })
    };
    while harness.api.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    // Nothing cached yet, so the skipped refresh has nothing to return.
    let skipped = manager
        .get_user_data(GetUserDataOptions::new().force_refresh())
        .await
        .unwrap();
    assert_eq!(skipped, None);

    gate.add_permits(1);
    assert_eq!(leader.await.unwrap().unwrap(), Some(sample_record()));
    assert_eq!(harness.api.call_count(), 1);
}

#[tokio::test]
async fn test_malformed_persisted_entry_is_a_miss() {
    let harness = Harness::new(MockUserApi::returning(raw_envelope_user()));
    harness.store.set_item("user", "{\"firstName\": ").unwrap();
    let manager = harness.manager(CachePolicy::default());

    assert_eq!(manager.get_cached_user_data(), None);

    let read = manager
        .read_user_data(GetUserDataOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.tier(), Tier::Network);
    assert_eq!(read.value().first_name, "Ada");

    // The good copy replaced the malformed one.
    let persisted = harness.store.get_item("user").unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<UserRecord>(&persisted).unwrap(),
        normalize(&raw_envelope_user())
    );
}

#[tokio::test]
async fn test_logged_out_reads_return_none() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    harness.session.logout();
    let manager = harness.manager(CachePolicy::default());

    assert_eq!(manager.get_user_data(GetUserDataOptions::new()).await.unwrap(), None);
    assert_eq!(
        manager
            .get_user_data(GetUserDataOptions::new().force_refresh())
            .await
            .unwrap(),
        None
    );
    assert_eq!(harness.api.call_count(), 0);
}

#[tokio::test]
async fn test_consumer_lifecycle_end_to_end() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()).with_gate(Arc::clone(&gate)));
    let context = harness.context();
    let manager = Arc::clone(context.manager());

    // A mounts and starts the fetch.
    let mut a = context.mount("/api/me");
    let a_consumer = a.consumer().clone();
    let a_task = tokio::spawn(async move {
        a.load().await;
        a
    });
    while harness.api.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    // B mounts and joins the same fetch.
    let mut b = context.mount("/api/me");
    let b_task = tokio::spawn(async move {
        let state = b.load().await.clone();
        (state, b)
    });
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.registry().consumer_count(&me()), 2);

    // A unmounts mid-flight.
    a_task.abort();
    assert!(a_task.await.unwrap_err().is_cancelled());
    assert_eq!(manager.registry().consumers(&me()).len(), 1);
    assert!(!manager.registry().consumers(&me()).contains(&a_consumer));
    assert!(manager.get_active_request(&me()));

    gate.add_permits(1);
    let (state, b) = b_task.await.unwrap();
    assert_eq!(state, LoadState::Ready);
    assert_eq!(b.data(), Some(&sample_record()));
    assert_eq!(harness.api.call_count(), 1);

    // Every tier holds the record.
    assert_eq!(
        harness.query_cache.get_query_data(&harness.query_key()).unwrap().data,
        sample_record()
    );
    let persisted = harness.store.get_item("user").unwrap().unwrap();
    assert_eq!(serde_json::from_str::<UserRecord>(&persisted).unwrap(), sample_record());
    assert_eq!(manager.get_cached_user_data(), Some(sample_record()));

    // Logout clears every tier through the session watcher.
    harness.session.logout();
    for _ in 0..100 {
        if harness.store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.store.is_empty());
    assert!(harness.query_cache.is_empty());
    assert_eq!(manager.get_cached_user_data(), None);

    drop(b);
    assert!(!manager.registry().has_consumers(&me()));
    context.dispose();
}

#[tokio::test]
async fn test_token_swap_clears_previous_user() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let context = harness.context();
    context
        .manager()
        .get_user_data(GetUserDataOptions::new())
        .await
        .unwrap();

    harness.session.login("other-token", "s-2");
    for _ in 0..100 {
        if harness.store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(context.manager().get_cached_user_data(), None);
}

#[tokio::test]
async fn test_clear_during_fetch_leaves_tiers_empty() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()).with_gate(Arc::clone(&gate)));
    let manager = Arc::new(harness.manager(CachePolicy::default()));

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get_user_data(GetUserDataOptions::new()).await })
    };
    while harness.api.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    manager.clear();
    gate.add_permits(1);

    // The caller still gets the record it asked for.
    assert_eq!(reader.await.unwrap().unwrap(), Some(sample_record()));
    assert!(harness.query_cache.is_empty());
    assert!(harness.store.is_empty());
    assert_eq!(manager.get_cached_user_data(), None);
    assert_eq!(harness.api.call_count(), 1);
}

#[tokio::test]
async fn test_clear_invalidates_queries_left_by_an_earlier_context() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let earlier = harness.context();
    earlier
        .manager()
        .get_user_data(GetUserDataOptions::for_route("/profile/consolidated"))
        .await
        .unwrap();
    earlier.dispose();
    assert_eq!(harness.query_cache.len(), 1);

    let next = harness.context();
    next.manager().clear();
    assert!(harness.query_cache.is_empty());
    next.dispose();
}

#[tokio::test]
async fn test_logout_and_relogin_with_same_token_clears() {
    let harness = Harness::new(MockUserApi::returning(raw_flat_user()));
    let context = harness.context();
    context
        .manager()
        .get_user_data(GetUserDataOptions::new())
        .await
        .unwrap();
    assert!(!harness.store.is_empty());

    // Both updates land before the watcher runs.
    harness.session.logout();
    harness.session.login("token", "s-1");
    for _ in 0..100 {
        if harness.store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.store.is_empty());
    assert_eq!(context.manager().get_cached_user_data(), None);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fetched_value_is_cached_normalized(raw in arb_raw_response()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let harness = Harness::new(MockUserApi::returning(raw.clone()));
        let manager = harness.manager(CachePolicy::default());

        let fetched: Option<UserRecord> = runtime
            .block_on(manager.get_user_data(GetUserDataOptions::new()))
            .unwrap();
        let expected = normalize(&raw);

        prop_assert_eq!(fetched.as_ref(), Some(&expected));
        prop_assert_eq!(manager.get_cached_user_data(), Some(expected.clone()));
        let persisted: Value = serde_json::from_str(
            &harness.store.get_item("user").unwrap().unwrap(),
        ).unwrap();
        prop_assert_eq!(normalize(&persisted), expected);
    }
}
