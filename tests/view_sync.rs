mod support;

use std::time::Duration;

use taskpool::bus::{EventKind, PoolEvent};
use taskpool::config::Config;
use taskpool::lifecycle::Action;
use taskpool::model::ScopeKey;
use taskpool::store::{StoreOptions, TaskPoolStore};
use taskpool::sync::{Dispatcher, DispatcherOptions, Payload, Session, View};

use support::Harness;

#[tokio::test]
async fn view_refetches_after_another_device_mutates() {
    let h = Harness::new();
    let (_, row) = h.seed("kid-a", 10).await;

    let view = View::mount(&h.store, &h.bus, ScopeKey::assigned("kid-a"));
    assert!(view.load().await.expect("load").expect("current").is_empty());

    // A second client with its own cache, sharing the event bus.
    let other_store = TaskPoolStore::new(h.service.clone(), StoreOptions::default());
    let other = Dispatcher::new(other_store, h.bus.clone(), DispatcherOptions::default());
    other
        .dispatch(&row.id, Action::Assign, Payload::default())
        .await
        .expect("assign elsewhere");

    assert!(view.sync_events().await.expect("sync"));
    let records = view.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, row.id);
}

#[tokio::test]
async fn events_for_other_dependents_are_ignored() {
    let h = Harness::new();
    let (_, other_row) = h.seed("kid-b", 10).await;

    let view = View::mount(&h.store, &h.bus, ScopeKey::assigned("kid-a"));
    view.load().await.expect("load");
    let calls = h.service.list_calls();

    h.dispatcher
        .dispatch(&other_row.id, Action::Assign, Payload::default())
        .await
        .expect("assign kid-b");

    assert!(!view.sync_events().await.expect("sync"));
    assert_eq!(h.service.list_calls(), calls);
}

#[tokio::test]
async fn library_view_skips_verification_events() {
    let h = Harness::new();
    let view = View::mount(&h.store, &h.bus, ScopeKey::available("kid-a"));
    view.load().await.expect("load");

    h.bus.emit(PoolEvent::new(EventKind::Verified, "kid-a"));
    assert!(!view.sync_events().await.expect("verified"));

    h.bus.emit(PoolEvent::new(EventKind::Unassigned, "kid-a"));
    assert!(view.sync_events().await.expect("unassigned"));
}

#[tokio::test]
async fn load_after_unmount_is_dropped() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.service.delay_lists(Duration::from_millis(50));

    let view = View::mount(&h.store, &h.bus, ScopeKey::available("kid-a"));
    let loading = {
        let view = view.clone();
        tokio::spawn(async move { view.load().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.unmount();

    let outcome = loading.await.expect("join").expect("load");
    assert!(outcome.is_none());
    assert!(!view.is_mounted());
    assert!(view.records().is_empty());
}

#[tokio::test]
async fn newer_load_wins() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.service.delay_lists(Duration::from_millis(20));

    let view = View::mount(&h.store, &h.bus, ScopeKey::available("kid-a"));
    let (older, newer) = tokio::join!(view.load(), view.load());
    assert!(older.expect("older").is_none());
    assert_eq!(newer.expect("newer").map(|rows| rows.len()), Some(1));
    assert_eq!(h.service.list_calls(), 1);
}

#[tokio::test]
async fn refocus_always_refetches() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    let view = View::mount(&h.store, &h.bus, ScopeKey::available("kid-a"));
    view.load().await.expect("load");
    view.load().await.expect("cached");
    assert_eq!(h.service.list_calls(), 1);

    view.on_focus().await.expect("refocus");
    assert_eq!(h.service.list_calls(), 2);
}

#[tokio::test]
async fn focus_prefetches_other_libraries_and_swallows_failures() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.seed("kid-b", 10).await;
    h.seed("kid-c", 10).await;

    let session = Session::new(
        h.store.clone(),
        h.bus.clone(),
        vec!["kid-a".to_string(), "kid-b".to_string(), "kid-c".to_string()],
    );
    let snapshot = session
        .focus("kid-a")
        .await
        .expect("focus")
        .expect("current focus");
    assert_eq!(snapshot.available.len(), 1);
    assert!(snapshot.assigned.is_empty());

    // The prefetch has not run yet; its first read fails.
    h.service.fail_lists(1);
    session.wait_prefetch().await;

    assert!(h.store.cached(&ScopeKey::available("kid-b")).is_none());
    assert_eq!(
        h.store
            .cached(&ScopeKey::available("kid-c"))
            .map(|rows| rows.len()),
        Some(1)
    );
}

#[tokio::test]
async fn switching_focus_unmounts_previous_views() {
    let h = Harness::new();
    let session = Session::new(
        h.store.clone(),
        h.bus.clone(),
        vec!["kid-a".to_string(), "kid-b".to_string()],
    )
    .with_prefetch(false);

    session.focus("kid-a").await.expect("focus a");
    let first = session.focused().expect("focused");
    session.focus("kid-b").await.expect("focus b");

    assert!(!first.library.is_mounted());
    assert!(!first.assigned.is_mounted());
    let current = session.focused().expect("focused");
    assert_eq!(current.dependent_id, "kid-b");
    assert!(current.library.is_mounted());

    let calls = h.service.list_calls();
    session.on_visible().await.expect("visible");
    assert_eq!(h.service.list_calls(), calls + 2);
}

#[tokio::test]
async fn prefetch_follows_sync_config() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.seed("kid-b", 10).await;

    let mut config = Config::default();
    config.sync.prefetch_on_focus = false;
    let session = Session::from_config(
        h.store.clone(),
        h.bus.clone(),
        vec!["kid-a".to_string(), "kid-b".to_string()],
        &config,
    );
    session.focus("kid-a").await.expect("focus");
    session.wait_prefetch().await;

    assert_eq!(h.service.list_calls(), 2);
    assert!(h.store.cached(&ScopeKey::available("kid-b")).is_none());
}

#[tokio::test]
async fn watch_and_sync_events_both_see_an_event() {
    let h = Harness::new();
    let view = View::mount(&h.store, &h.bus, ScopeKey::assigned("kid-a"));
    view.load().await.expect("load");

    let watching = {
        let view = view.clone();
        tokio::spawn(async move { view.watch().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.bus.emit(PoolEvent::new(EventKind::PoolUpdated, "kid-a"));
    assert!(view.sync_events().await.expect("sync"));
    assert!(watching.await.expect("join").expect("watch"));
}

#[tokio::test]
async fn unmount_ends_a_pending_watch() {
    let h = Harness::new();
    let view = View::mount(&h.store, &h.bus, ScopeKey::assigned("kid-a"));
    assert_eq!(h.bus.listener_count(), 2);

    let watching = {
        let view = view.clone();
        tokio::spawn(async move { view.watch().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.unmount();

    let woke = tokio::time::timeout(Duration::from_secs(1), watching)
        .await
        .expect("watch returns")
        .expect("join")
        .expect("watch");
    assert!(!woke);
    assert_eq!(h.bus.listener_count(), 0);
}
