mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskpool::error::Error;
use taskpool::lifecycle::{Action, Role};
use taskpool::model::{AssignmentUpdate, ScopeKey, Status};
use taskpool::service::RecordService;
use taskpool::store::{ScopeSnapshot, StoreOptions};
use taskpool::sync::Payload;

use support::Harness;

fn as_child() -> Payload {
    Payload {
        role: Some(Role::Child),
        expected_status: None,
    }
}

fn ids(rows: &[taskpool::model::Assignment]) -> Vec<String> {
    rows.iter().map(|row| row.id.clone()).collect()
}

#[tokio::test]
async fn concurrent_reads_share_one_request() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.service.delay_lists(Duration::from_millis(50));
    let key = ScopeKey::available("kid-a");

    let (a, b, c) = tokio::join!(h.store.fetch(&key), h.store.fetch(&key), h.store.fetch(&key));
    let a = a.expect("first");
    assert_eq!(a, b.expect("second"));
    assert_eq!(a, c.expect("third"));
    assert_eq!(a.len(), 1);
    assert_eq!(h.service.list_calls(), 1);

    h.store.fetch(&key).await.expect("cached");
    assert_eq!(h.service.list_calls(), 1);

    h.store.invalidate(&key);
    h.store.fetch(&key).await.expect("refetch");
    assert_eq!(h.service.list_calls(), 2);
}

#[tokio::test]
async fn failed_read_is_not_cached() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.service.fail_lists(1);
    let key = ScopeKey::available("kid-a");

    let err = h.store.fetch(&key).await.expect_err("transport");
    assert!(matches!(err, Error::Transport(_)));
    assert!(h.store.cached(&key).is_none());

    let rows = h.store.fetch(&key).await.expect("retry");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn invalidated_fetch_result_is_discarded() {
    let h = Harness::new();
    h.seed("kid-a", 10).await;
    h.service.delay_lists(Duration::from_millis(50));
    let key = ScopeKey::available("kid-a");

    let store = h.store.clone();
    let task_key = key.clone();
    let pending = tokio::spawn(async move { store.fetch(&task_key).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.store.invalidate(&key);

    let rows = pending.await.expect("join").expect("caller still gets its rows");
    assert_eq!(rows.len(), 1);
    assert!(h.store.cached(&key).is_none());
    assert!(h.store.is_stale(&key));
}

#[tokio::test]
async fn unconfirmed_mutation_rolls_back() {
    let h = Harness::with_options(StoreOptions {
        stale_after: Duration::from_secs(30),
        confirm_timeout: Duration::from_millis(50),
    });
    let (_, row) = h.seed("kid-a", 10).await;
    h.dispatcher
        .dispatch(&row.id, Action::Assign, Payload::default())
        .await
        .expect("assign");

    let key = ScopeKey::assigned("kid-a");
    h.store.fetch(&key).await.expect("load assigned");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let watched = row.id.clone();
    let _subscription = h.store.subscribe(
        key.clone(),
        Arc::new(move |snapshot: &ScopeSnapshot| {
            if let Some(found) = snapshot.records.iter().find(|r| r.id == watched) {
                sink.lock().expect("seen").push(found.status);
            }
        }),
    );

    h.service.hang_transitions(true);
    let err = h
        .dispatcher
        .dispatch(&row.id, Action::Start, as_child())
        .await
        .expect_err("no acknowledgement");
    assert!(matches!(err, Error::Timeout(50)));

    let cached = h.store.cached(&key).expect("cached");
    assert_eq!(cached[0].status, Status::Assigned);
    assert_eq!(h.service.status_of(&row.id), Status::Assigned);

    let seen = seen.lock().expect("seen").clone();
    assert_eq!(seen.first(), Some(&Status::InProgress));
    assert!(seen.contains(&Status::Assigned));

    h.dispatcher.settle_background().await;
    assert!(!h.store.is_stale(&key));
}

#[tokio::test]
async fn rollback_survives_invalidation_while_unconfirmed() {
    let h = Harness::with_options(StoreOptions {
        stale_after: Duration::from_secs(30),
        confirm_timeout: Duration::from_millis(50),
    });
    let (_, row) = h.seed("kid-a", 10).await;
    h.dispatcher
        .dispatch(&row.id, Action::Assign, Payload::default())
        .await
        .expect("assign");
    let key = ScopeKey::assigned("kid-a");
    h.store.fetch(&key).await.expect("load assigned");

    h.service.hang_transitions(true);
    h.service.fail_lists(usize::MAX);

    // A sibling view invalidates and refetches while the start is pending.
    let sibling = {
        let store = h.store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.invalidate(&key);
            store.fetch(&key).await.is_err()
        })
    };

    let err = h
        .dispatcher
        .dispatch(&row.id, Action::Start, as_child())
        .await
        .expect_err("no acknowledgement");
    assert!(matches!(err, Error::Timeout(50)));
    assert!(sibling.await.expect("join"));
    h.dispatcher.settle_background().await;

    let cached = h.store.cached(&key).expect("cached");
    assert_eq!(cached[0].status, Status::Assigned);
    assert_eq!(h.service.status_of(&row.id), Status::Assigned);
}

#[tokio::test]
async fn rollback_yields_to_rows_fetched_after_the_patch() {
    let h = Harness::with_options(StoreOptions {
        stale_after: Duration::from_secs(30),
        confirm_timeout: Duration::from_millis(50),
    });
    let (_, row) = h.seed("kid-a", 10).await;
    h.dispatcher
        .dispatch(&row.id, Action::Assign, Payload::default())
        .await
        .expect("assign");
    let key = ScopeKey::assigned("kid-a");
    h.store.fetch(&key).await.expect("load assigned");

    h.service.hang_transitions(true);
    // Another device edits the row, then a sibling view refetches.
    let sibling = {
        let store = h.store.clone();
        let service = h.service.clone();
        let key = key.clone();
        let id = row.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let update = AssignmentUpdate {
                notes: Some("after dinner".to_string()),
                ..AssignmentUpdate::default()
            };
            service.update_assignment(&id, &update).await.expect("edit");
            store.invalidate(&key);
            store.fetch(&key).await.map(|rows| rows.len())
        })
    };

    h.dispatcher
        .dispatch(&row.id, Action::Start, as_child())
        .await
        .expect_err("no acknowledgement");
    assert_eq!(sibling.await.expect("join").expect("refetch"), 1);

    let cached = h.store.cached(&key).expect("cached");
    assert_eq!(cached[0].status, Status::Assigned);
    assert_eq!(cached[0].notes.as_deref(), Some("after dinner"));
}

#[tokio::test]
async fn unconfirmed_verify_is_a_settlement_failure() {
    let h = Harness::new();
    let (_, row) = h.seed("kid-a", 10).await;
    for (action, payload) in [
        (Action::Assign, Payload::default()),
        (Action::Start, as_child()),
        (Action::Submit, as_child()),
    ] {
        h.dispatcher
            .dispatch(&row.id, action, payload)
            .await
            .expect("advance");
    }

    h.service.fail_transitions(true);
    let err = h
        .dispatcher
        .dispatch(&row.id, Action::Verify, Payload::default())
        .await
        .expect_err("transport");
    assert!(matches!(err, Error::SettlementFailure { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.dispatcher.balances().get("kid-a"), 0);
    assert_eq!(h.service.status_of(&row.id), Status::NeedVerify);

    h.service.fail_transitions(false);
    let done = h
        .dispatcher
        .dispatch(&row.id, Action::Verify, Payload::default())
        .await
        .expect("user retries");
    assert_eq!(done.settlement.map(|s| s.coins), Some(10));
}

#[tokio::test]
async fn record_never_shows_in_library_and_assigned() {
    let h = Harness::new();
    let (_, row) = h.seed("kid-a", 10).await;
    let library = ScopeKey::available("kid-a");
    let assigned = ScopeKey::assigned("kid-a");

    assert_eq!(ids(&h.store.fetch(&library).await.expect("library")), vec![row.id.clone()]);
    assert!(h.store.fetch(&assigned).await.expect("assigned").is_empty());

    h.dispatcher
        .dispatch(&row.id, Action::Assign, Payload::default())
        .await
        .expect("assign");
    assert!(!ids(&h.store.cached(&library).unwrap_or_default()).contains(&row.id));
    assert!(h.store.is_stale(&library));
    assert!(h.store.is_stale(&assigned));

    let now_library = ids(&h.store.fetch(&library).await.expect("library"));
    let now_assigned = ids(&h.store.fetch(&assigned).await.expect("assigned"));
    assert!(!now_library.contains(&row.id));
    assert!(now_assigned.contains(&row.id));

    h.dispatcher
        .dispatch(&row.id, Action::Unassign, Payload::default())
        .await
        .expect("unassign");
    assert!(!ids(&h.store.cached(&assigned).unwrap_or_default()).contains(&row.id));

    let back_library = ids(&h.store.fetch(&library).await.expect("library"));
    let back_assigned = ids(&h.store.fetch(&assigned).await.expect("assigned"));
    assert!(back_library.contains(&row.id));
    assert!(!back_assigned.contains(&row.id));
}

#[tokio::test]
async fn adhoc_lands_in_assigned_scope() {
    let h = Harness::new();
    let assigned = ScopeKey::assigned("kid-b");
    assert!(h.store.fetch(&assigned).await.expect("empty").is_empty());

    let row = h
        .dispatcher
        .adhoc(
            "kid-b",
            &taskpool::model::TemplateFields::new(
                "Read a chapter",
                taskpool::model::Category::Academic,
                7,
            ),
            &taskpool::model::AssignmentFields::default(),
        )
        .await
        .expect("adhoc");
    assert_eq!(row.status, Status::Assigned);

    let rows = h.store.fetch(&assigned).await.expect("assigned");
    assert_eq!(ids(&rows), vec![row.id]);
    assert_eq!(h.service.list_templates().await.expect("templates").len(), 1);
}
