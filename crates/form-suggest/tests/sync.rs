use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::sleep;

use form_spec::{FieldEvent, FieldStore, Origin};
use form_suggest::{
    CategorySpec, FnSource, SharedStore, SuggestionFetchError, SuggestionSource,
    SuggestionSynchronizer, SuggestionTarget, SyncConfig, SyncError, SyncEvent,
};

fn shared_store() -> SharedStore {
    let mut store = FieldStore::new();
    for name in ["industry", "company_size", "department"] {
        store.declare(name, Value::Null);
    }
    Arc::new(Mutex::new(store))
}

fn set_user(store: &SharedStore, field: &str, value: Value) {
    store
        .lock()
        .expect("lock")
        .set(field, value, Origin::User)
        .expect("set");
}

fn value(store: &SharedStore, field: &str) -> Value {
    store
        .lock()
        .expect("lock")
        .get(field)
        .cloned()
        .unwrap_or(Value::Null)
}

fn delayed(ms: u64, payload: Value) -> Arc<dyn SuggestionSource> {
    Arc::new(FnSource::new(move |_request| {
        let payload = payload.clone();
        async move {
            sleep(Duration::from_millis(ms)).await;
            Ok::<_, SuggestionFetchError>(payload)
        }
        .boxed()
    }))
}

fn department_category(name: &str, drivers: &[&str]) -> CategorySpec {
    CategorySpec::new(
        name,
        drivers.iter().copied(),
        [SuggestionTarget::new("department")],
    )
}

fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn debounce_restarts_on_every_driver_change() {
    let store = shared_store();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        Arc::new(FnSource::new(move |request| {
            counter.fetch_add(1, Ordering::SeqCst);
            let industry = request.driver_str("industry").unwrap_or_default().to_string();
            async move {
                Ok::<_, SuggestionFetchError>(json!({ "department": format!("{industry} Security") }))
            }
            .boxed()
        })),
    )
    .expect("register");

    set_user(&store, "industry", json!("Tech"));
    assert_eq!(sync.notify_change("industry"), 1);
    sleep(Duration::from_millis(300)).await;
    set_user(&store, "industry", json!("Technology"));
    assert_eq!(sync.notify_change("industry"), 1);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sync.stats().issued, 0);

    sleep(Duration::from_millis(250)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(value(&store, "department"), json!("Technology Security"));
    assert_eq!(sync.stats().issued, 1);
    assert_eq!(sync.generation("departments"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn unrelated_fields_do_not_schedule_requests() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        delayed(0, json!({ "department": "Security" })),
    )
    .expect("register");

    assert_eq!(sync.notify_change("company_size"), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(sync.stats().issued, 0);
    assert_eq!(value(&store, "department"), Value::Null);
}

#[tokio::test(start_paused = true)]
async fn older_generation_is_discarded_when_it_resolves_last() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        Arc::new(FnSource::new(|request| {
            let delay = if request.generation == 1 { 100 } else { 10 };
            let label = format!("generation {}", request.generation);
            async move {
                sleep(Duration::from_millis(delay)).await;
                Ok::<_, SuggestionFetchError>(json!({ "department": label }))
            }
            .boxed()
        })),
    )
    .expect("register");
    let mut events = sync.subscribe();

    assert_eq!(sync.refresh("departments"), Ok(1));
    assert_eq!(sync.refresh("departments"), Ok(2));
    sleep(Duration::from_millis(200)).await;

    assert_eq!(value(&store, "department"), json!("generation 2"));
    let stats = sync.stats();
    assert_eq!(stats.issued, 2);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.stale_discarded, 1);
    assert_eq!(stats.cancelled, 1);

    let events = drain(&mut events);
    assert!(events.contains(&SyncEvent::StaleDiscarded {
        category: "departments".into(),
        generation: 1,
        current: 2,
    }));
}

#[tokio::test(start_paused = true)]
async fn cooperative_sources_stop_when_superseded() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        Arc::new(FnSource::new(|request| {
            async move {
                tokio::select! {
                    _ = request.cancel.cancelled() => Err(SuggestionFetchError::Cancelled),
                    _ = sleep(Duration::from_millis(50)) => {
                        Ok(json!({ "department": format!("generation {}", request.generation) }))
                    }
                }
            }
            .boxed()
        })),
    )
    .expect("register");

    sync.refresh("departments").expect("first");
    sleep(Duration::from_millis(10)).await;
    sync.refresh("departments").expect("second");
    sleep(Duration::from_millis(100)).await;

    assert_eq!(value(&store, "department"), json!("generation 2"));
    let stats = sync.stats();
    assert_eq!(stats.stale_discarded, 1);
    assert_eq!(stats.fetch_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_edit_during_fetch_wins() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        delayed(200, json!({ "department": ["SOC 2 Team", "Security"] })),
    )
    .expect("register");

    let discards = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&discards);
    store.lock().expect("lock").subscribe("department", move |event| {
        if matches!(event, FieldEvent::WriteDiscarded { .. }) {
            sink.lock().expect("lock").push(event.clone());
        }
    });

    set_user(&store, "industry", json!("Technology"));
    sync.notify_change("industry");
    sleep(Duration::from_millis(600)).await;
    assert_eq!(sync.stats().issued, 1);

    set_user(&store, "department", json!("Custom Team"));
    sleep(Duration::from_millis(200)).await;

    assert_eq!(value(&store, "department"), json!("Custom Team"));
    assert_eq!(discards.lock().expect("lock").len(), 1);
    let stats = sync.stats();
    assert_eq!(stats.manual_override_drops, 1);
    assert_eq!(stats.applied, 0);
}

#[tokio::test(start_paused = true)]
async fn slower_heuristic_cannot_overwrite_insights() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("heuristic", &["industry"]).with_priority(1),
        delayed(80, json!({ "department": "Security" })),
    )
    .expect("register heuristic");
    sync.register(
        department_category("insights", &["industry", "company_size"]).with_priority(2),
        delayed(10, json!({ "department": "Engineering" })),
    )
    .expect("register insights");

    sync.refresh("heuristic").expect("heuristic");
    sleep(Duration::from_millis(50)).await;
    sync.refresh("insights").expect("insights");

    sleep(Duration::from_millis(15)).await;
    assert_eq!(value(&store, "department"), json!("Engineering"));

    sleep(Duration::from_millis(35)).await;
    assert_eq!(value(&store, "department"), json!("Engineering"));
    let stats = sync.stats();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.superseded_drops, 1);
}

#[tokio::test(start_paused = true)]
async fn earlier_higher_priority_result_beats_later_lower_priority_one() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("insights", &["industry", "company_size"]),
        delayed(100, json!({ "department": "Engineering" })),
    )
    .expect("register insights");
    sync.register(
        department_category("heuristic", &["industry"]),
        delayed(10, json!({ "department": "Security" })),
    )
    .expect("register heuristic");

    sync.refresh("insights").expect("insights");
    sync.refresh("heuristic").expect("heuristic");

    sleep(Duration::from_millis(20)).await;
    assert_eq!(value(&store, "department"), json!("Security"));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(value(&store, "department"), json!("Engineering"));
}

#[tokio::test(start_paused = true)]
async fn fetch_failures_are_swallowed() {
    let store = shared_store();
    store
        .lock()
        .expect("lock")
        .set("department", json!("Legal"), Origin::Engine)
        .expect("seed");
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        Arc::new(FnSource::new(|_request| {
            async { Err::<Value, _>(SuggestionFetchError::Unavailable("timeout".into())) }.boxed()
        })),
    )
    .expect("register");
    let mut events = sync.subscribe();

    sync.refresh("departments").expect("issue");
    sleep(Duration::from_millis(10)).await;

    assert_eq!(value(&store, "department"), json!("Legal"));
    assert_eq!(sync.stats().fetch_failures, 1);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::FetchFailed { category, .. } if category == "departments"
    )));
}

#[tokio::test(start_paused = true)]
async fn nothing_is_written_after_shutdown() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        delayed(100, json!({ "department": "Security" })),
    )
    .expect("register");

    sync.refresh("departments").expect("issue");
    set_user(&store, "industry", json!("Technology"));
    sync.notify_change("industry");
    sleep(Duration::from_millis(10)).await;
    sync.shutdown();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(value(&store, "department"), Value::Null);
    let stats = sync.stats();
    assert_eq!(stats.issued, 1);
    assert_eq!(stats.applied, 0);
    assert!(!sync.is_alive());
    assert_eq!(sync.refresh("departments"), Err(SyncError::ShutDown));
    assert_eq!(sync.notify_change("industry"), 0);
}

#[tokio::test]
async fn registration_checks_fields_and_names() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");

    let err = sync
        .register(
            department_category("departments", &["sector"]),
            delayed(0, json!({})),
        )
        .expect_err("unknown driver");
    assert_eq!(
        err,
        SyncError::UnknownField {
            category: "departments".into(),
            field: "sector".into(),
        }
    );

    sync.register(
        department_category("departments", &["industry"]),
        delayed(0, json!({})),
    )
    .expect("register");
    let err = sync
        .register(
            department_category("departments", &["industry"]),
            delayed(0, json!({})),
        )
        .expect_err("duplicate");
    assert_eq!(err, SyncError::DuplicateCategory("departments".into()));
    assert_eq!(
        sync.refresh("frameworks"),
        Err(SyncError::UnknownCategory("frameworks".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_all_issues_every_category_with_driver_snapshot() {
    let store = shared_store();
    set_user(&store, "industry", json!("Healthcare"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        Arc::new(FnSource::new(move |request| {
            sink.lock().expect("lock").push(request.drivers.clone());
            async { Ok::<_, SuggestionFetchError>(json!({ "department": "Compliance" })) }.boxed()
        })),
    )
    .expect("register");
    sync.register(
        department_category("insights", &["industry", "company_size"]),
        delayed(0, json!({})),
    )
    .expect("register");

    let issued = sync.refresh_all().expect("refresh");
    assert_eq!(issued.len(), 2);
    sleep(Duration::from_millis(1)).await;

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("industry"), Some(&json!("Healthcare")));
    assert_eq!(value(&store, "department"), json!("Compliance"));
}

#[tokio::test(start_paused = true)]
async fn applied_suggestions_drive_chained_categories() {
    let mut fields = FieldStore::new();
    for name in ["industry", "department", "framework"] {
        fields.declare(name, Value::Null);
    }
    let store: SharedStore = Arc::new(Mutex::new(fields));
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        department_category("departments", &["industry"]),
        delayed(0, json!({ "department": "Security" })),
    )
    .expect("register");
    sync.register(
        CategorySpec::new(
            "frameworks",
            ["department"],
            [SuggestionTarget::new("framework")],
        ),
        Arc::new(FnSource::new(|request| {
            let team = request.driver_str("department").unwrap_or_default().to_string();
            async move {
                Ok::<_, SuggestionFetchError>(json!({ "framework": format!("{team} baseline") }))
            }
            .boxed()
        })),
    )
    .expect("register");

    set_user(&store, "industry", json!("Technology"));
    sync.notify_change("industry");
    sleep(Duration::from_millis(600)).await;
    assert_eq!(value(&store, "department"), json!("Security"));
    assert_eq!(value(&store, "framework"), Value::Null);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(value(&store, "framework"), json!("Security baseline"));
    assert_eq!(sync.generation("frameworks"), Some(1));
    assert_eq!(sync.stats().issued, 2);

    // Same suggestion again: nothing changes, so nothing downstream is re-issued.
    sync.refresh("departments").expect("refresh");
    sleep(Duration::from_secs(2)).await;
    assert_eq!(sync.generation("frameworks"), Some(1));
    assert_eq!(sync.stats().issued, 3);
}

#[tokio::test(start_paused = true)]
async fn category_writing_its_own_driver_does_not_retrigger_itself() {
    let store = shared_store();
    let sync = SuggestionSynchronizer::new(Arc::clone(&store), SyncConfig::default())
        .expect("synchronizer");
    sync.register(
        CategorySpec::new(
            "canonical_industry",
            ["industry"],
            [SuggestionTarget::new("industry")],
        ),
        delayed(0, json!({ "industry": "Technology" })),
    )
    .expect("register");

    set_user(&store, "industry", json!("tech"));
    store.lock().expect("lock").reset("industry").expect("reset");
    sync.notify_change("industry");
    sleep(Duration::from_secs(3)).await;

    assert_eq!(value(&store, "industry"), json!("Technology"));
    assert_eq!(sync.stats().issued, 1);
}

#[test]
fn synchronizer_needs_a_runtime() {
    let err = SuggestionSynchronizer::new(shared_store(), SyncConfig::default())
        .expect_err("no runtime");
    assert_eq!(err, SyncError::NoRuntime);
}

#[test]
fn targets_and_priorities() {
    let payload = json!({
        "department": "Security",
        "insights": { "suggested_departments": ["Legal"] }
    });
    assert_eq!(
        SuggestionTarget::new("department").extract(&payload),
        Some(json!("Security"))
    );
    assert_eq!(
        SuggestionTarget::at("departments", "insights.suggested_departments").extract(&payload),
        Some(json!(["Legal"]))
    );
    assert_eq!(
        SuggestionTarget::at("raw", "").extract(&payload),
        Some(payload.clone())
    );
    assert_eq!(SuggestionTarget::new("missing").extract(&payload), None);

    let category = CategorySpec::new("insights", ["industry", "company_size"], Vec::new());
    assert_eq!(category.priority(), 2);
    assert_eq!(category.with_priority(7).priority(), 7);
}
