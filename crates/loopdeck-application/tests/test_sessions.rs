mod common;

use common::{FlakyStorage, Harness, local};
use loopdeck_core::config::{DEFAULT_STARTER_CODE, LoopdeckConfig};
use loopdeck_core::engine::ContainerHandle;
use loopdeck_core::repl::{AuthState, ReplStorage};
use loopdeck_infrastructure::{InMemoryAccountGraph, LocalBackend, SyncedBackend};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const PAST_DELAY: Duration = Duration::from_millis(1100);

async fn stored_code(storage: &dyn ReplStorage, id: &str) -> String {
    storage.get_repl(id).await.unwrap().unwrap().code
}

async fn synced() -> Arc<SyncedBackend> {
    let graph = Arc::new(InMemoryAccountGraph::new());
    let local = Arc::new(LocalBackend::in_memory(LoopdeckConfig::default()));
    let backend = SyncedBackend::new(graph, local, AuthState::signed_in("user-7")).unwrap();
    backend.sync().await.unwrap();
    Arc::new(backend)
}

#[tokio::test]
async fn test_fresh_user_gets_starter_repl() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    assert_eq!(sessions.initialize_repl().await.unwrap(), None);
    let id = sessions.create_new_repl(None).await.unwrap();

    assert_eq!(sessions.current_repl_id().as_deref(), Some(id.as_str()));
    assert_eq!(stored_code(storage.as_ref(), &id).await, DEFAULT_STARTER_CODE);
    assert_eq!(
        storage.get_active_repl_id().await.unwrap().as_deref(),
        Some(id.as_str())
    );
    assert_eq!(harness.lifecycle.get_code(), DEFAULT_STARTER_CODE);
}

#[tokio::test(start_paused = true)]
async fn test_switch_saves_outgoing_code_first() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    let a = sessions.create_new_repl(Some("s(\"a1\")")).await.unwrap();
    harness.lifecycle.set_code("s(\"a2\")");
    assert!(sessions.autosaver().has_pending());

    let b = storage.create_repl("s(\"b1\")", None).await.unwrap();
    sessions.set_repl_id(&b).await.unwrap();

    assert_eq!(stored_code(storage.as_ref(), &a).await, "s(\"a2\")");
    assert_eq!(harness.lifecycle.get_code(), "s(\"b1\")");
    assert!(!sessions.autosaver().has_pending());

    tokio::time::sleep(PAST_DELAY * 2).await;
    assert_eq!(stored_code(storage.as_ref(), &b).await, "s(\"b1\")");
    assert_eq!(stored_code(storage.as_ref(), &a).await, "s(\"a2\")");
}

#[tokio::test]
async fn test_initialize_prefers_edited_active_pointer() {
    let harness = Harness::ready().await;
    let storage = local();
    storage.save_repl("old", "s(\"old\")", None).await.unwrap();
    storage.save_repl("new", "s(\"new\")", None).await.unwrap();
    storage.set_active_repl_id("old").await.unwrap();

    let sessions = harness.sessions(storage.clone());
    assert_eq!(
        sessions.initialize_repl().await.unwrap().as_deref(),
        Some("old")
    );
    assert_eq!(harness.lifecycle.get_code(), "s(\"old\")");
}

#[tokio::test]
async fn test_initialize_skips_untouched_pointer() {
    let harness = Harness::ready().await;
    let storage = local();
    storage.save_repl("edited", "s(\"hh\")", None).await.unwrap();
    storage
        .save_repl("fresh", DEFAULT_STARTER_CODE, None)
        .await
        .unwrap();
    storage.set_active_repl_id("fresh").await.unwrap();

    let sessions = harness.sessions(storage.clone());
    assert_eq!(
        sessions.initialize_repl().await.unwrap().as_deref(),
        Some("edited")
    );
}

#[tokio::test]
async fn test_initialize_falls_back_to_most_recent() {
    let harness = Harness::ready().await;
    let storage = local();
    storage
        .save_repl("first", DEFAULT_STARTER_CODE, None)
        .await
        .unwrap();
    storage
        .save_repl("second", DEFAULT_STARTER_CODE, None)
        .await
        .unwrap();

    let sessions = harness.sessions(storage.clone());
    assert_eq!(
        sessions.initialize_repl().await.unwrap().as_deref(),
        Some("second")
    );
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let harness = Harness::ready().await;
    let storage = local();
    storage.save_repl("a", "s(\"a\")", None).await.unwrap();

    let sessions = harness.sessions(storage.clone());
    assert_eq!(sessions.initialize_repl().await.unwrap().as_deref(), Some("a"));

    storage.save_repl("b", "s(\"b\")", None).await.unwrap();
    storage.set_active_repl_id("b").await.unwrap();
    assert_eq!(sessions.initialize_repl().await.unwrap().as_deref(), Some("a"));
    assert_eq!(harness.lifecycle.get_code(), "s(\"a\")");
}

#[tokio::test]
async fn test_load_waits_for_engine() {
    let harness = Harness::new();
    let storage = local();
    storage.save_repl("a", "s(\"a\")", None).await.unwrap();

    let sessions = harness.sessions(storage.clone());
    sessions.initialize_repl().await.unwrap();
    assert_eq!(harness.lifecycle.get_code(), DEFAULT_STARTER_CODE);

    harness.lifecycle.init().await.unwrap();
    sessions.sync_engine().await;
    assert_eq!(harness.lifecycle.get_code(), "s(\"a\")");
}

#[tokio::test]
async fn test_thread_is_attached_at_most_once() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    let a = sessions.create_new_repl(None).await.unwrap();
    sessions.set_thread_id(Some("t1")).await.unwrap();
    assert_eq!(
        storage.get_thread_repl_id("t1").await.unwrap().as_deref(),
        Some(a.as_str())
    );
    assert!(!sessions.is_thread_on_different_repl("t1").await.unwrap());

    let b = sessions.create_new_repl(None).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(
        storage.get_thread_repl_id("t1").await.unwrap().as_deref(),
        Some(a.as_str())
    );
    assert!(sessions.is_thread_on_different_repl("t1").await.unwrap());
    assert_eq!(
        sessions.thread_for_repl(&a).await.unwrap().as_deref(),
        Some("t1")
    );
    assert_eq!(sessions.thread_for_repl(&b).await.unwrap(), None);
}

#[tokio::test]
async fn test_new_repl_takes_unbound_thread() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    sessions.set_thread_id(Some("t9")).await.unwrap();
    let id = sessions.create_new_repl(None).await.unwrap();

    assert_eq!(
        storage.get_thread_repl_id("t9").await.unwrap().as_deref(),
        Some(id.as_str())
    );
}

#[tokio::test]
async fn test_placeholder_thread_is_not_attached() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    sessions.create_new_repl(None).await.unwrap();
    sessions.set_thread_id(Some("__LOCALID_abc")).await.unwrap();

    assert_eq!(storage.get_thread_repl_id("__LOCALID_abc").await.unwrap(), None);
    assert_eq!(sessions.current_thread_id().as_deref(), Some("__LOCALID_abc"));
}

#[tokio::test]
async fn test_revisiting_thread_restores_archived_repl() {
    let harness = Harness::ready().await;
    let storage = synced().await;
    let sessions = harness.sessions(storage.clone());

    let a = sessions.create_new_repl(Some("s(\"a\")")).await.unwrap();
    sessions.set_thread_id(Some("t1")).await.unwrap();
    let b = sessions.create_new_repl(Some("s(\"b\")")).await.unwrap();
    sessions.archive_repl(&a).await.unwrap();

    let listed: Vec<String> = sessions
        .list_repls()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, vec![b.clone()]);

    sessions.set_thread_id(None).await.unwrap();
    sessions.set_thread_id(Some("t1")).await.unwrap();

    assert_eq!(sessions.current_repl_id().as_deref(), Some(a.as_str()));
    assert!(!storage.get_repl(&a).await.unwrap().unwrap().archived);
    assert_eq!(harness.lifecycle.get_code(), "s(\"a\")");
    assert_eq!(sessions.list_repls().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_deleting_current_repl_clears_selection() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    let keep = sessions.create_new_repl(Some("s(\"keep\")")).await.unwrap();
    let doomed = sessions.create_new_repl(Some("s(\"doomed\")")).await.unwrap();
    sessions.delete_repl(&doomed).await.unwrap();

    assert_eq!(sessions.current_repl_id(), None);
    assert_eq!(storage.get_repl(&doomed).await.unwrap(), None);

    sessions.set_repl_id(&keep).await.unwrap();
    assert_eq!(harness.lifecycle.get_code(), "s(\"keep\")");
}

#[tokio::test]
async fn test_deleting_other_repl_keeps_selection() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    let other = sessions.create_new_repl(None).await.unwrap();
    let current = sessions.create_new_repl(None).await.unwrap();
    sessions.delete_repl(&other).await.unwrap();

    assert_eq!(sessions.current_repl_id().as_deref(), Some(current.as_str()));
}

#[tokio::test]
async fn test_rename_keeps_live_code() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());

    let id = sessions.create_new_repl(Some("s(\"v1\")")).await.unwrap();
    harness.lifecycle.set_code("s(\"v2\")");
    sessions.rename_repl(&id, "groove").await.unwrap();

    let repl = storage.get_repl(&id).await.unwrap().unwrap();
    assert_eq!(repl.name.as_deref(), Some("groove"));
    assert_eq!(repl.code, "s(\"v2\")");

    let err = sessions.rename_repl("nope", "x").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_autosave_after_quiet_period() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    let id = sessions.create_new_repl(Some("s(\"x0\")")).await.unwrap();
    harness.lifecycle.set_code("s(\"x1\")");
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.lifecycle.set_code("s(\"x2\")");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(stored_code(storage.as_ref(), &id).await, "s(\"x0\")");

    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(stored_code(storage.as_ref(), &id).await, "s(\"x2\")");
    assert!(!sessions.autosaver().has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_loading_a_repl_does_not_autosave() {
    let harness = Harness::ready().await;
    let inner = local();
    inner.save_repl("a", "s(\"a\")", None).await.unwrap();
    inner.save_repl("b", "s(\"b\")", None).await.unwrap();
    let storage = Arc::new(FlakyStorage::new(inner, 0));
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    sessions.set_repl_id("a").await.unwrap();
    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(storage.attempts.load(Ordering::SeqCst), 0);

    // Only the explicit save of the outgoing REPL.
    sessions.set_repl_id("b").await.unwrap();
    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(storage.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_autosave_is_retried() {
    let harness = Harness::ready().await;
    let inner = local();
    inner.save_repl("r1", "s(\"start\")", None).await.unwrap();
    let storage = Arc::new(FlakyStorage::new(inner.clone(), 2));
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    sessions.set_repl_id("r1").await.unwrap();
    harness.lifecycle.set_code("s(\"edit\")");

    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(storage.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(stored_code(inner.as_ref(), "r1").await, "s(\"start\")");

    tokio::time::sleep(PAST_DELAY * 2).await;
    assert_eq!(storage.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(stored_code(inner.as_ref(), "r1").await, "s(\"edit\")");
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_autosave_stops_saving() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());
    let autosave = sessions.start_autosave();

    let id = sessions.create_new_repl(Some("s(\"x0\")")).await.unwrap();
    autosave.unsubscribe();
    harness.lifecycle.set_code("s(\"x1\")");
    tokio::time::sleep(PAST_DELAY).await;

    assert_eq!(stored_code(storage.as_ref(), &id).await, "s(\"x0\")");
}

#[tokio::test(start_paused = true)]
async fn test_edit_before_deferred_load_is_not_saved_into_new_repl() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    let a = sessions.create_new_repl(Some("s(\"a\")")).await.unwrap();
    let b = storage.create_repl("s(\"b\")", None).await.unwrap();

    harness.lifecycle.detach().await;
    sessions.set_repl_id(&b).await.unwrap();
    harness
        .lifecycle
        .attach(ContainerHandle::new("main"))
        .await
        .unwrap();

    // The engine still shows the outgoing REPL's code.
    assert_eq!(harness.lifecycle.get_code(), "s(\"a\")");
    harness.lifecycle.handle_editor_change("s(\"a\").fast(2)");
    tokio::time::sleep(PAST_DELAY).await;

    assert_eq!(stored_code(storage.as_ref(), &b).await, "s(\"b\")");
    assert_eq!(stored_code(storage.as_ref(), &a).await, "s(\"a\")");

    sessions.sync_engine().await;
    assert_eq!(harness.lifecycle.get_code(), "s(\"b\")");

    harness.lifecycle.handle_editor_change("s(\"b\").slow(2)");
    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(stored_code(storage.as_ref(), &b).await, "s(\"b\").slow(2)");
}

#[tokio::test(start_paused = true)]
async fn test_switch_drops_pending_save_of_outgoing_edit() {
    let harness = Harness::new();
    let storage = local();
    storage.save_repl("a", "s(\"a\")", None).await.unwrap();
    storage.save_repl("b", "s(\"b\")", None).await.unwrap();
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    // Engine not ready: selection happens, loads are deferred.
    sessions.set_repl_id("a").await.unwrap();
    harness.lifecycle.handle_editor_change("s(\"typed\")");
    sessions.set_repl_id("b").await.unwrap();
    assert!(!sessions.autosaver().has_pending());

    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(stored_code(storage.as_ref(), "a").await, "s(\"a\")");
    assert_eq!(stored_code(storage.as_ref(), "b").await, "s(\"b\")");
}

#[tokio::test(start_paused = true)]
async fn test_reset_does_not_overwrite_saved_repl() {
    let harness = Harness::ready().await;
    let storage = local();
    let sessions = harness.sessions(storage.clone());
    let _autosave = sessions.start_autosave();

    let id = sessions.create_new_repl(Some("s(\"song\")")).await.unwrap();
    harness.lifecycle.reset().await;
    assert_eq!(harness.lifecycle.get_code(), DEFAULT_STARTER_CODE);
    assert!(!sessions.autosaver().has_pending());

    tokio::time::sleep(PAST_DELAY).await;
    assert_eq!(stored_code(storage.as_ref(), &id).await, "s(\"song\")");
}
