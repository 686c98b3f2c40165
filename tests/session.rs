mod common;

use std::sync::Arc;

use common::{identity, init_test_logging, task, wait_for, ManualProvider, ScriptedRepository};
use taskboard_lib::{AppStore, LoadMode, SessionBridge, SessionState, TaskStatus, User};

fn bridge(repo: &Arc<ScriptedRepository>, load_mode: LoadMode) -> Arc<SessionBridge> {
    let store = Arc::new(AppStore::new(repo.clone()));
    Arc::new(SessionBridge::new(store, load_mode))
}

#[tokio::test]
async fn sign_in_projects_the_user_and_loads_once() {
    init_test_logging();
    let repo = ScriptedRepository::with_tasks(vec![task("a", "A", TaskStatus::Waiting)]);
    let bridge = bridge(&repo, LoadMode::Fetch);
    let provider = ManualProvider::default();
    assert!(!bridge.is_ready());
    assert_eq!(bridge.state(), SessionState::Unknown);

    let _attached = bridge.attach(&provider);
    provider.fire(Some(identity("u1", "a@b.com")));
    let state = wait_for(bridge.store(), |s| s.user.is_some() && s.tasks.len() == 1).await;

    assert_eq!(
        state.user,
        Some(User {
            uid: "u1".to_string(),
            name: Some("a".to_string()),
            email: Some("a@b.com".to_string()),
        })
    );
    assert!(state.auth_checked);
    assert!(bridge.is_ready());
    assert_eq!(ScriptedRepository::count(&repo.fetch_calls), 1);

    // The provider repeats itself for the same session; events are handled in order, so once
    // the sign-out lands the repeat has been processed too.
    provider.fire(Some(identity("u1", "a@b.com")));
    provider.fire(None);
    wait_for(bridge.store(), |s| s.user.is_none()).await;

    assert_eq!(ScriptedRepository::count(&repo.fetch_calls), 1);
    assert_eq!(ScriptedRepository::count(&repo.subscribe_calls), 0);
    assert_eq!(bridge.state(), SessionState::Anonymous);
}

#[tokio::test]
async fn readiness_is_set_by_the_first_event_and_never_reset() {
    init_test_logging();
    let repo = ScriptedRepository::with_tasks(Vec::new());
    let bridge = bridge(&repo, LoadMode::Fetch);

    bridge.handle_event(None).await;
    assert!(bridge.is_ready());
    assert_eq!(bridge.state(), SessionState::Anonymous);

    bridge.handle_event(Some(identity("u1", "a@b.com"))).await;
    bridge.handle_event(None).await;
    assert!(bridge.is_ready());
    assert_eq!(ScriptedRepository::count(&repo.fetch_calls), 1);
}

#[tokio::test]
async fn subscribe_mode_never_double_subscribes() {
    init_test_logging();
    let repo = ScriptedRepository::with_tasks(Vec::new());
    let bridge = bridge(&repo, LoadMode::Subscribe);

    bridge.handle_event(Some(identity("u1", "a@b.com"))).await;
    bridge.handle_event(Some(identity("u1", "a@b.com"))).await;
    assert_eq!(ScriptedRepository::count(&repo.subscribe_calls), 1);
    assert_eq!(ScriptedRepository::count(&repo.fetch_calls), 0);

    repo.push(vec![task("a", "A", TaskStatus::Waiting)]);
    assert_eq!(bridge.store().snapshot().tasks.len(), 1);

    let feed = repo.take_feed().unwrap();
    bridge.handle_event(None).await;
    assert!(feed.await.unwrap_err().is_cancelled());

    let state = bridge.store().snapshot();
    assert!(state.user.is_none());
    assert!(state.tasks.is_empty());
}

#[tokio::test]
async fn switching_users_starts_a_fresh_load() {
    init_test_logging();
    let repo = ScriptedRepository::with_tasks(vec![task("a", "A", TaskStatus::Waiting)]);
    let bridge = bridge(&repo, LoadMode::Subscribe);

    bridge.handle_event(Some(identity("u1", "a@b.com"))).await;
    let first_feed = repo.take_feed().unwrap();
    repo.push(vec![task("a", "A", TaskStatus::Waiting)]);

    let mut other = identity("u2", "c@d.com");
    other.display_name = Some("  Cee ".to_string());
    bridge.handle_event(Some(other)).await;

    assert!(first_feed.await.unwrap_err().is_cancelled());
    assert_eq!(ScriptedRepository::count(&repo.subscribe_calls), 2);
    let state = bridge.store().snapshot();
    assert!(state.tasks.is_empty());
    assert_eq!(state.user.unwrap().name.as_deref(), Some("Cee"));
}

#[tokio::test]
async fn sign_out_goes_through_the_provider() {
    init_test_logging();
    let repo = ScriptedRepository::with_tasks(vec![task("a", "A", TaskStatus::Waiting)]);
    let bridge = bridge(&repo, LoadMode::Fetch);
    let provider = ManualProvider::default();

    bridge.handle_event(Some(identity("u1", "a@b.com"))).await;
    assert_eq!(bridge.store().snapshot().tasks.len(), 1);

    bridge.sign_out(&provider).await;
    assert_eq!(
        provider.sign_outs.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    let state = bridge.store().snapshot();
    assert!(state.user.is_none());
    assert!(state.tasks.is_empty());
    assert!(state.auth_checked);
}
