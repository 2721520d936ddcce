//! Session controller lifecycle: idempotent starts, liveness-probe
//! recovery, forced reset, and close-driven slot clearing, all against a
//! scripted in-process host.

mod common;

use common::Host;

use bext::{AttachAllOptions, SessionEvent, SessionMode, StartOptions};
use std::time::Duration;

/// Polls until `get(mode)` reports an empty slot.
async fn wait_for_empty_slot(controller: &bext::SessionController, mode: SessionMode) {
    for _ in 0..200 {
        if controller.get(mode).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("slot for {mode} never emptied");
}

#[tokio::test]
async fn concurrent_starts_share_one_session() {
    let (controller, host) = Host::connect_gated().await;

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(StartOptions::new()).await })
    };
    let second = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(StartOptions::new()).await })
    };

    // Both callers must have reached the slot before the host answers.
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.release_starts();

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();

    assert_eq!(a.guid(), b.guid());
    assert_eq!(host.start_count(), 1, "second caller must share the slot");
}

#[tokio::test]
async fn repeated_start_probes_and_returns_cached_session() {
    let (controller, host) = Host::connect().await;

    let a = controller.start(StartOptions::new()).await.unwrap();
    let b = controller.start(StartOptions::new()).await.unwrap();

    assert_eq!(a.guid(), b.guid());
    assert_eq!(host.start_count(), 1);
    // The second call went through the liveness probe, not a new start.
    assert!(!host.calls_for("pages").is_empty());
}

#[tokio::test]
async fn stale_session_is_replaced_transparently() {
    let (controller, host) = Host::connect().await;

    let stale = controller.start(StartOptions::new()).await.unwrap();
    host.mark_dead(stale.guid());

    let fresh = controller.start(StartOptions::new()).await.unwrap();

    assert_ne!(stale.guid(), fresh.guid());
    assert_eq!(host.start_count(), 2);
    // The reset tried to close the stale session; its failure was swallowed.
    assert!(host.saw_call(stale.guid(), "close"));
}

#[tokio::test]
async fn start_failure_propagates_and_clears_slot() {
    let (controller, host) = Host::connect().await;

    host.fail_next_start("BootError", "no window available");

    let err = controller.start(StartOptions::new()).await.unwrap_err();
    assert_eq!(err.error_name(), Some("BootError"));

    // The failed start left the slot empty: both for get()...
    assert!(controller.get(SessionMode::Normal).await.is_none());
    // ...and for the next start, which succeeds normally.
    let session = controller.start(StartOptions::new()).await.unwrap();
    assert_eq!(session.guid(), "session@1");
}

#[tokio::test]
async fn recovery_retry_failure_is_terminal() {
    let (controller, host) = Host::connect().await;

    let stale = controller.start(StartOptions::new()).await.unwrap();
    host.mark_dead(stale.guid());
    host.fail_next_start("BootError", "still broken");

    // The staleness is masked; the retry's own failure is what surfaces.
    let err = controller.start(StartOptions::new()).await.unwrap_err();
    assert_eq!(err.error_name(), Some("BootError"));
    assert_eq!(host.start_count(), 2, "exactly one retry per start call");
}

#[tokio::test]
async fn force_reset_closes_held_sessions_and_empties_slots() {
    let (controller, host) = Host::connect().await;

    let normal = controller.start(StartOptions::new()).await.unwrap();
    let incognito = controller
        .start(StartOptions::new().incognito(true))
        .await
        .unwrap();

    controller.force_reset().await;

    assert!(controller.get(SessionMode::Normal).await.is_none());
    assert!(controller.get(SessionMode::Incognito).await.is_none());
    assert!(host.saw_call(normal.guid(), "close"));
    assert!(host.saw_call(incognito.guid(), "close"));

    // A start after the reset never returns a pre-reset session.
    let fresh = controller.start(StartOptions::new()).await.unwrap();
    assert_ne!(fresh.guid(), normal.guid());
}

#[tokio::test]
async fn force_reset_is_safe_with_no_sessions() {
    let (controller, _host) = Host::connect().await;
    controller.force_reset().await;
    assert!(controller.get(SessionMode::Normal).await.is_none());
}

#[tokio::test]
async fn force_reset_closes_orphaned_inflight_start() {
    let (controller, host) = Host::connect_gated().await;

    let starter = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(StartOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Reset while the start is still in flight: the slot is discarded,
    // not the remote operation.
    let reset = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.force_reset().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.release_starts();

    // The original caller still gets its session...
    let orphan = starter.await.unwrap().unwrap();
    reset.await.unwrap();

    // ...but the controller no longer holds it, and the reset closed it.
    assert!(controller.get(SessionMode::Normal).await.is_none());
    assert!(host.saw_call(orphan.guid(), "close"));
}

#[tokio::test]
async fn session_close_clears_its_slot_only() {
    let (controller, _host) = Host::connect().await;

    let normal = controller.start(StartOptions::new()).await.unwrap();
    let incognito = controller
        .start(StartOptions::new().incognito(true))
        .await
        .unwrap();
    assert_ne!(normal.guid(), incognito.guid());

    let got_normal = controller.get(SessionMode::Normal).await.unwrap();
    let got_incognito = controller.get(SessionMode::Incognito).await.unwrap();
    assert_eq!(got_normal.guid(), normal.guid());
    assert_eq!(got_incognito.guid(), incognito.guid());

    incognito.close().await.unwrap();

    // The close notification empties the slot without caller action.
    wait_for_empty_slot(&controller, SessionMode::Incognito).await;
    let survivor = controller.get(SessionMode::Normal).await.unwrap();
    assert_eq!(survivor.guid(), normal.guid());
}

#[tokio::test]
async fn closed_session_emits_closed_event() {
    let (controller, _host) = Host::connect().await;

    let session = controller.start(StartOptions::new()).await.unwrap();
    let mut events = session.events();
    let closed = session.closed();

    session.close().await.unwrap();

    match events.recv().await {
        Some(SessionEvent::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(matches!(closed.wait().await, Ok(SessionEvent::Closed)));
}

#[tokio::test]
async fn get_is_absent_before_any_start() {
    let (controller, _host) = Host::connect().await;
    assert!(controller.get(SessionMode::Normal).await.is_none());
    assert!(controller.get(SessionMode::Incognito).await.is_none());
}

#[tokio::test]
async fn attach_all_normalizes_single_url_to_list() {
    let (controller, host) = Host::connect().await;
    let session = controller.start(StartOptions::new()).await.unwrap();

    session
        .attach_all(Some(AttachAllOptions::new().url("https://x")))
        .await
        .unwrap();
    session
        .attach_all(Some(AttachAllOptions::new().url(vec!["https://x"])))
        .await
        .unwrap();

    let calls = host.calls_for("attachAll");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1], "string and list form must hit the wire identically");
    assert_eq!(calls[0]["url"], serde_json::json!(["https://x"]));
}

#[tokio::test]
async fn attach_detach_round_trip_with_events() {
    let (controller, host) = Host::connect().await;
    host.add_tab(7);

    let session = controller.start(StartOptions::new()).await.unwrap();
    let mut events = session.events();

    let page = session.attach(7).await.unwrap();
    assert_eq!(page.url(), "about:blank");

    match events.recv().await {
        Some(SessionEvent::Attached { tab_id, page: attached }) => {
            assert_eq!(tab_id, 7);
            assert_eq!(attached.guid(), page.guid());
        }
        other => panic!("expected Attached, got {other:?}"),
    }

    // Detach by handle translates to the page's channel reference.
    session.detach(&page).await.unwrap();
    let detach_calls = host.calls_for("detach");
    assert_eq!(
        detach_calls[0]["page"]["guid"],
        serde_json::json!(page.guid())
    );

    match events.recv().await {
        Some(SessionEvent::Detached { tab_id }) => assert_eq!(tab_id, 7),
        other => panic!("expected Detached, got {other:?}"),
    }

    // Detach by tab id uses the tab id wire form.
    session.detach(7u32).await.unwrap();
    let detach_calls = host.calls_for("detach");
    assert_eq!(detach_calls[1]["tabId"], serde_json::json!(7));
}

#[tokio::test]
async fn attach_unknown_tab_fails() {
    let (controller, _host) = Host::connect().await;
    let session = controller.start(StartOptions::new()).await.unwrap();

    let err = session.attach(999).await.unwrap_err();
    assert!(err.to_string().contains("999"));
}

#[tokio::test]
async fn new_page_yields_live_handle() -> anyhow::Result<()> {
    let (controller, host) = Host::connect().await;
    let session = controller.start(StartOptions::new()).await?;

    let page = session
        .new_page(Some(bext::NewPageOptions::new().url("https://example.com")))
        .await?;

    assert_eq!(page.url(), "https://example.com");
    assert_eq!(
        host.calls_for("newPage")[0]["url"],
        serde_json::json!("https://example.com")
    );

    let pages = session.pages().await?;
    assert!(pages.iter().any(|p| p.guid() == page.guid()));
    Ok(())
}

#[tokio::test]
async fn modes_are_independent() {
    let (controller, host) = Host::connect().await;

    let incognito = controller
        .start(StartOptions::new().incognito(true))
        .await
        .unwrap();
    let normal = controller.start(StartOptions::new()).await.unwrap();

    assert_ne!(incognito.guid(), normal.guid());
    assert_eq!(host.start_count(), 2);

    let starts = host.calls_for("start");
    assert_eq!(starts[0]["incognito"], serde_json::json!(true));
    assert_eq!(starts[1].get("incognito"), None);
}
