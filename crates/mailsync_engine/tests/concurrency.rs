//! Per-container coalescing and cross-container independence.

use mailsync_engine::{ContainerSelector, SyncConfig, SyncEngine, SyncOutcome};
use mailsync_testkit::prelude::*;

fn engine(account: &TestAccount) -> SyncEngine<ScriptedEnvironment> {
    let config = SyncConfig::new().with_container(inbox()).with_container(calendar());
    SyncEngine::new(ScriptedEnvironment::new(account.secure.clone()), config)
}

#[tokio::test]
async fn simultaneous_requests_share_one_cycle() {
    let account = TestAccount::memory();
    let engine = engine(&account);

    let (a, b) = tokio::join!(
        engine.start_sync(ContainerSelector::One(inbox())),
        engine.start_sync(ContainerSelector::One(inbox())),
    );

    assert_eq!(engine.env().pull_count(&inbox()), 1);
    let a = a.get(&inbox()).unwrap();
    let b = b.get(&inbox()).unwrap();
    assert!(a.is_completed() && b.is_completed());
    assert!(a.coalesced ^ b.coalesced);
}

#[tokio::test]
async fn drain_joins_running_cycle() {
    let account = TestAccount::memory();
    let engine = engine(&account);
    engine.enqueue(create_draft(&inbox(), "d1")).unwrap();

    let inbox_id = inbox();
    let (cycle, drain) = tokio::join!(
        engine.sync_container(&inbox_id),
        engine.drain_mutations(ContainerSelector::One(inbox())),
    );

    assert!(!cycle.coalesced);
    assert!(drain.get(&inbox()).unwrap().coalesced);
    assert_eq!(engine.env().mutation_requests().len(), 1);
    assert_eq!(engine.env().pull_count(&inbox()), 1);
}

#[tokio::test]
async fn cycle_waits_for_running_drain_then_runs() {
    let account = TestAccount::memory();
    let engine = engine(&account);
    engine.enqueue(create_draft(&inbox(), "d1")).unwrap();
    engine.env().hold_fetches();

    let draining = engine.clone();
    let drain = tokio::spawn(async move { draining.drain_mutations(ContainerSelector::One(inbox())).await });
    engine.env().wait_for_requests(1).await;

    let syncing = engine.clone();
    let cycle = tokio::spawn(async move { syncing.sync_container(&inbox()).await });
    tokio::task::yield_now().await;
    engine.env().release_fetches();

    let drain = drain.await.unwrap();
    let cycle = cycle.await.unwrap();
    assert!(drain.all_completed());
    assert!(cycle.is_completed());
    assert!(!cycle.coalesced);

    let requests = engine.env().requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].method, mailsync_protocol::Method::Get);
    assert_eq!(requests[1].method, mailsync_protocol::Method::Get);
}

#[tokio::test]
async fn different_containers_sync_concurrently() {
    let account = TestAccount::memory();
    let engine = engine(&account);
    engine.env().hold_fetches();

    let running = engine.clone();
    let all = tokio::spawn(async move { running.start_sync(ContainerSelector::All).await });

    // Both pulls are in flight before either completes.
    engine.env().wait_for_requests(2).await;
    assert_eq!(engine.env().pull_count(&inbox()), 1);
    assert_eq!(engine.env().pull_count(&calendar()), 1);
    engine.env().release_fetches();

    let report = all.await.unwrap();
    assert_eq!(report.containers.len(), 2);
    assert!(report.all_completed());
}

#[tokio::test]
async fn all_selector_reports_in_selection_order() {
    let account = TestAccount::memory();
    let engine = engine(&account);
    engine.enqueue(create_draft(&archive(), "d1")).unwrap();

    let report = engine.start_sync(ContainerSelector::All).await;
    let containers: Vec<_> = report.containers.iter().map(|r| r.container.clone()).collect();
    assert_eq!(containers, engine.resolve(&ContainerSelector::All));
    assert!(containers.contains(&archive()));
    assert!(report.containers.iter().all(|r| r.outcome == SyncOutcome::Completed));
}
