mod support;

use std::time::Duration;

use digest_provider::UpstreamError;
use digest_provider_mock::{GenerationScript, MockBackend, MockItemSource, PageScript};
use pr_digest::pagination::PaginationFetcher;
use pr_digest::store::StateStore;
use pr_digest::{DigestError, FetchNext, GenerationState};
use serde_json::json;
use support::{item, items, open_mirror, page, Harness};
use tempfile::TempDir;

fn held_ids(harness: &Harness) -> Vec<String> {
    harness
        .digest
        .snapshot()
        .items
        .into_iter()
        .map(|view| view.item.id)
        .collect()
}

#[tokio::test]
async fn second_page_appends_after_first_and_advances_cursor() {
    let mut second = items("pr-", 11..=13);
    second.insert(1, item("pr-1"));
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=10), 1, Some(2)),
        page(second, 2, None),
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    assert_eq!(harness.load_first_page().await.len(), 10);
    let outcome = match harness.digest.fetch_next_page().await.expect("page 2") {
        FetchNext::Fetched(outcome) => outcome,
        FetchNext::Exhausted => panic!("page 2 should be fetched"),
    };

    assert_eq!(outcome.added, 3);
    assert_eq!(outcome.current_page, 2);
    assert_eq!(outcome.next_cursor, None);

    let expected: Vec<String> = (1..=13).map(|index| format!("pr-{index}")).collect();
    assert_eq!(held_ids(&harness), expected);

    let snapshot = harness.digest.snapshot();
    assert_eq!(snapshot.current_page, 2);
    assert_eq!(snapshot.cursor, None);
    assert!(!snapshot.has_more());

    let requested: Vec<u32> = harness
        .source
        .requests()
        .iter()
        .map(|request| request.page)
        .collect();
    assert_eq!(requested, vec![1, 2]);
}

#[tokio::test]
async fn exhausted_cursor_does_not_request_again() {
    let source = MockItemSource::scripted(vec![page(items("pr-", 1..=2), 1, None)]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);
    harness.load_first_page().await;

    assert_eq!(
        harness.digest.fetch_next_page().await.expect("no error"),
        FetchNext::Exhausted
    );
    assert_eq!(harness.source.requests().len(), 1);
}

#[tokio::test]
async fn repeated_id_keeps_first_occurrence_in_original_position() {
    let mut duplicate = item("pr-2");
    duplicate["description"] = json!("a later copy");
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=3), 1, Some(2)),
        page(vec![item("pr-4"), duplicate], 2, None),
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    harness.load_first_page().await;
    harness.digest.fetch_next_page().await.expect("page 2");

    assert_eq!(held_ids(&harness), vec!["pr-1", "pr-2", "pr-3", "pr-4"]);
    let view = harness.digest.item_view("pr-2").expect("held");
    assert_eq!(view.item.description, "Pull request pr-2");
}

#[tokio::test]
async fn invalid_items_are_dropped_and_counted() {
    let source = MockItemSource::scripted(vec![page(
        vec![
            item("pr-1"),
            json!({"id": "pr-2", "description": "missing payload", "url": "u"}),
            json!({"id": 3, "description": "d", "promptPayload": "p", "url": "u"}),
            item("pr-4"),
        ],
        1,
        None,
    )]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    let outcome = match harness.digest.fetch_next_page().await.expect("page 1") {
        FetchNext::Fetched(outcome) => outcome,
        FetchNext::Exhausted => panic!("page 1 should be fetched"),
    };

    assert_eq!(outcome.dropped, 2);
    assert_eq!(held_ids(&harness), vec!["pr-1", "pr-4"]);
}

#[tokio::test]
async fn failed_fetch_leaves_pagination_untouched() {
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=10), 1, Some(2)),
        PageScript::error(UpstreamError::Server {
            status: 503,
            message: "overloaded".to_string(),
        }),
        PageScript::error(UpstreamError::RateLimited {
            message: "slow down".to_string(),
            retry_after_secs: Some(5),
        }),
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);
    harness.load_first_page().await;
    let before = harness.digest.snapshot();

    let server = harness.digest.fetch_next_page().await.expect_err("503");
    assert_eq!(
        server,
        DigestError::Server {
            status: 503,
            message: "overloaded".to_string(),
        }
    );
    let limited = harness.digest.fetch_next_page().await.expect_err("429");
    assert!(matches!(
        limited,
        DigestError::RateLimited {
            retry_after_secs: Some(5),
            ..
        }
    ));

    assert_eq!(harness.digest.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn page_deadline_expiry_fails_with_timeout() {
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=3), 1, None).with_delay(Duration::from_secs(60))
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    let error = harness.digest.fetch_next_page().await.expect_err("too slow");

    assert_eq!(error, DigestError::Timeout);
    let snapshot = harness.digest.snapshot();
    assert_eq!(snapshot.current_page, 0);
    assert!(snapshot.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_fetch_is_rejected() {
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=3), 1, None).with_delay(Duration::from_secs(1))
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    let (first, second) = tokio::join!(
        harness.digest.fetch_next_page(),
        harness.digest.fetch_next_page()
    );

    assert!(matches!(first, Ok(FetchNext::Fetched(_))));
    assert_eq!(second, Err(DigestError::FetchInFlight));
    assert_eq!(harness.source.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_during_fetch_discards_the_page() {
    let source = MockItemSource::scripted(vec![
        page(items("pr-", 1..=3), 1, None).with_delay(Duration::from_secs(1))
    ]);
    let harness = Harness::new(MockBackend::scripted(Vec::new()), source);

    let (fetched, ()) = tokio::join!(harness.digest.fetch_next_page(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.digest.reset_all();
    });

    assert_eq!(fetched, Err(DigestError::Aborted));
    assert!(harness.digest.snapshot().items.is_empty());
}

#[tokio::test]
async fn refetch_first_page_replaces_items_and_prunes_their_records() {
    let source = MockItemSource::scripted(vec![
        page(vec![item("pr-a"), item("pr-b")], 1, Some(2)),
        page(vec![item("pr-a"), item("pr-c")], 1, Some(2)),
    ]);
    let backend = MockBackend::scripted(vec![GenerationScript::chunks(["digest of b"])]);
    let harness = Harness::new(backend, source);
    harness.load_first_page().await;

    let settled = harness
        .digest
        .request_generation("pr-b")
        .expect("start")
        .await
        .expect("join");
    assert_eq!(settled, GenerationState::Complete);

    let outcome = harness.digest.refetch_first_page().await.expect("refetch");

    assert_eq!(outcome.pruned, vec!["pr-b".to_string()]);
    assert_eq!(held_ids(&harness), vec!["pr-a", "pr-c"]);
    assert!(harness.digest.item_view("pr-b").is_none());
    assert_eq!(harness.digest.snapshot().cursor, Some(2));
}

#[tokio::test(start_paused = true)]
async fn refetch_stops_a_running_generation_for_a_pruned_item() {
    let source = MockItemSource::scripted(vec![
        page(vec![item("pr-a"), item("pr-b")], 1, None),
        page(vec![item("pr-a")], 1, None),
    ]);
    let backend = MockBackend::scripted(vec![GenerationScript::chunks(["half"]).then_hang()]);
    let harness = Harness::new(backend, source);
    harness.load_first_page().await;

    let handle = harness.digest.request_generation("pr-b").expect("start");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(harness.digest.is_generating("pr-b"));

    let outcome = harness.digest.refetch_first_page().await.expect("refetch");
    assert_eq!(outcome.pruned, vec!["pr-b".to_string()]);

    assert_eq!(handle.await.expect("join"), GenerationState::Idle);
    assert!(!harness.digest.is_generating("pr-b"));
    assert!(harness.digest.item_view("pr-b").is_none());
}

#[tokio::test]
async fn page_zero_is_rejected_without_a_request() {
    let dir = TempDir::new().expect("tempdir");
    let store = StateStore::shared(open_mirror(&dir));
    let source = std::sync::Arc::new(MockItemSource::default());
    let fetcher = PaginationFetcher::new(
        store,
        std::sync::Arc::clone(&source) as _,
        10,
        Duration::from_secs(5),
    );

    let error = fetcher.fetch_page(0).await.expect_err("page 0");

    assert!(matches!(error, DigestError::InvalidInput(_)));
    assert!(source.requests().is_empty());
    assert!(!fetcher.is_in_flight());
}
