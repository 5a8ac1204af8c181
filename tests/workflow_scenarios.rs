mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fixture, fixture_with, FlakyStore};
use talent_flow::config::AllocationConfig;
use talent_flow::domain::{AllocationStatus, MatchScore, NewProjectRequest, RequestStatus};
use talent_flow::service::{AllocationFilter, ConflictTarget};
use talent_flow::workflow::{CommitMode, CommitRequest, CommitTarget, ConflictRef, Suggestion, APPROVAL_REASONING_PREFIX};
use talent_flow::{AllocationError, DomainStore};

const SCORES: &[(&str, u8)] = &[
    ("Alice Johnson", 85),
    ("Bob Williams", 70),
    ("Charlie Brown", 40),
    ("Project Phoenix", 88),
    ("Project Neptune", 55),
];

fn suggestion(id: &str, name: &str, score: u8) -> Suggestion {
    Suggestion {
        candidate_id: id.to_string(),
        candidate_name: name.to_string(),
        match_score: MatchScore::new(score).unwrap(),
        reasoning: format!("{} fits", name),
    }
}

fn no_auto_resolve() -> AllocationConfig {
    AllocationConfig { auto_resolve_conflicts: false, ..AllocationConfig::default() }
}

#[tokio::test]
async fn test_alice_is_matched_to_phoenix_and_committed() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    let ranked = fx.service.suggest_resources_for_project(&phoenix.id, None, None).await.unwrap();
    assert!(!ranked.is_empty());
    assert_eq!(ranked[0].candidate_id, alice.id);
    assert!(ranked[0].match_score.value() >= 60);

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: ranked,
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.count(), 1);
    let allocation = &outcome.report.created[0];
    assert_eq!(allocation.resource_id, alice.id);
    assert_eq!(allocation.project_id, phoenix.id);
    assert!(matches!(allocation.status, AllocationStatus::Matched | AllocationStatus::Partial));
    assert!(outcome.conflict_advice.is_empty());

    let notices = fx.sink.wait_for(1).await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].resource_email, "alice@talentflow.ai");
    assert_eq!(notices[0].project_name, "Project Phoenix");
}

#[tokio::test]
async fn test_pool_restricts_candidates() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let bob = fx.resource("Bob Williams").await;

    let ranked = fx
        .service
        .suggest_resources_for_project(&phoenix.id, Some(&[bob.id.clone()][..]), Some("availability first"))
        .await
        .unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].candidate_id, bob.id);

    let err = fx
        .service
        .suggest_resources_for_project(&phoenix.id, Some(&["nobody".to_string()][..]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { .. }));
}

#[tokio::test]
async fn test_conflict_commit_gets_advice_without_extra_writes() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let charlie = fx.resource("Charlie Brown").await;

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&charlie.id, &charlie.name, 40)],
            mode: CommitMode::Manual(vec![charlie.id.clone()]),
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.created[0].status, AllocationStatus::Conflict);
    assert_eq!(outcome.conflict_advice.len(), 1);
    assert!(outcome.conflict_advice[0].suggestion.contains("Charlie Brown"));
    assert_eq!(fx.store.list_allocations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_invalid_selection_creates_nothing() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    let err = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&alice.id, &alice.name, 85)],
            mode: CommitMode::Manual(vec![alice.id.clone(), "ghost".to_string()]),
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap_err();

    match err {
        AllocationError::InvalidSelection { rejected } => assert_eq!(rejected, vec!["ghost".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(fx.store.list_allocations().await.unwrap().is_empty());
    assert!(fx.sink.notices.lock().await.is_empty());
}

#[tokio::test]
async fn test_auto_tie_goes_to_first_entry() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;
    let bob = fx.resource("Bob Williams").await;

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&bob.id, &bob.name, 80), suggestion(&alice.id, &alice.name, 80)],
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.count(), 1);
    assert_eq!(outcome.report.created[0].resource_id, bob.id);
}

#[tokio::test]
async fn test_custom_thresholds_change_status() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let bob = fx.resource("Bob Williams").await;

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&bob.id, &bob.name, 70)],
            mode: CommitMode::Auto,
            thresholds: Some(talent_flow::domain::StatusThresholds::new(65, 30).unwrap()),
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.report.created[0].status, AllocationStatus::Matched);
}

#[tokio::test]
async fn test_idempotency_key_dedupes_repeat_commit() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    let request = CommitRequest {
        target: CommitTarget::Project(phoenix.id.clone()),
        suggestions: vec![suggestion(&alice.id, &alice.name, 85)],
        mode: CommitMode::Auto,
        thresholds: None,
        idempotency_key: Some("form-42".to_string()),
    };
    let first = fx.service.commit_allocation(request.clone()).await.unwrap();
    let second = fx.service.commit_allocation(request).await.unwrap();

    assert_eq!(first.report.created[0].id, second.report.created[0].id);
    assert_eq!(fx.store.list_allocations().await.unwrap().len(), 1);
    assert_eq!(fx.sink.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn test_unavailable_write_that_landed_is_adopted() {
    let store = FlakyStore::new();
    let fx = fixture_with(store.clone(), SCORES, AllocationConfig::default()).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    store.write_lands.store(true, Ordering::SeqCst);
    store.fail_next_write.store(true, Ordering::SeqCst);

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&alice.id, &alice.name, 85)],
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.count(), 1);
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    assert_eq!(store.list_allocations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unavailable_write_that_did_not_land_is_retried_once() {
    let store = FlakyStore::new();
    let fx = fixture_with(store.clone(), SCORES, AllocationConfig::default()).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    store.fail_next_write.store(true, Ordering::SeqCst);

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&alice.id, &alice.name, 85)],
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: Some("retry-me".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.count(), 1);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(store.list_allocations().await.unwrap().len(), 1);
    assert_eq!(fx.sink.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn test_approve_creates_one_allocation_then_marks_approved() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    let request = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);

    let result = fx.service.approve_request(&request.id).await.unwrap();
    assert_eq!(result.outcome.request.status, RequestStatus::Approved);
    let allocation = &result.outcome.allocation;
    assert_eq!(allocation.resource_id, alice.id);
    assert_eq!(allocation.project_id, phoenix.id);
    assert_eq!(allocation.match_score.value(), 88);
    assert!(allocation.reasoning.starts_with(APPROVAL_REASONING_PREFIX));

    let stored = fx.store.get_project_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(fx.store.list_allocations().await.unwrap().len(), 1);

    // A second approval is refused without touching the oracle.
    let calls = fx.oracle.call_count();
    let err = fx.service.approve_request(&request.id).await.unwrap_err();
    assert!(matches!(err, AllocationError::Validation(_)));
    assert_eq!(fx.oracle.call_count(), calls);
}

#[tokio::test]
async fn test_failed_approval_leaves_request_pending() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;
    let request = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap();

    fx.oracle.fail_matching.store(true, Ordering::SeqCst);
    let err = fx.service.approve_request(&request.id).await.unwrap_err();
    assert!(err.is_retryable());

    let stored = fx.store.get_project_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(fx.store.list_allocations().await.unwrap().is_empty());

    fx.oracle.fail_matching.store(false, Ordering::SeqCst);
    fx.service.approve_request(&request.id).await.unwrap();
    assert_eq!(fx.store.list_allocations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_allocation_write_leaves_request_pending() {
    let store = FlakyStore::new();
    let fx = fixture_with(store.clone(), SCORES, AllocationConfig::default()).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;
    let request = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap();

    store.reject_next_write.store(true, Ordering::SeqCst);
    let err = fx.service.approve_request(&request.id).await.unwrap_err();
    match err {
        AllocationError::Persistence { committed, .. } => assert!(committed.is_empty()),
        other => panic!("unexpected error: {other}"),
    }

    let stored = store.get_project_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(store.list_allocations().await.unwrap().is_empty());
    assert!(fx.sink.wait_for(1).await.is_empty());
}

#[tokio::test]
async fn test_status_update_failure_reports_committed_and_retry_reuses_allocation() {
    let store = FlakyStore::new();
    let fx = fixture_with(store.clone(), SCORES, AllocationConfig::default()).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;
    let request = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap();

    store.fail_next_status_update.store(true, Ordering::SeqCst);
    let err = fx.service.approve_request(&request.id).await.unwrap_err();
    let committed = match err {
        AllocationError::Persistence { committed, .. } => committed,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(committed.len(), 1);
    let stored = store.get_project_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);

    let result = fx.service.approve_request(&request.id).await.unwrap();
    assert_eq!(result.outcome.allocation.id, committed[0]);
    assert_eq!(store.list_allocations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reject_never_consults_oracle() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let bob = fx.resource("Bob Williams").await;
    let request = fx.service.submit_request(&bob.id, &phoenix.id).await.unwrap();

    let rejected = fx.service.reject_request(&request.id).await.unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(fx.oracle.call_count(), 0);
    assert!(fx.store.list_allocations().await.unwrap().is_empty());

    let pending = fx.service.list_requests(Some(RequestStatus::Pending)).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_approval_for_missing_project_is_not_found_and_stays_pending() {
    let fx = fixture(SCORES).await;
    let alice = fx.resource("Alice Johnson").await;
    let id = fx
        .store
        .create_project_request(NewProjectRequest {
            project_id: "deleted-project".to_string(),
            resource_id: alice.id.clone(),
        })
        .await
        .unwrap();

    let err = fx.service.approve_request(&id).await.unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { kind: "project", .. }));
    let stored = fx.store.get_project_request(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(fx.oracle.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_requests_are_refused() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;

    let request = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap();
    let err = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap_err();
    assert!(matches!(err, AllocationError::Validation(_)));

    fx.service.approve_request(&request.id).await.unwrap();
    let err = fx.service.submit_request(&alice.id, &phoenix.id).await.unwrap_err();
    assert!(matches!(err, AllocationError::Validation(_)));
}

#[tokio::test]
async fn test_resolve_conflict_leaves_store_unchanged() {
    let fx = fixture_with(
        Arc::new(talent_flow::store::InMemoryStore::new()),
        SCORES,
        no_auto_resolve(),
    )
    .await;
    let titan = fx.project("Project Titan").await;
    let charlie = fx.resource("Charlie Brown").await;

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(titan.id.clone()),
            suggestions: vec![suggestion(&charlie.id, &charlie.name, 20)],
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert!(outcome.conflict_advice.is_empty());
    let allocation = outcome.report.created[0].clone();
    assert_eq!(allocation.status, AllocationStatus::Conflict);

    let before = (
        fx.store.list_allocations().await.unwrap(),
        fx.store.list_resources().await.unwrap(),
        fx.store.list_projects().await.unwrap(),
        fx.store.list_project_requests().await.unwrap(),
    );

    let by_id = fx
        .service
        .resolve_conflict(&ConflictTarget::Allocation { allocation_id: allocation.id.clone() })
        .await
        .unwrap();
    let by_pair = fx
        .service
        .resolve_conflict(&ConflictTarget::Pair(ConflictRef {
            project_id: titan.id.clone(),
            resource_id: charlie.id.clone(),
            reasoning: "Skills do not overlap".to_string(),
        }))
        .await
        .unwrap();
    assert!(!by_id.is_empty());
    assert!(!by_pair.is_empty());

    let after = (
        fx.store.list_allocations().await.unwrap(),
        fx.store.list_resources().await.unwrap(),
        fx.store.list_projects().await.unwrap(),
        fx.store.list_project_requests().await.unwrap(),
    );
    assert_eq!(before, after);

    let briefs = fx.oracle.briefs.lock().await;
    assert_eq!(briefs[0].reasoning, allocation.reasoning);
    assert_eq!(briefs[1].reasoning, "Skills do not overlap");
}

#[tokio::test]
async fn test_resolving_a_non_conflict_is_refused() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let alice = fx.resource("Alice Johnson").await;
    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Project(phoenix.id.clone()),
            suggestions: vec![suggestion(&alice.id, &alice.name, 95)],
            mode: CommitMode::Auto,
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    let err = fx
        .service
        .resolve_conflict(&ConflictTarget::Allocation { allocation_id: outcome.report.created[0].id.clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::Validation(_)));

    let err = fx
        .service
        .resolve_conflict(&ConflictTarget::Allocation { allocation_id: "missing".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { .. }));
}

#[tokio::test]
async fn test_allocation_filter_and_deallocate() {
    let fx = fixture(SCORES).await;
    let phoenix = fx.project("Project Phoenix").await;
    let neptune = fx.project("Project Neptune").await;
    let bob = fx.resource("Bob Williams").await;

    let outcome = fx
        .service
        .commit_allocation(CommitRequest {
            target: CommitTarget::Resource(bob.id.clone()),
            suggestions: vec![
                suggestion(&phoenix.id, &phoenix.name, 75),
                suggestion(&neptune.id, &neptune.name, 65),
            ],
            mode: CommitMode::Manual(vec![phoenix.id.clone(), neptune.id.clone()]),
            thresholds: None,
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.report.count(), 2);

    let filter = AllocationFilter { project_id: Some(neptune.id.clone()), resource_id: None };
    let on_neptune = fx.service.list_allocations(&filter).await.unwrap();
    assert_eq!(on_neptune.len(), 1);

    fx.service.deallocate(&on_neptune[0].id).await.unwrap();
    assert!(fx.service.list_allocations(&filter).await.unwrap().is_empty());
    let err = fx.service.deallocate(&on_neptune[0].id).await.unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { .. }));
}
