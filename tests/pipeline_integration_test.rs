mod common;

use bulk_annotator::reconciler::Reconciler;
use bulk_annotator::store::{ResultStore, StoreError};
use bulk_annotator::{Outcome, PipelineError, PipelineStatus, Record};
use common::{
    ScriptedFactory, ids, orchestrator, outcomes_for, records, settings, stored_outcomes,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_transient_failures_retried_in_next_round_when_attempts_run_out() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new()
        .fail_transiently(3, 2)
        .fail_transiently(7, 2);
    let log = factory.log();

    let orchestrator = orchestrator(dir.path(), factory, settings(3, 3, 2), Some(5)).await;
    let report = orchestrator
        .run(records(10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Converged);
    assert!(report.is_complete());
    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.rounds[0].missing_after, 2);
    assert_eq!(report.rounds[1].dispatched, 2);
    assert_eq!(report.rounds[1].missing_after, 0);
    assert_eq!(log.calls(3), 3);
    assert_eq!(log.calls(7), 3);

    let outcomes = stored_outcomes(dir.path()).await;
    assert_eq!(outcomes.len(), 12);

    let mut history = outcomes_for(&outcomes, 3);
    history.sort_by_key(|o| o.round);
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0].outcome,
        Outcome::Failed {
            reason: "busy (call 2)".to_string(),
            permanent: false,
        }
    );
    assert_eq!(history[0].attempts, 2);
    assert!(history[0].scores.iter().all(|(_, score)| score < 0.0));
    assert!(history[1].is_success());
    assert_eq!(history[1].round, 1);
}

#[tokio::test]
async fn test_transient_failures_absorbed_within_round_when_attempts_suffice() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new()
        .fail_transiently(3, 2)
        .fail_transiently(7, 2);

    let orchestrator = orchestrator(dir.path(), factory, settings(3, 3, 3), Some(5)).await;
    let report = orchestrator
        .run(records(10), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rounds.len(), 1);

    let outcomes = stored_outcomes(dir.path()).await;
    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(outcomes_for(&outcomes, 7)[0].attempts, 3);
}

#[tokio::test]
async fn test_converges_within_expected_number_of_rounds() {
    let dir = TempDir::new().unwrap();
    // 6 consecutive transient failures with 2 attempts per round: ceil(6/2) + 1 rounds.
    let factory = ScriptedFactory::new().fail_transiently(1, 6);

    let orchestrator = orchestrator(dir.path(), factory, settings(2, 2, 2), None).await;
    let report = orchestrator
        .run(records(5), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rounds.len(), 4);
    assert!(report.rounds[1..].iter().all(|r| r.dispatched == 1));
}

#[tokio::test]
async fn test_permanent_failure_is_recorded_once_and_never_redispatched() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().reject(5);
    let log = factory.log();

    let orchestrator = orchestrator(dir.path(), factory, settings(3, 3, 10), Some(5)).await;
    let report = orchestrator
        .run(records(8), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Converged);
    assert!(!report.is_complete());
    assert_eq!(report.rounds.len(), 1);
    assert!(report.unresolved.is_empty());
    assert_eq!(report.permanently_failed, ids(&[5]));
    assert_eq!(report.missing(), ids(&[5]));
    assert_eq!(log.calls(5), 1);

    let outcomes = stored_outcomes(dir.path()).await;
    let rejected = outcomes_for(&outcomes, 5);
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].outcome.is_permanent_failure());
    assert_eq!(rejected[0].attempts, 1);
}

#[tokio::test]
async fn test_budget_exhaustion_reports_residual_set() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().fail_transiently(2, 100);
    let log = factory.log();

    let orchestrator = orchestrator(dir.path(), factory, settings(2, 2, 1), Some(2)).await;
    let report = orchestrator
        .run(records(4), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::BudgetExhausted);
    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.unresolved, ids(&[2]));
    assert_eq!(report.succeeded, 3);
    assert_eq!(log.calls(2), 2);
}

#[tokio::test]
async fn test_reconciliation_is_idempotent_and_read_only() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().reject(1).fail_transiently(2, 1);
    let orchestrator = orchestrator(dir.path(), factory, settings(2, 2, 1), Some(1)).await;
    orchestrator
        .run(records(6), &CancellationToken::new())
        .await
        .unwrap();

    let store = ResultStore::open_with_run_id(dir.path(), "reader")
        .await
        .unwrap();
    let before: Vec<(std::path::PathBuf, String)> = snapshot(&store).await;

    let reconciler = Reconciler::new(store.clone());
    let all = ids(&[0, 1, 2, 3, 4, 5]);
    let first = reconciler.reconcile(&all).await.unwrap();
    let second = reconciler.reconcile(&all).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.missing, ids(&[1, 2]));
    assert_eq!(first.retry_ids(), ids(&[2]));
    assert_eq!(reconciler.missing(&all).await.unwrap(), ids(&[1, 2]));
    assert_eq!(snapshot(&store).await, before);
}

async fn snapshot(store: &ResultStore) -> Vec<(std::path::PathBuf, String)> {
    let mut files = Vec::new();
    for path in store.partitions().await.unwrap() {
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        files.push((path, content));
    }
    files
}

#[tokio::test]
async fn test_resume_only_dispatches_missing_records() {
    let dir = TempDir::new().unwrap();

    let first = ScriptedFactory::new()
        .fail_transiently(4, 100)
        .fail_transiently(8, 100);
    let orchestrator_1 = orchestrator(dir.path(), first, settings(3, 3, 1), Some(1)).await;
    let report = orchestrator_1
        .run(records(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, PipelineStatus::BudgetExhausted);
    assert_eq!(report.unresolved, ids(&[4, 8]));

    let second = ScriptedFactory::new();
    let log = second.log();
    let orchestrator_2 = orchestrator(dir.path(), second, settings(3, 3, 1), Some(1))
        .await
        .with_resume(true);
    let report = orchestrator_2
        .run(records(10), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rounds.len(), 1);
    assert_eq!(report.rounds[0].dispatched, 2);
    assert_eq!(log.total_calls(), 2);
    assert_eq!(log.calls(4), 1);
    assert_eq!(log.calls(8), 1);
}

#[tokio::test]
async fn test_resume_of_finished_store_does_nothing() {
    let dir = TempDir::new().unwrap();
    orchestrator(dir.path(), ScriptedFactory::new(), settings(2, 2, 1), None)
        .await
        .run(records(5), &CancellationToken::new())
        .await
        .unwrap();

    let factory = ScriptedFactory::new();
    let log = factory.log();
    let report = orchestrator(dir.path(), factory, settings(2, 2, 1), None)
        .await
        .with_resume(true)
        .run(records(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Converged);
    assert!(report.rounds.is_empty());
    assert!(report.is_complete());
    assert_eq!(log.total_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new();
    let log = factory.log();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator(dir.path(), factory, settings(2, 2, 3), None)
        .await
        .run(records(4), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Cancelled);
    assert!(report.rounds.is_empty());
    assert_eq!(report.missing().len(), 4);
    assert_eq!(log.total_calls(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_round_returns_partial_and_resume_finishes() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().with_delay(Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let orchestrator_1 = orchestrator(dir.path(), factory, settings(2, 2, 3), None).await;
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator_1.run(records(40), &cancel),
    )
    .await
    .expect("cancellation must not hang the barrier")
    .unwrap();

    assert_eq!(report.status, PipelineStatus::Cancelled);
    assert_eq!(report.rounds.len(), 1);
    let missing = report.missing();
    assert!(!missing.is_empty());
    assert!(missing.len() < 40);

    // Only terminal outcomes were written; nothing half-done.
    let outcomes = stored_outcomes(dir.path()).await;
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(outcomes.len() + missing.len(), 40);

    let report = orchestrator(dir.path(), ScriptedFactory::new(), settings(2, 2, 3), None)
        .await
        .with_resume(true)
        .run(records(40), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rounds[0].dispatched, missing.len());
}

#[tokio::test]
async fn test_signal_after_every_record_started_still_converges() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().with_delay(Duration::from_millis(100));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let report = orchestrator(dir.path(), factory, settings(2, 2, 3), None)
        .await
        .run(records(2), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Converged);
    assert_eq!(report.rounds.len(), 1);
    assert!(report.is_complete());
    assert_eq!(stored_outcomes(dir.path()).await.len(), 2);
}

#[tokio::test]
async fn test_shard_allocation_failure_is_surfaced_without_hanging() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().fail_shard(1);
    let log = factory.log();

    let orchestrator = orchestrator(dir.path(), factory, settings(3, 3, 1), Some(3)).await;
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(records(6), &CancellationToken::new()),
    )
    .await
    .expect("barrier must return when a shard cannot start");

    match result {
        Err(PipelineError::ShardAllocation { round, failures }) => {
            assert_eq!(round, 0);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].shard, 1);
        }
        other => panic!("expected ShardAllocation, got {other:?}"),
    }

    // The healthy shards still ran to completion and persisted their work.
    let mut handles = log.handles_created();
    handles.sort_unstable();
    assert_eq!(handles, vec![0, 2]);
    assert_eq!(stored_outcomes(dir.path()).await.len(), 4);
}

#[tokio::test]
async fn test_worker_panic_is_surfaced_as_error() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new().panic_on(4);

    let orchestrator = orchestrator(dir.path(), factory, settings(3, 3, 1), Some(3)).await;
    let err = orchestrator
        .run(records(6), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::WorkerPanicked { round: 0, shard: 2, .. }
    ));
}

#[tokio::test]
async fn test_unreadable_partition_makes_store_unavailable() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("zz-broken.jsonl")).unwrap();

    let err = orchestrator(dir.path(), ScriptedFactory::new(), settings(2, 2, 1), None)
        .await
        .run(records(4), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ResultStoreUnavailable(StoreError::PartitionUnreadable { .. })
    ));
}

#[tokio::test]
async fn test_resume_against_unreadable_store_fails_before_dispatch() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("broken.jsonl")).unwrap();
    let factory = ScriptedFactory::new();
    let log = factory.log();

    let result = orchestrator(dir.path(), factory, settings(2, 2, 1), None)
        .await
        .with_resume(true)
        .run(records(4), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(PipelineError::ResultStoreUnavailable(_))));
    assert_eq!(log.total_calls(), 0);
}

#[tokio::test]
async fn test_empty_input_converges_immediately() {
    let dir = TempDir::new().unwrap();
    let report = orchestrator(dir.path(), ScriptedFactory::new(), settings(4, 4, 1), None)
        .await
        .run(Vec::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Converged);
    assert_eq!(report.total, 0);
    assert!(report.rounds.is_empty());
    assert!(stored_outcomes(dir.path()).await.is_empty());
}

#[tokio::test]
async fn test_duplicate_input_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let input = vec![Record::new(1_u64, "a"), Record::new(1_u64, "b")];

    let err = orchestrator(dir.path(), ScriptedFactory::new(), settings(1, 1, 1), None)
        .await
        .run(input, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DuplicateRecordId(_)));
}
