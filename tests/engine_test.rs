//! Stepping a cluster through its pipelines one call at a time

mod helpers;

use helpers::*;
use provisioner::core::{failed_reason, Condition, ConditionStatus, OperationKind, Phase, REASON_SKIP, REASON_WAITING};
use provisioner::error::ProvisionError;
use provisioner::execution::{StepOutcome, REASON_SUCCEEDED};
use provisioner::provider::ProviderFacade;

/// Walk a three step create: one step per call, conditions appended in order
#[tokio::test]
async fn test_three_step_create() {
    let (a, b, c) = (ScriptedHandler::ok(), ScriptedHandler::ok(), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b), ("C", &c)]));
    let mut cluster = begun("prod", OperationKind::Create);

    let outcome = provider.on_create(&mut cluster).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Advanced {
            step: "A".to_string(),
            next: "B".to_string()
        }
    );
    assert_eq!(
        conditions(&cluster),
        vec![("A".to_string(), ConditionStatus::True), ("B".to_string(), ConditionStatus::Unknown)]
    );
    assert_eq!(cluster.status.conditions[1].reason, REASON_WAITING);
    assert_eq!(cluster.status.phase, Phase::Processing);

    provider.on_create(&mut cluster).await.unwrap();
    assert_eq!(
        conditions(&cluster),
        vec![
            ("A".to_string(), ConditionStatus::True),
            ("B".to_string(), ConditionStatus::True),
            ("C".to_string(), ConditionStatus::Unknown),
        ]
    );

    let outcome = provider.on_create(&mut cluster).await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(true_count(&cluster), 3);
    assert_eq!(cluster.status.conditions.len(), 3);
    assert_eq!(cluster.status.phase, Phase::Running);
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));

    // Once running, create has nothing left to do
    let err = provider.on_create(&mut cluster).await.unwrap_err();
    assert!(matches!(err, ProvisionError::AlreadyDone { .. }));
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn test_n_steps_complete_in_n_calls() {
    let handlers: Vec<_> = (0..5).map(|_| ScriptedHandler::ok()).collect();
    let names = ["s1", "s2", "s3", "s4", "s5"];
    let pairs: Vec<_> = names.iter().copied().zip(handlers.iter()).collect();
    let provider = provider(definition(OperationKind::Create, &pairs));
    let mut cluster = begun("prod", OperationKind::Create);

    let (calls, done) = operate_until_done(&*provider, OperationKind::Create, &mut cluster, 20).await;

    assert!(done);
    assert_eq!(calls, 5);
    assert!(handlers.iter().all(|h| h.calls() == 1));
}

#[tokio::test]
async fn test_skipped_step_never_runs_its_handler() {
    let (a, b, c) = (ScriptedHandler::ok(), ScriptedHandler::ok(), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b), ("C", &c)]));
    let mut cluster = begun("prod", OperationKind::Create);
    cluster.spec.skip_steps.insert("B".to_string());

    let (calls, done) = operate_until_done(&*provider, OperationKind::Create, &mut cluster, 10).await;

    assert!(done);
    assert_eq!(calls, 3);
    assert_eq!(b.calls(), 0);
    let skipped = cluster.status.condition("B").unwrap();
    assert_eq!(skipped.status, ConditionStatus::True);
    assert_eq!(skipped.reason, REASON_SKIP);
}

#[tokio::test]
async fn test_unknown_skip_names_are_ignored() {
    let a = ScriptedHandler::ok();
    let provider = provider(definition(OperationKind::Create, &[("A", &a)]));
    let mut cluster = begun("prod", OperationKind::Create);
    cluster.spec.skip_steps.insert("notAStep".to_string());

    assert!(provider.on_create(&mut cluster).await.unwrap().is_completed());
    assert_eq!(a.calls(), 1);
}

/// A failing step stays current and is re-run on the next call
#[tokio::test]
async fn test_failed_step_is_retried_in_place() {
    let (a, b) = (ScriptedHandler::failing(2, "connection refused"), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b)]));
    let mut cluster = begun("prod", OperationKind::Create);

    for attempt in 1..=2 {
        let err = provider.on_create(&mut cluster).await.unwrap_err();
        assert!(matches!(err, ProvisionError::StepFailed { ref step, .. } if step == "A"));
        assert_eq!(conditions(&cluster), vec![("A".to_string(), ConditionStatus::False)]);
        let cond = cluster.status.condition("A").unwrap();
        assert_eq!(cond.reason, failed_reason("A"));
        assert!(cond.message.contains("connection refused"));
        assert_eq!(a.calls(), attempt);
    }

    let outcome = provider.on_create(&mut cluster).await.unwrap();
    assert_eq!(outcome.step(), "A");
    assert!(provider.on_create(&mut cluster).await.unwrap().is_completed());
    assert_eq!((a.calls(), b.calls()), (3, 1));
}

/// Progress never goes backwards and never exceeds the pipeline length
#[tokio::test]
async fn test_progress_is_monotonic() {
    let a = ScriptedHandler::ok();
    let b = ScriptedHandler::with_script(vec![Err("flaky".into()), Ok(()), Err("unused".into())]);
    let c = ScriptedHandler::failing(3, "timeout");
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b), ("C", &c)]));
    let mut cluster = begun("prod", OperationKind::Create);

    let mut seen = 0;
    let mut completed = false;
    for _ in 0..20 {
        let result = provider.on_create(&mut cluster).await;
        let now = true_count(&cluster);
        assert!(now >= seen, "true conditions went from {} to {}", seen, now);
        assert!(cluster.status.conditions.len() <= 3);
        seen = now;
        if matches!(result, Ok(StepOutcome::Completed { .. })) {
            completed = true;
            break;
        }
    }

    assert!(completed);
    assert_eq!(seen, 3);
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 2, 4));
}

#[tokio::test]
async fn test_delete_completes_without_a_terminal_phase() {
    let (drain, reset) = (ScriptedHandler::ok(), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Delete, &[("drain", &drain), ("reset", &reset)]));
    let mut cluster = begun("prod", OperationKind::Delete);
    assert_eq!(cluster.status.phase, Phase::Terminating);

    assert!(!provider.on_delete(&mut cluster).await.unwrap().is_completed());
    assert!(provider.on_delete(&mut cluster).await.unwrap().is_completed());
    assert_eq!(cluster.status.phase, Phase::Terminating);
}

#[tokio::test]
async fn test_empty_pipeline_is_a_config_error() {
    let a = ScriptedHandler::ok();
    let provider = provider(definition(OperationKind::Create, &[("A", &a)]));
    let mut cluster = cluster("prod");
    cluster.status.phase = Phase::Upgrading;

    let err = provider.on_upgrade(&mut cluster).await.unwrap_err();
    assert!(err.is_config_error());
    assert!(cluster.status.conditions.is_empty());
}

/// A cluster left with a condition for a step this pipeline no longer defines
fn with_legacy_condition() -> provisioner::Cluster {
    let mut cluster = begun("prod", OperationKind::Create);
    cluster.status.conditions = vec![
        Condition::new("A", ConditionStatus::True, REASON_SUCCEEDED, "done"),
        Condition::waiting("legacyStep"),
    ];
    cluster
}

#[tokio::test]
async fn test_skipping_a_step_without_a_handler() {
    let (a, b) = (ScriptedHandler::ok(), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b)]));
    let mut cluster = with_legacy_condition();
    cluster.spec.skip_steps.insert("legacyStep".to_string());

    let outcome = provider.on_create(&mut cluster).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Advanced {
            step: "legacyStep".to_string(),
            next: "B".to_string()
        }
    );
    assert_eq!(
        conditions(&cluster),
        vec![
            ("A".to_string(), ConditionStatus::True),
            ("legacyStep".to_string(), ConditionStatus::True),
            ("B".to_string(), ConditionStatus::Unknown),
        ]
    );

    assert!(provider.on_create(&mut cluster).await.unwrap().is_completed());
    assert_eq!(cluster.status.phase, Phase::Running);
    assert_eq!((a.calls(), b.calls()), (0, 1));
}

#[tokio::test]
async fn test_skipping_the_last_unknown_step_completes() {
    let a = ScriptedHandler::ok();
    let provider = provider(definition(OperationKind::Create, &[("A", &a)]));
    let mut cluster = with_legacy_condition();
    cluster.spec.skip_steps.insert("legacyStep".to_string());

    assert!(provider.on_create(&mut cluster).await.unwrap().is_completed());
    assert_eq!(cluster.status.phase, Phase::Running);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_unknown_step_leaves_the_target_untouched() {
    let (a, b) = (ScriptedHandler::ok(), ScriptedHandler::ok());
    let provider = provider(definition(OperationKind::Create, &[("A", &a), ("B", &b)]));
    let mut cluster = with_legacy_condition();
    let before = cluster.clone();

    let err = provider.on_create(&mut cluster).await.unwrap_err();
    assert!(matches!(err, ProvisionError::UnknownStep(ref name) if name == "legacyStep"));
    assert!(err.is_config_error());
    assert_eq!(cluster, before);
}
