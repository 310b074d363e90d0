// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the workflow engine
//!
//! These tests drive complete executions through the registry:
//! 1. Sequential and parallel runs agree on results
//! 2. Dependencies gate launch order
//! 3. Failure policies and retries
//! 4. Pause, resume and cancel of live executions
//! 5. Status, history and per-execution event streams
//! 6. The bundled workflow manifests

mod common;

use async_trait::async_trait;
use common::{
    eventually, payload, register_failing, register_gated, register_recorder, strip_metadata,
    Journal,
};
use concord_core::application::registry::AgentRegistry;
use concord_core::application::workflow_engine::{EngineSettings, WorkflowEngine};
use concord_core::domain::agent::AgentWorker;
use concord_core::domain::events::WorkflowEvent;
use concord_core::domain::execution::{ExecutionId, ExecutionStatus};
use concord_core::domain::message::Payload;
use concord_core::domain::workflow::{
    DefinitionError, FailurePolicy, WorkflowDefinition, WorkflowError, WorkflowStep,
};
use concord_core::infrastructure::event_bus::{DomainEvent, EventBus};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn engine(registry: Arc<AgentRegistry>) -> Arc<WorkflowEngine> {
    Arc::new(
        WorkflowEngine::in_memory(registry).with_settings(EngineSettings {
            retry_backoff: Duration::from_millis(1),
            ..EngineSettings::default()
        }),
    )
}

fn chain(id: &str, parallel: bool) -> WorkflowDefinition {
    WorkflowDefinition::new(
        id,
        "Chain",
        vec![
            WorkflowStep::new("a", "alpha", payload(json!({ "seed": "from_input" }))),
            WorkflowStep::new("b", "beta", payload(json!({ "prev": "from_a" }))).depends_on(["a"]),
            WorkflowStep::new("c", "gamma", payload(json!({ "prev": "from_b", "first": "from_a" })))
                .depends_on(["b"]),
        ],
    )
    .parallel(parallel)
}

fn event_kind(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::ExecutionStarted { .. } => "execution_started".to_string(),
        WorkflowEvent::StepStarted { step_id, .. } => format!("step_started:{step_id}"),
        WorkflowEvent::StepCompleted { step_id, .. } => format!("step_completed:{step_id}"),
        WorkflowEvent::StepRetrying { step_id, .. } => format!("step_retrying:{step_id}"),
        WorkflowEvent::StepFailed { step_id, .. } => format!("step_failed:{step_id}"),
        WorkflowEvent::StepSkipped { step_id, .. } => format!("step_skipped:{step_id}"),
        WorkflowEvent::ExecutionPaused { .. } => "execution_paused".to_string(),
        WorkflowEvent::ExecutionResumed { .. } => "execution_resumed".to_string(),
        WorkflowEvent::ExecutionCompleted { .. } => "execution_completed".to_string(),
        WorkflowEvent::ExecutionFailed { .. } => "execution_failed".to_string(),
        WorkflowEvent::ExecutionCancelled { .. } => "execution_cancelled".to_string(),
    }
}

#[tokio::test]
async fn test_sequential_and_parallel_chains_agree() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    for agent in ["alpha", "beta", "gamma"] {
        register_recorder(&registry, agent, &journal, Duration::from_millis(2));
    }
    let engine = engine(registry);
    engine.create_workflow(chain("chain_seq", false)).await.unwrap();
    engine.create_workflow(chain("chain_par", true)).await.unwrap();

    let input = payload(json!({ "customer": "ACME" }));
    let sequential = engine.execute_workflow("chain_seq", input.clone()).await.unwrap();
    let parallel = engine.execute_workflow("chain_par", input).await.unwrap();

    for report in [&sequential, &parallel] {
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert!(report.result.workflow_completed);
        assert_eq!(report.result.steps_executed, 3);
        assert!(report.error.is_none());
    }

    let normalize = |results: &std::collections::BTreeMap<String, Payload>| {
        strip_metadata(&serde_json::to_value(results).unwrap())
    };
    assert_eq!(
        normalize(&sequential.result.step_results),
        normalize(&parallel.result.step_results)
    );

    // `from_input` names no step, so it is passed through untouched.
    let c = &sequential.result.step_results["c"];
    assert_eq!(c["input"]["prev"]["handled_by"], json!("beta"));
    assert_eq!(c["input"]["prev"]["input"]["prev"]["handled_by"], json!("alpha"));
    assert_eq!(c["input"]["first"]["input"]["seed"], json!("from_input"));
}

#[tokio::test]
async fn test_join_step_waits_for_every_dependency() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    register_recorder(&registry, "left", &journal, Duration::from_millis(30));
    register_recorder(&registry, "right", &journal, Duration::from_millis(10));
    register_recorder(&registry, "join", &journal, Duration::ZERO);
    let engine = engine(registry);

    engine
        .create_workflow(
            WorkflowDefinition::new(
                "fan_in",
                "Fan In",
                vec![
                    WorkflowStep::new("c", "join", Payload::new()).depends_on(["a", "b"]),
                    WorkflowStep::new("a", "left", Payload::new()),
                    WorkflowStep::new("b", "right", Payload::new()),
                ],
            )
            .parallel(true),
        )
        .await
        .unwrap();

    let report = engine.execute_workflow("fan_in", Payload::new()).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.result.steps_executed, 3);

    let start_join = journal.position("start:join");
    assert!(journal.position("end:left") < start_join);
    assert!(journal.position("end:right") < start_join);
    // Independent steps overlap.
    assert!(journal.position("start:right") < journal.position("end:left"));
}

#[tokio::test]
async fn test_continue_policy_runs_independent_steps() {
    for parallel in [false, true] {
        let registry = Arc::new(AgentRegistry::new());
        let journal = Journal::default();
        register_recorder(&registry, "steady", &journal, Duration::ZERO);
        register_recorder(&registry, "downstream", &journal, Duration::ZERO);
        let failures = register_failing(&registry, "broken");
        let engine = engine(registry);

        engine
            .create_workflow(
                WorkflowDefinition::new(
                    "best_effort",
                    "Best Effort",
                    vec![
                        WorkflowStep::new("x", "broken", Payload::new()).with_retry_count(1),
                        WorkflowStep::new("d", "steady", Payload::new()),
                        WorkflowStep::new("e", "downstream", Payload::new()).depends_on(["x"]),
                    ],
                )
                .parallel(parallel)
                .on_failure(FailurePolicy::Continue),
            )
            .await
            .unwrap();

        let report = engine.execute_workflow("best_effort", Payload::new()).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Completed, "parallel={parallel}");
        assert_eq!(report.result.failed_steps, vec!["x"]);
        assert_eq!(report.result.skipped_steps, vec!["e"]);
        assert!(report.result.step_results.contains_key("d"));
        assert!(!journal.contains("start:downstream"));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(report.error_log.iter().any(|e| e.step_id.as_deref() == Some("x")));
    }
}

#[tokio::test]
async fn test_stop_policy_fails_after_exact_attempts() {
    let events = EventBus::new(256);
    let mut receiver = events.subscribe();
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    let failures = register_failing(&registry, "broken");
    register_recorder(&registry, "later", &journal, Duration::ZERO);
    let engine = Arc::new(
        WorkflowEngine::in_memory(registry)
            .with_event_bus(events.clone())
            .with_settings(EngineSettings {
                retry_backoff: Duration::from_millis(1),
                ..EngineSettings::default()
            }),
    );

    engine
        .create_workflow(WorkflowDefinition::new(
            "strict",
            "Strict",
            vec![
                WorkflowStep::new("flaky", "broken", Payload::new()).with_retry_count(3),
                WorkflowStep::new("after", "later", Payload::new()),
            ],
        ))
        .await
        .unwrap();

    let report = engine.execute_workflow("strict", Payload::new()).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().code, "step_failed");
    assert_eq!(failures.load(Ordering::SeqCst), 3);
    assert!(!journal.contains("start:later"));

    let mut retries = 0;
    while let Ok(event) = receiver.try_recv() {
        if let DomainEvent::Workflow(WorkflowEvent::StepRetrying { attempt, .. }) = event {
            retries += 1;
            assert!(attempt < 3);
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_parallel_abort_lets_running_siblings_finish() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    register_recorder(&registry, "slow", &journal, Duration::from_millis(300));
    let failures = register_failing(&registry, "broken");
    register_recorder(&registry, "after", &journal, Duration::ZERO);
    let engine = engine(registry);

    engine
        .create_workflow(
            WorkflowDefinition::new(
                "abort",
                "Abort",
                vec![
                    WorkflowStep::new("s", "slow", Payload::new()),
                    WorkflowStep::new("x", "broken", Payload::new()).with_retry_count(1),
                    WorkflowStep::new("y", "after", Payload::new()).depends_on(["s"]),
                ],
            )
            .parallel(true)
            .on_failure(FailurePolicy::Stop),
        )
        .await
        .unwrap();

    let report = engine.execute_workflow("abort", Payload::new()).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().code, "step_failed");
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(!journal.contains("end:slow"));
    assert!(!report.result.step_results.contains_key("s"));

    eventually(|| journal.contains("end:slow")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!journal.contains("start:after"));
}

#[tokio::test]
async fn test_workflow_timeout_does_not_interrupt_running_step() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    register_recorder(&registry, "slow", &journal, Duration::from_millis(300));
    let engine = engine(registry);

    engine
        .create_workflow(
            WorkflowDefinition::new(
                "deadline",
                "Deadline",
                vec![WorkflowStep::new("s", "slow", Payload::new())],
            )
            .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let report = engine.execute_workflow("deadline", Payload::new()).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().code, "workflow_timeout");
    assert!(!journal.contains("end:slow"));

    eventually(|| journal.contains("end:slow")).await;
}

#[tokio::test]
async fn test_cyclic_workflow_is_rejected() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    register_recorder(&registry, "alpha", &journal, Duration::ZERO);
    let engine = engine(registry);

    let err = engine
        .create_workflow(
            WorkflowDefinition::new(
                "loop",
                "Loop",
                vec![
                    WorkflowStep::new("a", "alpha", Payload::new()).depends_on(["c"]),
                    WorkflowStep::new("b", "alpha", Payload::new()).depends_on(["a"]),
                    WorkflowStep::new("c", "alpha", Payload::new()).depends_on(["b"]),
                ],
            )
            .parallel(true),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "circular_dependency");
    assert!(matches!(
        err,
        WorkflowError::Definition(DefinitionError::CircularDependency { .. })
    ));
    assert!(matches!(
        engine.get_workflow("loop").await,
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pause_holds_next_step_until_resume() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    let gate = register_gated(&registry, "gated", &journal);
    register_recorder(&registry, "follow_up", &journal, Duration::ZERO);
    let engine = engine(registry);

    engine
        .create_workflow(WorkflowDefinition::new(
            "two_stage",
            "Two Stage",
            vec![
                WorkflowStep::new("first", "gated", Payload::new()),
                WorkflowStep::new("second", "follow_up", Payload::new()).depends_on(["first"]),
            ],
        ))
        .await
        .unwrap();

    let (execution_id, handle) = engine
        .start_workflow("two_stage", Payload::new())
        .await
        .unwrap();
    eventually(|| journal.contains("start:gated")).await;

    engine.pause_workflow(execution_id).await.unwrap();
    assert!(matches!(
        engine.pause_workflow(execution_id).await,
        Err(WorkflowError::InvalidState { .. })
    ));

    // The running step finishes while paused, the next one waits.
    gate.add_permits(1);
    eventually(|| journal.contains("end:gated")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = engine.get_workflow_status(execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Paused);
    assert_eq!(view.completed_steps, vec!["first"]);
    assert!(!journal.contains("start:follow_up"));

    engine.resume_workflow(execution_id).await.unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.result.steps_executed, 2);

    // Finished executions refuse further control.
    for outcome in [
        engine.pause_workflow(execution_id).await,
        engine.resume_workflow(execution_id).await,
        engine.cancel_workflow(execution_id).await,
    ] {
        assert!(matches!(outcome, Err(WorkflowError::InvalidState { .. })));
    }
    assert!(matches!(
        engine.resume_workflow(ExecutionId::new()).await,
        Err(WorkflowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_drains_running_steps_and_launches_nothing() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    let gate = register_gated(&registry, "gated", &journal);
    register_recorder(&registry, "follow_up", &journal, Duration::ZERO);
    let engine = engine(registry);

    engine
        .create_workflow(
            WorkflowDefinition::new(
                "cancellable",
                "Cancellable",
                vec![
                    WorkflowStep::new("slow", "gated", Payload::new()),
                    WorkflowStep::new("next", "follow_up", Payload::new()).depends_on(["slow"]),
                ],
            )
            .parallel(true),
        )
        .await
        .unwrap();

    let (execution_id, handle) = engine
        .start_workflow("cancellable", Payload::new())
        .await
        .unwrap();
    eventually(|| journal.contains("start:gated")).await;
    assert_eq!(engine.active_executions(), vec![execution_id]);

    engine.cancel_workflow(execution_id).await.unwrap();
    let view = engine.get_workflow_status(execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Cancelled);
    assert!(matches!(
        engine.cancel_workflow(execution_id).await,
        Err(WorkflowError::InvalidState { .. })
    ));

    gate.add_permits(1);
    let report = handle.await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert!(!journal.contains("start:follow_up"));
    assert!(engine.active_executions().is_empty());
}

#[tokio::test]
async fn test_status_and_history_track_finished_runs() {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    for agent in ["alpha", "beta", "gamma"] {
        register_recorder(&registry, agent, &journal, Duration::ZERO);
    }
    register_failing(&registry, "broken");
    let engine = engine(registry);
    engine.create_workflow(chain("chain", false)).await.unwrap();
    engine
        .create_workflow(WorkflowDefinition::new(
            "doomed",
            "Doomed",
            vec![WorkflowStep::new("only", "broken", Payload::new()).with_retry_count(1)],
        ))
        .await
        .unwrap();

    let first = engine.execute_workflow("chain", Payload::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = engine.execute_workflow("chain", Payload::new()).await.unwrap();
    let failed = engine.execute_workflow("doomed", Payload::new()).await.unwrap();

    let view = engine.get_workflow_status(first.execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(view.total_steps, 3);
    assert_eq!(view.progress_percentage, 100.0);
    assert!(view.ended_at.is_some());
    assert!(view.running_steps.is_empty());

    let history = engine.get_execution_history(Some("chain"), 10).await.unwrap();
    let ids: Vec<ExecutionId> = history.iter().map(|h| h.execution_id).collect();
    assert_eq!(ids, vec![second.execution_id, first.execution_id]);
    assert_eq!(history[0].steps_completed, 3);
    assert_eq!(history[0].error_count, 0);

    let everything = engine.get_execution_history(None, 10).await.unwrap();
    assert_eq!(everything.len(), 3);
    let doomed = everything
        .iter()
        .find(|h| h.execution_id == failed.execution_id)
        .unwrap();
    assert_eq!(doomed.status, ExecutionStatus::Failed);
    assert!(doomed.error_count >= 1);

    assert_eq!(engine.get_execution_history(None, 1).await.unwrap().len(), 1);
    assert!(matches!(
        engine.get_workflow_status(ExecutionId::new()).await,
        Err(WorkflowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_execution_event_stream_is_filtered() {
    let events = EventBus::new(256);
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    let gate = register_gated(&registry, "gated", &journal);
    register_recorder(&registry, "follow_up", &journal, Duration::ZERO);
    let engine = Arc::new(WorkflowEngine::in_memory(registry).with_event_bus(events.clone()));

    engine
        .create_workflow(WorkflowDefinition::new(
            "observed",
            "Observed",
            vec![
                WorkflowStep::new("first", "gated", Payload::new()),
                WorkflowStep::new("second", "follow_up", Payload::new()).depends_on(["first"]),
            ],
        ))
        .await
        .unwrap();

    let (watched, watched_handle) = engine.start_workflow("observed", Payload::new()).await.unwrap();
    let mut stream = events.subscribe_execution(watched);
    let (_other, other_handle) = engine.start_workflow("observed", Payload::new()).await.unwrap();
    gate.add_permits(2);

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.execution_id(), watched);
        let terminal = event.is_terminal();
        seen.push(event_kind(&event));
        if terminal {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            "step_started:first",
            "step_completed:first",
            "step_started:second",
            "step_completed:second",
            "execution_completed",
        ]
    );
    assert_eq!(watched_handle.await.unwrap().status, ExecutionStatus::Completed);
    assert_eq!(other_handle.await.unwrap().status, ExecutionStatus::Completed);
}

/// Approves a fixed number of expenses.
struct Approver {
    approved: u64,
}

#[async_trait]
impl AgentWorker for Approver {
    async fn process(&self, _input: Payload) -> anyhow::Result<Payload> {
        Ok(payload(json!({
            "approved_count": self.approved,
            "total_amount": 1250.0 * self.approved as f64,
        })))
    }
}

async fn builtin_engine(approved: u64) -> (Arc<WorkflowEngine>, Journal) {
    let registry = Arc::new(AgentRegistry::new());
    let journal = Journal::default();
    for agent in ["contract_analysis", "report_generation", "procurement_assistant"] {
        register_recorder(&registry, agent, &journal, Duration::ZERO);
    }
    registry.register("expense_approval", move |_| {
        Ok(Arc::new(Approver { approved }) as Arc<dyn AgentWorker>)
    });
    let engine = engine(registry);
    let installed = engine.install_default_workflows().await.unwrap();
    assert_eq!(installed.len(), 3);
    (engine, journal)
}

#[tokio::test]
async fn test_builtin_workflows_run_end_to_end() {
    let (engine, _journal) = builtin_engine(2).await;

    let summaries = engine.list_workflows().await.unwrap();
    let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["contract_review", "customer_onboarding", "expense_processing"]);

    let onboarding = engine
        .execute_workflow("customer_onboarding", payload(json!({ "customer_id": "C-42" })))
        .await
        .unwrap();
    assert_eq!(onboarding.status, ExecutionStatus::Completed);
    assert_eq!(onboarding.result.steps_executed, 3);
    let setup = &onboarding.result.step_results["setup_procurement"];
    assert_eq!(
        setup["input"]["customer_info"]["handled_by"],
        json!("contract_analysis")
    );

    let review = engine
        .execute_workflow("contract_review", Payload::new())
        .await
        .unwrap();
    assert_eq!(review.status, ExecutionStatus::Completed);
    assert_eq!(review.result.steps_executed, 3);

    let expenses = engine
        .execute_workflow("expense_processing", Payload::new())
        .await
        .unwrap();
    assert_eq!(expenses.status, ExecutionStatus::Completed);
    assert_eq!(expenses.result.steps_executed, 3);
    let budget = &expenses.result.step_results["update_procurement"];
    assert_eq!(budget["input"]["expense_data"]["approved_count"], json!(2));
}

#[tokio::test]
async fn test_expense_report_is_skipped_without_approvals() {
    let (engine, journal) = builtin_engine(0).await;

    let report = engine
        .execute_workflow("expense_processing", Payload::new())
        .await
        .unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.result.skipped_steps, vec!["generate_expense_report"]);
    assert_eq!(report.result.steps_executed, 2);
    assert!(!journal.contains("start:report_generation"));
    assert_eq!(
        report.result.step_results["validate_expenses"]["approved_count"],
        Value::from(0)
    );
}
