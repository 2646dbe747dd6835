mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::json;

use noetl_world::db::models::{LogLevel, RunStatus, StepStatus, WorkflowRun, WorkflowStep};
use noetl_world::{PgStore, World, WorkflowStore, WorldConfig, WorldError};

use common::isolated_db;

#[tokio::test]
async fn completed_step_is_never_run_twice() {
    let Some(db) = isolated_db("memo").await else {
        return;
    };
    let world = World::new(PgStore::new(db.pool.clone()), WorldConfig::default());

    let run_id = world.start_run("wf1", &json!({"x": 1})).await.unwrap();
    let calls = AtomicUsize::new(0);

    let first = world
        .execute_task(&run_id, "s1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(42)
        })
        .await
        .unwrap();
    assert_eq!(first.value(), Some(&42));
    assert!(!first.cached);

    let second = world
        .execute_task(&run_id, "s1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(99)
        })
        .await
        .unwrap();
    assert_eq!(second.value(), Some(&42));
    assert!(second.cached);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let step = world.get_step(&run_id, "s1").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.output, Some(json!(42)));
    assert!(step.started_at.is_some());
    assert!(step.completed_at.is_some());

    world.complete_run(&run_id, &json!({"total": 42})).await.unwrap();
    let status = world.get_run_status(&run_id).await.unwrap();
    assert_eq!(status.status, RunStatus::Completed);
    assert_eq!((status.completed_steps, status.total_steps), (1, 1));

    world.close().await;
    db.teardown().await;
}

#[tokio::test]
async fn failed_step_records_error_and_retries() {
    let Some(db) = isolated_db("retry").await else {
        return;
    };
    let world = World::new(PgStore::new(db.pool.clone()), WorldConfig::default());
    let run_id = world.start_run("payments", &json!({})).await.unwrap();

    let failed = world
        .execute_task(&run_id, "charge", || async {
            Err::<i32, _>(anyhow::anyhow!("card declined"))
        })
        .await
        .unwrap();
    assert!(!failed.is_success());

    let step = world.get_step(&run_id, "charge").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    let error = step.error.unwrap();
    assert_eq!(error["message"], json!("card declined"));
    assert_eq!(error["name"], json!("Error"));

    let retried = world
        .execute_task_with_input(&run_id, "charge", &json!({"card": "backup"}), || async {
            Ok::<_, anyhow::Error>(7)
        })
        .await
        .unwrap();
    assert_eq!(retried.value(), Some(&7));

    let step = world.get_step(&run_id, "charge").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.retry_count, 1);
    assert_eq!(step.input, Some(json!({"card": "backup"})));
    // The earlier failure does not linger on the completed row.
    assert_eq!(step.error, None);

    world.fail_run(&run_id, &anyhow::anyhow!("gave up")).await.unwrap();
    assert!(matches!(
        world.complete_run(&run_id, &json!({})).await,
        Err(WorldError::Conflict(_))
    ));

    let run = world.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());

    world.close().await;
    db.teardown().await;
}

#[tokio::test]
async fn resume_reports_orphans_and_schedules() {
    let Some(db) = isolated_db("resume").await else {
        return;
    };
    let store = PgStore::new(db.pool.clone());
    let world = World::new(store.clone(), WorldConfig::default());
    let run_id = world.start_run("batch", &json!(null)).await.unwrap();

    world
        .execute_task(&run_id, "a", || async { Ok::<_, anyhow::Error>("done".to_string()) })
        .await
        .unwrap();
    // A process that died mid-task leaves the step running.
    store
        .upsert_step(&WorkflowStep::new(&run_id, "b", StepStatus::Running).started_at(Utc::now()))
        .await
        .unwrap();
    let due = world
        .schedule_task(&run_id, "c", &json!({"kind": "reminder"}), Duration::from_millis(1000))
        .await
        .unwrap()
        .unwrap();

    let resume = world.resume_run(&run_id).await.unwrap();
    assert_eq!(resume.last_completed_step.as_deref(), Some("a"));
    assert_eq!(resume.pending_steps.len(), 2);
    assert!(resume.pending_steps.contains(&"b".to_string()));
    assert!(resume.pending_steps.contains(&"c".to_string()));

    assert!(world.due_steps(Utc::now()).await.unwrap().is_empty());
    let ready = world.due_steps(due).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].step_id, "c");
    assert_eq!(ready[0].task_data, Some(json!({"kind": "reminder"})));

    // Re-driving the scheduled step clears its schedule.
    world
        .execute_task(&run_id, "c", || async { Ok::<_, anyhow::Error>(true) })
        .await
        .unwrap();
    assert!(world.due_steps(due).await.unwrap().is_empty());

    assert!(matches!(
        world.resume_run("run_missing").await,
        Err(WorldError::NotFound(_))
    ));

    world.close().await;
    db.teardown().await;
}

#[tokio::test]
async fn store_rejects_duplicates_and_orphans() {
    let Some(db) = isolated_db("store").await else {
        return;
    };
    let store = PgStore::new(db.pool.clone());
    store.migrate().await.unwrap();

    let run = WorkflowRun::new("run_dup", "wf", None);
    store.create_run(&run).await.unwrap();
    assert!(matches!(
        store.create_run(&run).await,
        Err(WorldError::Conflict(_))
    ));

    let orphan = WorkflowStep::new("run_ghost", "s1", StepStatus::Running);
    assert!(matches!(
        store.upsert_step(&orphan).await,
        Err(WorldError::NotFound(_))
    ));

    // Upsert keeps started_at when the incoming row has none.
    let started = Utc::now() - TimeDelta::minutes(5);
    store
        .upsert_step(&WorkflowStep::new("run_dup", "s1", StepStatus::Running).started_at(started))
        .await
        .unwrap();
    store
        .upsert_step(&WorkflowStep::new("run_dup", "s1", StepStatus::Scheduled))
        .await
        .unwrap();
    let step = store.get_step("run_dup", "s1").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Scheduled);
    assert_eq!(
        step.started_at.map(|t| t.timestamp_micros()),
        Some(started.timestamp_micros())
    );

    assert!(!store.update_run("run_ghost", &Default::default()).await.unwrap());

    store.close().await;
    db.teardown().await;
}

#[tokio::test]
async fn cleanup_and_logs() {
    let Some(db) = isolated_db("cleanup").await else {
        return;
    };
    let store = PgStore::new(db.pool.clone());
    let world = World::new(store.clone(), WorldConfig::default());
    let run_id = world.start_run("nightly", &json!({})).await.unwrap();

    let mut old_done = WorkflowRun::new("run_old_done", "nightly", None);
    old_done.status = RunStatus::Completed;
    old_done.created_at = Utc::now() - TimeDelta::days(45);
    store.create_run(&old_done).await.unwrap();
    store
        .upsert_step(&WorkflowStep::new("run_old_done", "s1", StepStatus::Completed))
        .await
        .unwrap();

    let mut old_paused = WorkflowRun::new("run_old_paused", "nightly", None);
    old_paused.status = RunStatus::Paused;
    old_paused.created_at = Utc::now() - TimeDelta::days(45);
    store.create_run(&old_paused).await.unwrap();

    assert_eq!(world.cleanup(None).await.unwrap(), 1);
    assert!(world.get_run("run_old_done").await.unwrap().is_none());
    assert!(world.get_steps("run_old_done").await.unwrap().is_empty());
    assert!(world.get_run("run_old_paused").await.unwrap().is_some());

    let runs = world.list_runs(Some("nightly"), None).await.unwrap();
    assert_eq!(runs.first().map(|r| r.id.as_str()), Some(run_id.as_str()));

    world
        .log(&run_id, None, LogLevel::Info, "started", None)
        .await
        .unwrap();
    world
        .log(&run_id, Some("s1"), LogLevel::Warn, "slow", Some(json!({"ms": 900})))
        .await
        .unwrap();
    let logs = world.get_logs(&run_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].level, LogLevel::Warn);
    assert_eq!(logs[1].step_id.as_deref(), Some("s1"));

    world.close().await;
    assert!(matches!(
        world.get_run(&run_id).await,
        Err(WorldError::Closed)
    ));
    db.teardown().await;
}
