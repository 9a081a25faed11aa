use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::*;
use crate::clock::VirtualClock;
use crate::job::{JobStat, JobType, Metadata, RemoteProperties};
use crate::store::MemoryStore;

fn options() -> SchedulerOptions {
    SchedulerOptions {
        retry_delay: Duration::from_secs(1),
        grace: Duration::from_millis(200),
    }
}

fn scheduler_with(store: Arc<MemoryStore>) -> Scheduler {
    let clock: SharedClock = Arc::new(VirtualClock::new(Utc::now()));
    Scheduler::new(store, clock, options())
}

fn scheduler() -> Scheduler {
    scheduler_with(Arc::new(MemoryStore::new()))
}

fn local_job(name: &str, schedule: String, command: &str, args: &[&str]) -> Job {
    Job {
        id: String::new(),
        name: name.to_string(),
        owner: String::new(),
        job_type: JobType::Local,
        disabled: false,
        schedule,
        retries: 0,
        epsilon: String::new(),
        parent_jobs: Vec::new(),
        dependent_jobs: Vec::new(),
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: Default::default(),
        remote_properties: RemoteProperties::default(),
        created_at: None,
        state: Default::default(),
        next_run_at: None,
        next_remaining: None,
        metadata: Metadata::default(),
    }
}

/// Poll until `f` holds. The paused-clock sleeps advance virtual time; the
/// short blocking naps give real I/O (child processes, sockets) room to
/// complete while the virtual clock is frozen.
async fn wait_until(what: &str, mut f: impl FnMut() -> bool) {
    for i in 0..3000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        if i % 10 == 0 {
            let _ = tokio::task::spawn_blocking(|| {
                std::thread::sleep(std::time::Duration::from_millis(1))
            })
            .await;
        }
    }
    panic!("timed out waiting for: {what}");
}

/// Let background tasks run for a bounded slice of virtual time.
async fn settle() {
    for _ in 0..25 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
    }
}

/// One-connection-at-a-time HTTP stub answering with `codes` in order,
/// then 200 forever.
async fn scripted_http(codes: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let status = codes.get(served).copied().unwrap_or("200 OK");
            served += 1;
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let body = "done";
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(resp.as_bytes()).await;
        }
    });
    format!("http://{addr}/hook")
}

#[tokio::test(start_paused = true)]
async fn test_repeat_schedule_fires_three_times() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let schedule = format!("R3/{}/PT1S", start.to_rfc3339());
    let id = sched
        .add_job(local_job("triple-echo", schedule, "echo", &["hi"]))
        .await
        .unwrap();

    wait_until("three successful runs", || {
        sched
            .cache()
            .runs_for(&id)
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count()
            == 3
    })
    .await;

    let runs = sched.cache().runs_for(&id);
    assert_eq!(runs.len(), 3);
    for run in &runs {
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output, "hi\n");
        assert_eq!(run.number_of_retries, 0);
    }
    // Fire times land on schedule multiples, strictly increasing.
    assert!(runs[0].ran_at < runs[1].ran_at);
    assert!(runs[1].ran_at < runs[2].ran_at);
    assert!((runs[1].ran_at - runs[0].ran_at).num_seconds() >= 1);

    wait_until("schedule exhausted", || {
        sched
            .cache()
            .get(&id)
            .is_some_and(|j| j.next_run_at.is_none() && j.next_remaining == Some(0))
    })
    .await;

    let job = sched.cache().get(&id).unwrap();
    assert_eq!(job.metadata.success_count, 3);
    assert_eq!(job.metadata.error_count, 0);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_in_the_past_fires_immediately_once() {
    let sched = scheduler();
    let start = sched.clock().now() - chrono::Duration::seconds(10);
    let schedule = format!("R1/{}/PT1H", start.to_rfc3339());
    let id = sched
        .add_job(local_job("late-one-shot", schedule, "echo", &["ran"]))
        .await
        .unwrap();

    wait_until("one successful run", || {
        sched
            .cache()
            .runs_for(&id)
            .iter()
            .any(|r| r.status == RunStatus::Success)
    })
    .await;
    settle().await;

    let runs = sched.cache().runs_for(&id);
    assert_eq!(runs.len(), 1);
    let job = sched.cache().get(&id).unwrap();
    assert_eq!(job.next_remaining, Some(0));
    assert!(job.next_run_at.is_none());

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_rolls_into_one_stat() {
    let url = scripted_http(vec!["500 Internal Server Error", "500 Internal Server Error"]).await;

    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let mut job = local_job("flaky-remote", format!("R1/{}/PT1S", start.to_rfc3339()), "", &[]);
    job.job_type = JobType::Remote;
    job.command = String::new();
    job.retries = 2;
    job.epsilon = "PT1S".to_string();
    job.remote_properties = RemoteProperties {
        url,
        method: "GET".to_string(),
        ..Default::default()
    };
    let id = sched.add_job(job).await.unwrap();

    wait_until("retried run succeeds", || {
        sched
            .cache()
            .runs_for(&id)
            .iter()
            .any(|r| r.status == RunStatus::Success)
    })
    .await;

    settle().await;
    let runs = sched.cache().runs_for(&id);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].number_of_retries, 2);
    // Two epsilon backoffs of one second each sit inside the duration.
    assert!(runs[0].execution_duration_ms >= 2000);

    let job = sched.cache().get(&id).unwrap();
    assert_eq!(job.metadata.success_count, 1);
    assert_eq!(job.metadata.error_count, 0);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_with_retries_exhausted_counts_once() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let mut job = local_job("always-fails", format!("R1/{}/PT1S", start.to_rfc3339()), "false", &[]);
    job.retries = 2;
    job.epsilon = "PT1S".to_string();
    let id = sched.add_job(job).await.unwrap();

    wait_until("run fails terminally", || {
        sched
            .cache()
            .runs_for(&id)
            .iter()
            .any(|r| r.status == RunStatus::Failed)
    })
    .await;

    settle().await;
    let runs = sched.cache().runs_for(&id);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].number_of_retries, 2);

    let job = sched.cache().get(&id).unwrap();
    assert_eq!(job.metadata.error_count, 1);
    assert_eq!(job.metadata.success_count, 0);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dependent_fires_after_parent_success() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let parent_id = sched
        .add_job(local_job(
            "parent",
            format!("R1/{}/PT1S", start.to_rfc3339()),
            "echo",
            &["p"],
        ))
        .await
        .unwrap();

    let mut child = local_job("child", String::new(), "echo", &["q"]);
    child.parent_jobs = vec![parent_id.clone()];
    let child_id = sched.add_job(child).await.unwrap();

    wait_until("child ran after parent", || {
        sched
            .cache()
            .runs_for(&child_id)
            .iter()
            .any(|r| r.status == RunStatus::Success)
    })
    .await;

    let parent_runs = sched.cache().runs_for(&parent_id);
    let child_runs = sched.cache().runs_for(&child_id);
    assert_eq!(parent_runs.len(), 1);
    assert_eq!(child_runs.len(), 1);

    let parent_done = parent_runs[0].ran_at
        + chrono::Duration::milliseconds(parent_runs[0].execution_duration_ms as i64);
    assert!(child_runs[0].ran_at >= parent_done);

    settle().await;
    let child = sched.cache().get(&child_id).unwrap();
    assert_eq!(child.state, JobState::BlockedOnParents);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_parent_success_events_equal_dependent_executions() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let parent_id = sched
        .add_job(local_job(
            "repeating-parent",
            format!("R2/{}/PT1S", start.to_rfc3339()),
            "echo",
            &["p"],
        ))
        .await
        .unwrap();

    let mut child = local_job("counting-child", String::new(), "echo", &["q"]);
    child.parent_jobs = vec![parent_id.clone()];
    let child_id = sched.add_job(child).await.unwrap();

    wait_until("child ran twice", || {
        sched
            .cache()
            .runs_for(&child_id)
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count()
            == 2
    })
    .await;
    settle().await;

    assert_eq!(sched.cache().runs_for(&parent_id).len(), 2);
    assert_eq!(sched.cache().runs_for(&child_id).len(), 2);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disable_cancels_pending_timer() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(10);
    let id = sched
        .add_job(local_job(
            "soon-disabled",
            format!("R1/{}/PT1S", start.to_rfc3339()),
            "echo",
            &["never"],
        ))
        .await
        .unwrap();

    sched.disable_job(&id).await.unwrap();
    let job = sched.cache().get(&id).unwrap();
    assert!(job.disabled);
    assert_eq!(job.state, JobState::Disabled);
    assert!(job.next_run_at.is_none());

    tokio::time::advance(Duration::from_secs(20)).await;
    settle().await;

    assert!(sched.cache().runs_for(&id).is_empty());

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_enable_re_arms() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let mut job = local_job("starts-dark", format!("R1/{}/PT1S", start.to_rfc3339()), "echo", &["x"]);
    job.disabled = true;
    let id = sched.add_job(job).await.unwrap();

    settle().await;
    assert!(sched.cache().runs_for(&id).is_empty());

    sched.enable_job(&id).await.unwrap();
    wait_until("fired after enable", || {
        !sched.cache().runs_for(&id).is_empty()
    })
    .await;

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_now_fires_and_consumes_a_slot() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::hours(5);
    let id = sched
        .add_job(local_job(
            "manual",
            format!("R2/{}/PT1H", start.to_rfc3339()),
            "echo",
            &["go"],
        ))
        .await
        .unwrap();

    sched.run_now(&id).await.unwrap();
    wait_until("manual fire landed", || {
        sched
            .cache()
            .runs_for(&id)
            .iter()
            .any(|r| r.status == RunStatus::Success)
    })
    .await;

    let job = sched.cache().get(&id).unwrap();
    assert_eq!(job.next_remaining, Some(1));

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_cascades_to_dependents() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::hours(1);
    let parent_id = sched
        .add_job(local_job(
            "root",
            format!("R1/{}/PT1S", start.to_rfc3339()),
            "echo",
            &["r"],
        ))
        .await
        .unwrap();

    let mut mid = local_job("mid", String::new(), "echo", &["m"]);
    mid.parent_jobs = vec![parent_id.clone()];
    let mid_id = sched.add_job(mid).await.unwrap();

    let mut leaf = local_job("leaf", String::new(), "echo", &["l"]);
    leaf.parent_jobs = vec![mid_id.clone()];
    let leaf_id = sched.add_job(leaf).await.unwrap();

    sched.delete_job(&parent_id).await.unwrap();

    assert!(sched.cache().get(&parent_id).is_none());
    assert!(sched.cache().get(&mid_id).is_none());
    assert!(sched.cache().get(&leaf_id).is_none());
    assert!(sched.cache().is_empty());

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cycle_insertion_leaves_registry_unchanged() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::hours(1);
    let a = sched
        .add_job(local_job("a", format!("R1/{}/PT1S", start.to_rfc3339()), "echo", &["a"]))
        .await
        .unwrap();
    let mut b = local_job("b", String::new(), "echo", &["b"]);
    b.parent_jobs = vec![a.clone()];
    let b_id = sched.add_job(b).await.unwrap();

    let mut update = sched.cache().get(&a).unwrap();
    update.parent_jobs = vec![b_id.clone()];
    let err = sched.replace_job(&a, update).await.unwrap_err();
    assert!(matches!(err, Error::CycleDetected(_)));

    assert!(sched.cache().get(&a).unwrap().parent_jobs.is_empty());
    assert_eq!(sched.cache().get(&a).unwrap().dependent_jobs, vec![b_id]);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_crash_recovery_rewrites_running_runs() {
    let store = Arc::new(MemoryStore::new());
    let clock: SharedClock = Arc::new(VirtualClock::new(Utc::now()));
    let now = clock.now();

    let mut job = local_job(
        "survivor",
        format!("R1/{}/PT1S", (now + chrono::Duration::hours(1)).to_rfc3339()),
        "echo",
        &["s"],
    );
    job.id = "11111111-2222-3333-4444-555555555555".to_string();
    job.created_at = Some(now - chrono::Duration::hours(2));
    store.save_job(&job).await.unwrap();

    let stale = JobStat::start(&job.id, now - chrono::Duration::minutes(3));
    store.save_run(&stale).await.unwrap();

    let sched = Scheduler::new(store.clone(), clock, options());
    sched.start().await.unwrap();

    let fixed = store.get_run(&stale.id).await.unwrap().unwrap();
    assert_eq!(fixed.status, RunStatus::Failed);
    assert_eq!(fixed.output, "process exited");
    assert_eq!(fixed.execution_duration_ms, 3 * 60 * 1000);

    let cached = sched.cache().get_run(&stale.id).unwrap();
    assert_eq!(cached.status, RunStatus::Failed);

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_re_arms_persisted_jobs() {
    let store = Arc::new(MemoryStore::new());

    {
        let sched = scheduler_with(store.clone());
        let start = sched.clock().now() + chrono::Duration::seconds(1);
        sched
            .add_job(local_job(
                "comes-back",
                format!("R0/{}/PT1S", start.to_rfc3339()),
                "echo",
                &["tick"],
            ))
            .await
            .unwrap();
        sched.shutdown().await;
    }

    let sched = scheduler_with(store.clone());
    sched.start().await.unwrap();

    let snapshot: Vec<_> = sched.cache().all().values().cloned().collect();
    assert_eq!(snapshot.len(), 1);
    let id = snapshot[0].id.clone();

    wait_until("job fires after restart", || {
        !sched.cache().runs_for(&id).is_empty()
    })
    .await;

    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_run_status_duration_rules() {
    let sched = scheduler();
    let now = sched.clock().now();
    let run = JobStat::start("some-job", now - chrono::Duration::seconds(30));
    sched.cache().add_run(run.clone());
    sched
        .inner
        .store
        .save_run(&run)
        .await
        .unwrap();

    // Terminal status landing on a running record recomputes the duration.
    sched
        .update_run_status(&run.id, RunStatus::Failed)
        .await
        .unwrap();
    let got = sched.cache().get_run(&run.id).unwrap();
    assert_eq!(got.status, RunStatus::Failed);
    assert_eq!(got.execution_duration_ms, 30_000);

    // A second overwrite leaves the recorded duration alone.
    sched
        .update_run_status(&run.id, RunStatus::Success)
        .await
        .unwrap();
    let got = sched.cache().get_run(&run.id).unwrap();
    assert_eq!(got.status, RunStatus::Success);
    assert_eq!(got.execution_duration_ms, 30_000);

    let err = sched
        .update_run_status("missing", RunStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownRun(_)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_refuses_new_jobs() {
    let sched = scheduler();
    sched.shutdown().await;

    let start = Utc::now() + chrono::Duration::hours(1);
    let err = sched
        .add_job(local_job("late", format!("R1/{}/PT1S", start.to_rfc3339()), "echo", &["x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test(start_paused = true)]
async fn test_stats_snapshot() {
    let sched = scheduler();
    let start = sched.clock().now() + chrono::Duration::seconds(1);
    let a = sched
        .add_job(local_job("st-a", format!("R1/{}/PT1S", start.to_rfc3339()), "echo", &["1"]))
        .await
        .unwrap();
    let b = sched
        .add_job(local_job(
            "st-b",
            format!("R1/{}/PT1S", (start + chrono::Duration::hours(1)).to_rfc3339()),
            "echo",
            &["2"],
        ))
        .await
        .unwrap();
    sched.disable_job(&b).await.unwrap();

    wait_until("first job succeeded", || {
        sched
            .cache()
            .runs_for(&a)
            .iter()
            .any(|r| r.status == RunStatus::Success)
    })
    .await;
    settle().await;

    let stats = sched.stats();
    assert_eq!(stats.jobs, 2);
    assert_eq!(stats.active_jobs, 1);
    assert_eq!(stats.disabled_jobs, 1);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.error_count, 0);
    assert!(stats.last_attempted_run.is_some());
    assert_eq!(stats.created_at, sched.created_at());

    sched.shutdown().await;
}
