use chrono::Utc;
use uuid::Uuid;

use super::*;
use crate::job::{JobStat, JobType, RunStatus};

fn job(id: &str, parents: &[&str]) -> Job {
    Job {
        id: id.to_string(),
        name: format!("job-{id}"),
        owner: String::new(),
        job_type: JobType::Local,
        disabled: false,
        schedule: if parents.is_empty() {
            "R1/2030-01-01T00:00:00Z/PT1S".to_string()
        } else {
            String::new()
        },
        retries: 0,
        epsilon: String::new(),
        parent_jobs: parents.iter().map(|p| p.to_string()).collect(),
        dependent_jobs: Vec::new(),
        command: "true".to_string(),
        args: Vec::new(),
        env: Default::default(),
        remote_properties: Default::default(),
        created_at: Some(Utc::now()),
        state: Default::default(),
        next_run_at: None,
        next_remaining: None,
        metadata: Default::default(),
    }
}

#[test]
fn test_insert_and_get() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    assert!(cache.contains("a"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("a").unwrap().name, "job-a");
    assert!(cache.get("missing").is_none());
}

#[test]
fn test_insert_duplicate_id_rejected() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    let err = cache.insert(job("a", &[])).unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));
}

#[test]
fn test_insert_unknown_parent_rejected() {
    let cache = JobCache::new();
    let err = cache.insert(job("child", &["ghost"])).unwrap_err();
    assert!(matches!(err, Error::UnknownJob(_)));
}

#[test]
fn test_dependent_edge_symmetry() {
    let cache = JobCache::new();
    cache.insert(job("p", &[])).unwrap();
    cache.insert(job("q", &["p"])).unwrap();

    let parent = cache.get("p").unwrap();
    assert_eq!(parent.dependent_jobs, vec!["q".to_string()]);

    cache.delete("q").unwrap();
    let parent = cache.get("p").unwrap();
    assert!(parent.dependent_jobs.is_empty());
}

#[test]
fn test_cycle_rejected() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    cache.insert(job("b", &["a"])).unwrap();
    cache.insert(job("c", &["b"])).unwrap();

    // a -> b -> c -> a closes a cycle through the parents relation.
    let mut a = cache.get("a").unwrap();
    a.parent_jobs = vec!["c".to_string()];
    let err = cache.replace(a).unwrap_err();
    assert!(matches!(err, Error::CycleDetected(_)));

    // No state change: a still has no parents, c still depends on b.
    assert!(cache.get("a").unwrap().parent_jobs.is_empty());
    assert_eq!(cache.get("b").unwrap().dependent_jobs, vec!["c".to_string()]);
}

#[test]
fn test_self_cycle_rejected() {
    let cache = JobCache::new();
    let id = Uuid::new_v4().to_string();
    let mut j = job(&id, &[]);
    j.parent_jobs = vec![id.clone()];
    let err = cache.insert(j).unwrap_err();
    assert!(matches!(err, Error::CycleDetected(_)));
    assert!(cache.is_empty());
}

#[test]
fn test_replace_preserves_dependents_and_moves_edges() {
    let cache = JobCache::new();
    cache.insert(job("p1", &[])).unwrap();
    cache.insert(job("p2", &[])).unwrap();
    cache.insert(job("mid", &["p1"])).unwrap();
    cache.insert(job("leaf", &["mid"])).unwrap();

    let mut mid = cache.get("mid").unwrap();
    mid.parent_jobs = vec!["p2".to_string()];
    cache.replace(mid).unwrap();

    assert!(cache.get("p1").unwrap().dependent_jobs.is_empty());
    assert_eq!(cache.get("p2").unwrap().dependent_jobs, vec!["mid".to_string()]);
    // Dependents of the replaced job survive.
    assert_eq!(cache.get("mid").unwrap().dependent_jobs, vec!["leaf".to_string()]);
}

#[test]
fn test_replace_unknown_job() {
    let cache = JobCache::new();
    let err = cache.replace(job("nope", &[])).unwrap_err();
    assert!(matches!(err, Error::UnknownJob(_)));
}

#[test]
fn test_update_mutates_in_place() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    cache
        .update("a", |j| j.metadata.success_count = 7)
        .unwrap();
    assert_eq!(cache.get("a").unwrap().metadata.success_count, 7);

    let err = cache.update("missing", |_| ()).unwrap_err();
    assert!(matches!(err, Error::UnknownJob(_)));
}

#[test]
fn test_all_snapshot_iterates_under_guard() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    cache.insert(job("b", &[])).unwrap();

    let snapshot = cache.all();
    let mut ids: Vec<_> = snapshot.keys().cloned().collect();
    ids.sort();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_runs_append_in_order() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();

    let t0 = Utc::now();
    let first = JobStat::start("a", t0);
    let second = JobStat::start("a", t0 + chrono::Duration::seconds(1));
    cache.add_run(first.clone());
    cache.add_run(second.clone());

    let runs = cache.runs_for("a");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, first.id);
    assert_eq!(runs[1].id, second.id);
    assert!(cache.runs_for("other").is_empty());
}

#[test]
fn test_update_run() {
    let cache = JobCache::new();
    let mut stat = JobStat::start("a", Utc::now());
    cache.add_run(stat.clone());

    stat.status = RunStatus::Success;
    cache.update_run(stat.clone()).unwrap();
    assert_eq!(cache.get_run(&stat.id).unwrap().status, RunStatus::Success);

    let orphan = JobStat::start("a", Utc::now());
    assert!(matches!(
        cache.update_run(orphan),
        Err(Error::UnknownRun(_))
    ));
}

#[test]
fn test_delete_drops_runs() {
    let cache = JobCache::new();
    cache.insert(job("a", &[])).unwrap();
    let stat = JobStat::start("a", Utc::now());
    cache.add_run(stat.clone());

    cache.delete("a").unwrap();
    assert!(cache.get_run(&stat.id).is_none());
    assert!(cache.runs_for("a").is_empty());
}

#[test]
fn test_rebuild_dependents() {
    let cache = JobCache::new();
    let mut p = job("p", &[]);
    p.dependent_jobs = vec!["stale".to_string()];
    cache.install_recovered(p);
    cache.install_recovered(job("q", &["p"]));

    cache.rebuild_dependents();
    assert_eq!(cache.get("p").unwrap().dependent_jobs, vec!["q".to_string()]);
}
