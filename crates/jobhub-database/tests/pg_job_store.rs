//! PostgreSQL job store tests.
//!
//! These run against a real database and are skipped unless
//! `JOBHUB_TEST_DATABASE_URL` points at one.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use jobhub_database::JobRepository;
use jobhub_database::migration::run_migrations;
use jobhub_database::store::JobStore;
use jobhub_entity::job::{DequeueOptions, FairScheduling, Job, JobStatus, NewJob};

const VISIBILITY: Duration = Duration::from_secs(60);

async fn repository() -> Option<JobRepository> {
    let url = std::env::var("JOBHUB_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url)
        .await
        .expect("Failed to connect to test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Some(JobRepository::new(pool))
}

/// A tenant id unique to one test, so tests can share the table.
fn tenant() -> String {
    format!("tenant-{}", Uuid::new_v4())
}

fn new_job(user: &str, job_type: &str) -> Job {
    Job::from_new(NewJob::new(user, job_type), 3, Utc::now())
}

#[tokio::test]
async fn test_claim_filtered_type_then_empty() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    for _ in 0..3 {
        repo.insert(&new_job(&user, "fetch-bookmark-metadata"))
            .await
            .unwrap();
    }
    repo.insert(&new_job(&user, "other")).await.unwrap();

    let options = DequeueOptions::batch(10)
        .for_user(&user)
        .of_type("fetch-bookmark-metadata");
    let claimed = repo.claim(&options, VISIBILITY).await.unwrap();
    assert_eq!(claimed.len(), 3);
    assert!(claimed.iter().all(|j| j.status == JobStatus::InProgress));
    assert!(claimed.iter().all(|j| j.retry_count == 1));

    let again = repo.claim(&options, VISIBILITY).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_fifo_claim_follows_batch_order() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    let now = Utc::now();
    let batch: Vec<Job> = (0..20)
        .map(|i| Job::from_new(NewJob::new(&user, format!("t{i:02}")), 3, now))
        .collect();
    repo.insert_batch(&batch).await.unwrap();

    let options = DequeueOptions::batch(5).for_user(&user);
    let first = repo.claim(&options, VISIBILITY).await.unwrap();
    let types: Vec<&str> = first.iter().map(|j| j.job_type.as_str()).collect();
    assert_eq!(types, vec!["t00", "t01", "t02", "t03", "t04"]);

    let rest = repo
        .claim(&DequeueOptions::batch(20).for_user(&user), VISIBILITY)
        .await
        .unwrap();
    let types: Vec<String> = rest.iter().map(|j| j.job_type.clone()).collect();
    let expected: Vec<String> = (5..20).map(|i| format!("t{i:02}")).collect();
    assert_eq!(types, expected);
}

#[tokio::test]
async fn test_concurrent_claims_never_overlap() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    let batch: Vec<Job> = (0..40).map(|_| new_job(&user, "t")).collect();
    assert_eq!(repo.insert_batch(&batch).await.unwrap(), 40);

    let claims = (0..8).map(|_| {
        let repo = repo.clone();
        let options = DequeueOptions::batch(7)
            .for_user(&user)
            .with_scheduling(FairScheduling::Random);
        async move { repo.claim(&options, VISIBILITY).await.unwrap() }
    });
    let results = futures::future::join_all(claims).await;

    let mut seen = HashSet::new();
    for job in results.into_iter().flatten() {
        assert!(seen.insert(job.id), "job {} claimed twice", job.id);
    }
    assert_eq!(seen.len(), 40);
}

#[tokio::test]
async fn test_expired_claim_is_reclaimable() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    let job = repo.insert(&new_job(&user, "t")).await.unwrap();
    let options = DequeueOptions::batch(1).for_user(&user);

    repo.claim(&options, Duration::ZERO).await.unwrap();
    let reclaimed = repo.claim(&options, VISIBILITY).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, job.id);
    assert_eq!(reclaimed[0].retry_count, 2);

    assert!(repo.claim(&options, VISIBILITY).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ack_batch_rolls_back_on_unknown_id() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    let job = repo.insert(&new_job(&user, "t")).await.unwrap();

    let err = repo
        .complete(&[job.id, Uuid::new_v4()], true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(repo.find_by_id(job.id).await.unwrap().is_some());

    repo.complete(&[job.id], false).await.unwrap();
    let done = repo.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
}

#[tokio::test]
async fn test_fail_and_count() {
    let Some(repo) = repository().await else {
        return;
    };
    let user = tenant();
    let job = repo.insert(&new_job(&user, "t")).await.unwrap();
    repo.insert(&new_job(&user, "t")).await.unwrap();

    repo.fail(job.id, Some("no handler")).await.unwrap();
    let failed = repo.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("no handler"));

    let mut rows = repo.count_by_type_and_status(&user).await.unwrap();
    rows.sort_by_key(|(_, status, _)| status.as_str());
    assert_eq!(
        rows,
        vec![
            ("t".to_string(), JobStatus::Failed, 1),
            ("t".to_string(), JobStatus::Pending, 1),
        ]
    );

    assert!(repo.fail(Uuid::new_v4(), None).await.unwrap_err().is_not_found());
}
