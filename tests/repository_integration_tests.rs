//! Postgres-backed repository tests. Run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use chrono::Utc;
use clap_blog::{
    models::{NewUser, Role, User},
    repository::{PostgresRepository, RepoError, Repository},
};
use sqlx::PgPool;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

// --- Test Context and Setup ---

/// A simple structure to hold the database pool for testing
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A username no other test run has used.
fn unique_username(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!(
        "{prefix}-{}-{n}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn create_test_user(repo: &PostgresRepository, role: Role) -> User {
    repo.create_user(NewUser {
        name: "Test User".to_string(),
        username: unique_username("user"),
        password_hash: "$argon2id$placeholder".to_string(),
        photo: String::new(),
        role,
    })
    .await
    .expect("Failed to create test user")
}

/// Inserts a post directly; posts have no write path in the repository.
async fn create_test_post(pool: &PgPool, user_id: i64, claps_total: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO posts (user_id, title, claps_total) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(user_id)
    .bind("Test Post")
    .bind(claps_total)
    .fetch_one(pool)
    .await
    .expect("Failed to create test post")
}

async fn sum_of_claps(pool: &PgPool, post_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COALESCE(SUM(count), 0)::BIGINT FROM claps WHERE post_id = $1")
        .bind(post_id)
        .fetch_one(pool)
        .await
        .expect("Failed to sum claps")
}

// --- Credential Store ---

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_create_and_fetch_user() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User).await;

    let by_id = repo.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(by_id.username, user.username);
    assert_eq!(by_id.role, Role::User);

    let by_name = repo
        .get_user_by_username(&user.username)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_name.id, user.id);

    // Exact match only.
    let upper = user.username.to_uppercase();
    assert!(repo.get_user_by_username(&upper).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_duplicate_username_is_rejected() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User).await;

    let duplicate = repo
        .create_user(NewUser {
            name: "Impostor".to_string(),
            username: user.username.clone(),
            password_hash: "$argon2id$other".to_string(),
            photo: String::new(),
            role: Role::User,
        })
        .await;
    assert!(matches!(duplicate, Err(RepoError::Duplicate)));
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_set_user_role() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User).await;

    let updated = repo.set_user_role(user.id, Role::Admin).await.unwrap().unwrap();
    assert_eq!(updated.role, Role::Admin);
    assert!(repo.set_user_role(-1, Role::Admin).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_list_and_count_users() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    create_test_user(&repo, Role::User).await;
    let newest = create_test_user(&repo, Role::User).await;

    assert!(repo.count_users().await.unwrap() >= 2);
    let first_page = repo.list_users(1, 0).await.unwrap();
    assert_eq!(first_page.len(), 1);
    assert!(first_page[0].id >= newest.id);
}

// --- Engagement Counter ---

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_applaud_upserts_and_increments() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User).await;
    let post_id = create_test_post(&ctx.pool, user.id, 0).await;

    let first = repo.applaud(user.id, post_id, 1).await.unwrap();
    assert_eq!((first.user_claps, first.claps_total), (1, 1));

    let second = repo.applaud(user.id, post_id, 4).await.unwrap();
    assert_eq!((second.user_claps, second.claps_total), (5, 5));

    let record = repo.get_clap(user.id, post_id).await.unwrap().unwrap();
    assert_eq!(record.count, 5);
    assert_eq!(repo.get_post_claps(post_id).await.unwrap(), Some(5));
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_applaud_missing_post_writes_nothing() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User).await;

    let result = repo.applaud(user.id, i64::MAX, 1).await;
    assert!(matches!(result, Err(RepoError::NotFound)));
    assert!(repo.get_clap(user.id, i64::MAX).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_applaud_unknown_user_writes_nothing() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let author = create_test_user(&repo, Role::User).await;
    let post_id = create_test_post(&ctx.pool, author.id, 3).await;
    let ghost = i64::MAX;

    let result = repo.applaud(ghost, post_id, 1).await;
    assert!(matches!(result, Err(RepoError::UnknownUser)));
    assert!(repo.get_clap(ghost, post_id).await.unwrap().is_none());
    assert_eq!(repo.get_post_claps(post_id).await.unwrap(), Some(3));
    assert_eq!(sum_of_claps(&ctx.pool, post_id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_applaud_cancelled_while_waiting_for_lock_writes_nothing() {
    let ctx = DbTestContext::setup().await;
    let repo = Arc::new(ctx.repository());
    let user = create_test_user(&repo, Role::User).await;
    let post_id = create_test_post(&ctx.pool, user.id, 0).await;

    // Hold the post's row lock from another session.
    let mut holder = ctx.pool.begin().await.unwrap();
    sqlx::query("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
        .bind(post_id)
        .execute(&mut *holder)
        .await
        .unwrap();

    let waiting = {
        let repo = repo.clone();
        let user_id = user.id;
        tokio::spawn(async move { repo.applaud(user_id, post_id, 1).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished(), "applaud should be blocked on the row lock");

    waiting.abort();
    assert!(waiting.await.unwrap_err().is_cancelled());

    holder.rollback().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(repo.get_post_claps(post_id).await.unwrap(), Some(0));
    assert_eq!(sum_of_claps(&ctx.pool, post_id).await, 0);
    assert!(repo.get_clap(user.id, post_id).await.unwrap().is_none());

    // The abandoned transaction left no lock behind.
    let tally = tokio::time::timeout(Duration::from_secs(5), repo.applaud(user.id, post_id, 1))
        .await
        .expect("applaud blocked after cancellation")
        .unwrap();
    assert_eq!((tally.user_claps, tally.claps_total), (1, 1));
    assert_eq!(sum_of_claps(&ctx.pool, post_id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_concurrent_applauds_keep_total_equal_to_sum() {
    let ctx = DbTestContext::setup().await;
    let repo = Arc::new(ctx.repository());

    let mut users = Vec::new();
    for _ in 0..5 {
        users.push(create_test_user(&repo, Role::User).await);
    }
    let post_id = create_test_post(&ctx.pool, users[0].id, 0).await;

    let mut handles = Vec::new();
    for user in &users {
        for _ in 0..20 {
            let repo = repo.clone();
            let user_id = user.id;
            handles.push(tokio::spawn(async move {
                repo.applaud(user_id, post_id, 1).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().expect("applaud failed");
    }

    for user in &users {
        let record = repo.get_clap(user.id, post_id).await.unwrap().unwrap();
        assert_eq!(record.count, 20);
    }
    assert_eq!(repo.get_post_claps(post_id).await.unwrap(), Some(100));
    assert_eq!(sum_of_claps(&ctx.pool, post_id).await, 100);
}
