use crate::models::{Clap, ClapTally, NewUser, Post, Role, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

// Postgres SQLSTATE codes that mean "retry the whole transaction".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// RepoError
///
/// Storage failures the core needs to tell apart. Everything else is `Database`.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,

    /// A concurrent writer won; the operation had no effect and may be retried.
    #[error("write conflict")]
    Conflict,

    /// A unique constraint rejected the write.
    #[error("duplicate record")]
    Duplicate,

    /// The acting user id has no row in `users`.
    #[error("unknown user")]
    UnknownUser,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Duplicate,
            sqlx::Error::Database(db)
                if matches!(
                    db.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                RepoError::Conflict
            }
            _ => RepoError::Database(err.to_string()),
        }
    }
}

/// Repository Trait
///
/// The storage contract consumed by the identity and engagement core.
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credential Store ---
    async fn get_user(&self, id: i64) -> Result<Option<User>, RepoError>;
    // Exact, case-sensitive match.
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;
    // Fails with `Duplicate` when the username is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError>;
    // Newest first.
    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, RepoError>;
    async fn count_users(&self) -> Result<i64, RepoError>;
    async fn set_user_role(&self, id: i64, role: Role) -> Result<Option<User>, RepoError>;

    // --- Posts ---
    async fn get_post(&self, id: i64) -> Result<Option<Post>, RepoError>;
    async fn get_post_claps(&self, post_id: i64) -> Result<Option<i64>, RepoError>;

    // --- Engagement Counter ---
    async fn get_clap(&self, user_id: i64, post_id: i64) -> Result<Option<Clap>, RepoError>;

    /// Atomically find-or-creates the (user, post) clap record and adds `delta`
    /// to both its count and the post's `claps_total`. Either both counters
    /// move or neither does. Callers guarantee `delta > 0`.
    ///
    /// Fails with `NotFound` if the post does not exist, with `UnknownUser` if
    /// the user does not, and with `Conflict` if the write lost a race and was
    /// rolled back. Nothing is written on any failure.
    async fn applaud(&self, user_id: i64, post_id: i64, delta: i64) -> Result<ClapTally, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Row shape of `users`; `role` is stored as text.
#[derive(FromRow)]
struct UserRow {
    id: i64,
    name: String,
    username: String,
    password_hash: String,
    photo: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| RepoError::Database(e.to_string()))?;
        Ok(User {
            id: row.id,
            name: row.name,
            username: row.username,
            password_hash: row.password_hash,
            photo: row.photo,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, name, username, password_hash, photo, role, created_at, updated_at";
const POST_COLUMNS: &str =
    "id, user_id, title, description, content, image, pinned, claps_total, created_at, updated_at";

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL (schema in `migrations/`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    /// create_user
    ///
    /// Relies on the `users.username` unique constraint rather than a prior
    /// lookup, so two concurrent registrations of one name cannot both succeed.
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let sql = format!(
            "INSERT INTO users (name, username, password_hash, photo, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.name)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.photo)
            .bind(user.role.as_str())
            .fetch_one(&self.pool)
            .await?;
        User::try_from(row)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, RepoError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn count_users(&self) -> Result<i64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn set_user_role(&self, id: i64, role: Role) -> Result<Option<User>, RepoError> {
        let sql = format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        Ok(sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_post_claps(&self, post_id: i64) -> Result<Option<i64>, RepoError> {
        Ok(sqlx::query_scalar("SELECT claps_total FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_clap(&self, user_id: i64, post_id: i64) -> Result<Option<Clap>, RepoError> {
        Ok(sqlx::query_as::<_, Clap>(
            "SELECT user_id, post_id, count, created_at, updated_at FROM claps \
             WHERE user_id = $1 AND post_id = $2",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// applaud
    ///
    /// One transaction, two statements:
    /// 1. `UPDATE posts ... RETURNING` bumps the aggregate and takes the post's
    ///    row lock, so concurrent applauds on the same post queue up here.
    /// 2. `INSERT ... ON CONFLICT DO UPDATE` creates or bumps the per-user record
    ///    without a separate read.
    ///
    /// Lock order is always post row, then clap row. If the future is dropped
    /// before commit, the transaction is rolled back when `tx` is dropped.
    async fn applaud(&self, user_id: i64, post_id: i64, delta: i64) -> Result<ClapTally, RepoError> {
        let mut tx = self.pool.begin().await?;

        let claps_total: Option<i64> = sqlx::query_scalar(
            "UPDATE posts SET claps_total = claps_total + $2, updated_at = NOW() \
             WHERE id = $1 RETURNING claps_total",
        )
        .bind(post_id)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(claps_total) = claps_total else {
            tx.rollback().await?;
            return Err(RepoError::NotFound);
        };

        let user_claps: i64 = sqlx::query_scalar(
            "INSERT INTO claps (user_id, post_id, count, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (user_id, post_id) \
             DO UPDATE SET count = claps.count + EXCLUDED.count, updated_at = NOW() \
             RETURNING count",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::UnknownUser,
            _ => RepoError::from(e),
        })?;

        tx.commit().await?;

        Ok(ClapTally {
            user_claps,
            claps_total,
        })
    }
}

// --- In-Memory Implementation ---

/// InMemoryRepository
///
/// A process-local `Repository` for tests and local demos. It keeps the same
/// guarantees as the Postgres implementation: usernames are unique, and each
/// post's total and clap records sit behind one async mutex so an applaud
/// updates both or neither.
///
/// `inject_conflicts(n)` makes the next `n` applaud calls fail with
/// `RepoError::Conflict` without touching any counter.
pub struct InMemoryRepository {
    users: RwLock<UserTable>,
    posts: RwLock<HashMap<i64, Arc<Mutex<PostEntry>>>>,
    pending_conflicts: AtomicU32,
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    by_id: BTreeMap<i64, User>,
    by_username: HashMap<String, i64>,
}

struct PostEntry {
    post: Post,
    claps: HashMap<i64, Clap>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(UserTable {
                next_id: 1,
                ..UserTable::default()
            }),
            posts: RwLock::new(HashMap::new()),
            pending_conflicts: AtomicU32::new(0),
        }
    }

    /// Stores `post` as-is under its own id, replacing any previous post and its claps.
    pub async fn insert_post(&self, post: Post) {
        let entry = PostEntry {
            post,
            claps: HashMap::new(),
        };
        self.posts
            .write()
            .await
            .insert(entry.post.id, Arc::new(Mutex::new(entry)));
    }

    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Sum of `count` over every clap record of the post.
    pub async fn sum_of_claps(&self, post_id: i64) -> Option<i64> {
        let entry = self.posts.read().await.get(&post_id).cloned()?;
        let entry = entry.lock().await;
        Some(entry.claps.values().map(|c| c.count).sum())
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>, RepoError> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let users = self.users.read().await;
        Ok(users
            .by_username
            .get(username)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.write().await;
        if users.by_username.contains_key(&user.username) {
            return Err(RepoError::Duplicate);
        }

        let id = users.next_id;
        users.next_id += 1;
        let now = Utc::now();
        let created = User {
            id,
            name: user.name,
            username: user.username,
            password_hash: user.password_hash,
            photo: user.photo,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        users.by_username.insert(created.username.clone(), id);
        users.by_id.insert(id, created.clone());
        Ok(created)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, RepoError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let offset = usize::try_from(offset).unwrap_or(0);
        Ok(self
            .users
            .read()
            .await
            .by_id
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_users(&self) -> Result<i64, RepoError> {
        Ok(self.users.read().await.by_id.len() as i64)
    }

    async fn set_user_role(&self, id: i64, role: Role) -> Result<Option<User>, RepoError> {
        let mut users = self.users.write().await;
        Ok(users.by_id.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
        let Some(entry) = self.posts.read().await.get(&id).cloned() else {
            return Ok(None);
        };
        let entry = entry.lock().await;
        Ok(Some(entry.post.clone()))
    }

    async fn get_post_claps(&self, post_id: i64) -> Result<Option<i64>, RepoError> {
        Ok(self.get_post(post_id).await?.map(|post| post.claps_total))
    }

    async fn get_clap(&self, user_id: i64, post_id: i64) -> Result<Option<Clap>, RepoError> {
        let Some(entry) = self.posts.read().await.get(&post_id).cloned() else {
            return Ok(None);
        };
        let entry = entry.lock().await;
        Ok(entry.claps.get(&user_id).cloned())
    }

    async fn applaud(&self, user_id: i64, post_id: i64, delta: i64) -> Result<ClapTally, RepoError> {
        let entry = self
            .posts
            .read()
            .await
            .get(&post_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;

        if self.take_injected_conflict() {
            return Err(RepoError::Conflict);
        }
        if !self.users.read().await.by_id.contains_key(&user_id) {
            return Err(RepoError::UnknownUser);
        }

        let mut guard = entry.lock().await;
        let PostEntry { post, claps } = &mut *guard;

        // Compute both new values before writing either.
        let current = claps.get(&user_id).map_or(0, |c| c.count);
        let (Some(user_claps), Some(claps_total)) = (
            current.checked_add(delta),
            post.claps_total.checked_add(delta),
        ) else {
            return Err(RepoError::Database("clap counter overflow".to_string()));
        };

        let now = Utc::now();
        claps
            .entry(user_id)
            .and_modify(|clap| {
                clap.count = user_claps;
                clap.updated_at = now;
            })
            .or_insert_with(|| Clap {
                user_id,
                post_id,
                count: user_claps,
                created_at: now,
                updated_at: now,
            });
        post.claps_total = claps_total;
        post.updated_at = now;

        Ok(ClapTally {
            user_claps,
            claps_total,
        })
    }
}
