use std::time::Duration;

use thiserror::Error;

use crate::{
    models::ClapTally,
    repository::{RepoError, RepositoryState},
};

/// How many times a conflicting applaud is attempted before giving up.
pub const MAX_APPLAUD_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ClapError {
    #[error("clap increment must be a positive integer (got {0})")]
    InvalidArgument(i64),

    #[error("post not found")]
    NotFound,

    /// The session's user id no longer exists in the store.
    #[error("user {0} does not exist")]
    UnknownUser(i64),

    /// Every attempt lost a write race; the caller may try again later.
    #[error("clap counter is busy, try again")]
    Unavailable,

    #[error("clap storage failure: {0}")]
    Storage(String),
}

/// ClapService
///
/// The engagement counter. Validation and retry live here; the atomic
/// upsert-and-increment itself is the repository's `applaud`.
#[derive(Clone)]
pub struct ClapService {
    repo: RepositoryState,
    max_attempts: u32,
}

impl ClapService {
    pub fn new(repo: RepositoryState) -> Self {
        Self::with_max_attempts(repo, MAX_APPLAUD_ATTEMPTS)
    }

    pub fn with_max_attempts(repo: RepositoryState, max_attempts: u32) -> Self {
        Self {
            repo,
            max_attempts: max_attempts.max(1),
        }
    }

    /// applaud
    ///
    /// Adds `delta` claps from `user_id` to `post_id` exactly once. A
    /// `Conflict` from storage means nothing was written, so the call is
    /// simply repeated.
    pub async fn applaud(&self, user_id: i64, post_id: i64, delta: i64) -> Result<ClapTally, ClapError> {
        if delta <= 0 {
            return Err(ClapError::InvalidArgument(delta));
        }

        let mut attempt = 1;
        loop {
            match self.repo.applaud(user_id, post_id, delta).await {
                Ok(tally) => {
                    tracing::debug!(
                        user_id,
                        post_id,
                        delta,
                        user_claps = tally.user_claps,
                        claps_total = tally.claps_total,
                        "applause recorded"
                    );
                    return Ok(tally);
                }
                Err(RepoError::Conflict) if attempt < self.max_attempts => {
                    tracing::warn!(post_id, attempt, "clap write conflict, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(RepoError::Conflict) => {
                    tracing::error!(post_id, attempts = attempt, "clap write conflict, giving up");
                    return Err(ClapError::Unavailable);
                }
                Err(RepoError::NotFound) => return Err(ClapError::NotFound),
                Err(RepoError::UnknownUser) => {
                    tracing::warn!(user_id, post_id, "applause from a user that no longer exists");
                    return Err(ClapError::UnknownUser(user_id));
                }
                Err(e) => return Err(ClapError::Storage(e.to_string())),
            }
        }
    }

    /// get_claps
    ///
    /// The post's aggregate counter, as last committed.
    pub async fn get_claps(&self, post_id: i64) -> Result<i64, ClapError> {
        match self.repo.get_post_claps(post_id).await {
            Ok(Some(total)) => Ok(total),
            Ok(None) | Err(RepoError::NotFound) => Err(ClapError::NotFound),
            Err(e) => Err(ClapError::Storage(e.to_string())),
        }
    }
}
