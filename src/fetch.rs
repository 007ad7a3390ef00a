//! Retrying download of one remote resource to one local file.
//!
//! A fetch streams the response body into a `.part` sibling of the destination
//! and renames it into place once the write is flushed, so the destination
//! only ever holds a complete body. Failed attempts clean up the `.part` file
//! and never touch an existing destination.
//!
//! # Failure classification
//!
//! - **404**: terminal. Returned as [`FetchOutcome::NotFound`] immediately.
//! - **Anything else** (connect error, 5xx, broken body, disk error): transient.
//!   Retried after a fixed delay until the attempt budget runs out, then
//!   surfaced as [`FetchError::Exhausted`] (or [`FetchError::Io`]).
//!
//! The delay does not grow between attempts.
//!
//! [`Fetcher::fetch_checked`] adds a size plausibility loop on top, for
//! servers that answer 200 with a truncated placeholder under load.

use crate::error::FetchError;
use crate::utils::{ensure_parent, part_path, remove_if_exists};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Result of a fetch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination now holds the full body.
    Success { bytes: u64 },
    /// The server answered 404. Nothing was written.
    NotFound,
}

/// Attempt budget and fixed delay for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Outer retry loop that rejects bodies smaller than `min_bytes`.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    pub min_bytes: u64,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self {
            min_bytes: 5_000_000,
            max_attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Http(reqwest::Error),
    Io(io::Error),
}

impl AttemptError {
    fn is_not_found(&self) -> bool {
        matches!(self, AttemptError::Http(e) if e.status() == Some(StatusCode::NOT_FOUND))
    }
}

impl From<io::Error> for AttemptError {
    fn from(e: io::Error) -> Self {
        AttemptError::Io(e)
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Http(e) => write!(f, "{e}"),
            AttemptError::Io(e) => write!(f, "{e}"),
        }
    }
}

/// Downloads through the session's authenticated client.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Download `url` to `dest`, retrying transient failures.
    ///
    /// The body is streamed into `dest.part` and renamed onto `dest` only
    /// after the last byte is flushed. A failed attempt removes the `.part`
    /// file and leaves any earlier `dest` untouched.
    ///
    /// # Arguments
    ///
    /// * `url` - Resource to GET through the session client
    /// * `dest` - Final path; its parent directories are created as needed
    ///
    /// # Returns
    ///
    /// [`FetchOutcome::Success`] with the byte count, or
    /// [`FetchOutcome::NotFound`] after a single 404.
    ///
    /// # Errors
    ///
    /// [`FetchError::Exhausted`] once `max_attempts` transient failures have
    /// happened, or [`FetchError::Io`] when the last failure was local.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let fetcher = Fetcher::new(session.client().clone(), RetryPolicy::default());
    /// match fetcher.fetch(&thumb_url, &key.thumbnail_path(root)).await? {
    ///     FetchOutcome::Success { bytes } => debug!(bytes, "Issue exists"),
    ///     FetchOutcome::NotFound => return Ok(IssueStatus::Missing),
    /// }
    /// ```
    #[instrument(level = "debug", skip(self), fields(dest = %dest.display()))]
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome, FetchError> {
        match self.download(url, dest).await? {
            Some(bytes) => {
                commit(dest).await?;
                Ok(FetchOutcome::Success { bytes })
            }
            None => Ok(FetchOutcome::NotFound),
        }
    }

    /// [`Fetcher::fetch`], repeated while the body is smaller than
    /// `guard.min_bytes`.
    ///
    /// The size is checked on the `.part` file, so an undersized body never
    /// appears at `dest`.
    #[instrument(level = "debug", skip(self, guard), fields(dest = %dest.display()))]
    pub async fn fetch_checked(
        &self,
        url: &str,
        dest: &Path,
        guard: &SizeGuard,
    ) -> Result<FetchOutcome, FetchError> {
        let max_attempts = guard.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let Some(size) = self.download(url, dest).await? else {
                return Ok(FetchOutcome::NotFound);
            };

            if size >= guard.min_bytes {
                commit(dest).await?;
                return Ok(FetchOutcome::Success { bytes: size });
            }

            warn!(
                %url,
                attempt,
                max = max_attempts,
                size,
                min = guard.min_bytes,
                "Body implausibly small; discarding"
            );
            discard(dest).await;
            if attempt < max_attempts {
                sleep(guard.delay).await;
            }
        }

        Err(FetchError::Integrity {
            url: url.to_string(),
            attempts: max_attempts,
            min_bytes: guard.min_bytes,
        })
    }

    /// One-shot GET of a text page.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Retry loop that leaves a complete body at `dest.part`. `None` on 404.
    async fn download(&self, url: &str, dest: &Path) -> Result<Option<u64>, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.attempt(url, dest).await {
                Ok(bytes) => {
                    debug!(%url, attempt, bytes, "Fetched");
                    return Ok(Some(bytes));
                }
                Err(e) => e,
            };

            discard(dest).await;

            if err.is_not_found() {
                warn!(%url, "Resource not found");
                return Ok(None);
            }

            if attempt >= max_attempts {
                error!(%url, attempt, error = %err, "Fetch exhausted retries");
                return Err(match err {
                    AttemptError::Http(source) => FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source,
                    },
                    AttemptError::Io(source) => FetchError::Io {
                        path: dest.to_path_buf(),
                        source,
                    },
                });
            }

            warn!(
                %url,
                attempt,
                max = max_attempts,
                delay = ?self.policy.backoff,
                error = %err,
                "Fetch attempt failed; retrying"
            );
            sleep(self.policy.backoff).await;
        }
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Result<u64, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(AttemptError::Http)?;

        ensure_parent(dest).await?;
        let mut file = fs::File::create(part_path(dest)).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(AttemptError::Http)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Move a finished `.part` body onto `dest`.
async fn commit(dest: &Path) -> Result<(), FetchError> {
    let part = part_path(dest);
    if let Err(source) = fs::rename(&part, dest).await {
        discard(dest).await;
        return Err(FetchError::Io {
            path: dest.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Remove the `.part` file a failed or rejected attempt left behind.
async fn discard(dest: &Path) {
    let part = part_path(dest);
    if let Err(e) = remove_if_exists(&part).await {
        warn!(path = %part.display(), error = %e, "Could not remove partial file");
    }
}
