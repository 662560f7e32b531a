//! SQLite persistence for reviews and their comments.
//!
//! A [`ReviewStore`] only remembers where the database lives. Every unit of
//! work opens its own [`ReviewSession`], so a pipeline run never holds a
//! connection across its network calls. Status changes are conditional
//! updates that only match legal predecessor states, so the lifecycle
//! `queued -> in_progress -> completed | failed` is enforced by the store
//! itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use lookout_core::{LookoutError, NewReviewComment, Review, ReviewComment, ReviewStatus};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Input for creating a review directly, e.g. through the HTTP API.
///
/// Only the pipeline moves a review out of `queued` or `in_progress`, so a
/// record created this way must already be finished. The status defaults
/// to `completed`.
///
/// # Examples
///
/// ```
/// use lookout_core::ReviewStatus;
/// use lookout_review::store::NewReview;
///
/// let review: NewReview = serde_json::from_str(
///     r#"{"repo":"octo/app","pr_number":7,"summary":"manual"}"#,
/// ).unwrap();
/// assert_eq!(review.status, ReviewStatus::Completed);
/// assert!(review.comments.is_empty());
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub repo: String,
    pub pr_number: u64,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_manual_status")]
    pub status: ReviewStatus,
    #[serde(default)]
    pub comments: Vec<NewReviewComment>,
}

fn default_manual_status() -> ReviewStatus {
    ReviewStatus::Completed
}

impl NewReview {
    /// Reject records the pipeline would have to finish, and comment ranges
    /// that end before they start.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Validation`] describing the first problem.
    pub fn validate(&self) -> Result<(), LookoutError> {
        if !self.status.is_terminal() {
            return Err(LookoutError::Validation(format!(
                "status must be completed or failed, got {}",
                self.status
            )));
        }
        if let Some((index, c)) = self
            .comments
            .iter()
            .enumerate()
            .find(|(_, c)| c.line_end < c.line_start)
        {
            return Err(LookoutError::Validation(format!(
                "comments[{index}]: line_end {} is before line_start {}",
                c.line_end, c.line_start
            )));
        }
        Ok(())
    }
}

/// Handle to the review database.
///
/// Cheap to clone; clones share the same path.
#[derive(Debug, Clone)]
pub struct ReviewStore {
    path: Arc<PathBuf>,
}

impl ReviewStore {
    /// Open or create the database at `path` and make sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] if the file cannot be created or
    /// the schema cannot be applied.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout_review::store::ReviewStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = ReviewStore::open(&dir.path().join("reviews.db")).unwrap();
    /// assert!(!store.session().unwrap().has_any_reviews().unwrap());
    /// ```
    pub fn open(path: &Path) -> Result<Self, LookoutError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LookoutError::Database(format!("failed to create database directory: {e}"))
            })?;
        }
        let store = Self {
            path: Arc::new(path.to_path_buf()),
        };
        let session = store.session()?;
        session
            .conn
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        session.init_schema()?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] if the connection cannot be opened.
    pub fn session(&self) -> Result<ReviewSession, LookoutError> {
        let conn = Connection::open(self.path.as_path())
            .map_err(|e| LookoutError::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err)?;
        Ok(ReviewSession { conn })
    }

    /// Run `f` against a fresh session on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`LookoutError::Database`] if the
    /// session cannot be opened or the blocking task is lost.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, LookoutError>
    where
        T: Send + 'static,
        F: FnOnce(&ReviewSession) -> Result<T, LookoutError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let session = store.session()?;
            f(&session)
        })
        .await
        .map_err(|e| LookoutError::Database(format!("storage task failed: {e}")))?
    }
}

/// One connection to the review database.
pub struct ReviewSession {
    conn: Connection,
}

impl ReviewSession {
    fn init_schema(&self) -> Result<(), LookoutError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS reviews (
                    id TEXT PRIMARY KEY,
                    repo TEXT NOT NULL,
                    pr_number INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_reviews_created_at ON reviews(created_at);
                CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);

                CREATE TABLE IF NOT EXISTS review_comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    review_id TEXT NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
                    file_path TEXT NOT NULL,
                    line_start INTEGER NOT NULL,
                    line_end INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    severity TEXT NOT NULL DEFAULT 'info'
                );

                CREATE INDEX IF NOT EXISTS idx_review_comments_review ON review_comments(review_id);
                ",
            )
            .map_err(|e| LookoutError::Database(format!("failed to initialize schema: {e}")))
    }

    /// Insert a new review with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn create_review(
        &self,
        repo: &str,
        pr_number: u64,
        status: ReviewStatus,
        summary: &str,
    ) -> Result<Review, LookoutError> {
        let review = Review {
            id: uuid::Uuid::new_v4().to_string(),
            repo: repo.to_string(),
            pr_number,
            status,
            summary: summary.to_string(),
            created_at: now(),
            comments: Vec::new(),
        };
        insert_review(&self.conn, &review)?;
        Ok(review)
    }

    /// Insert a finished review together with its comments in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Validation`] if `new` fails
    /// [`NewReview::validate`] (nothing is written), or
    /// [`LookoutError::Database`] on SQLite failures.
    pub fn create_review_with_comments(&self, new: &NewReview) -> Result<Review, LookoutError> {
        new.validate()?;
        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        let mut review = Review {
            id: uuid::Uuid::new_v4().to_string(),
            repo: new.repo.clone(),
            pr_number: new.pr_number,
            status: new.status,
            summary: new.summary.clone(),
            created_at: now(),
            comments: Vec::new(),
        };
        insert_review(&tx, &review)?;
        review.comments = insert_comments(&tx, &review.id, &new.comments)?;
        tx.commit().map_err(db_err)?;
        Ok(review)
    }

    /// Load a review and its comments.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn get_review(&self, id: &str) -> Result<Option<Review>, LookoutError> {
        let review = self
            .conn
            .query_row(
                "SELECT id, repo, pr_number, status, summary, created_at FROM reviews WHERE id = ?1",
                params![id],
                map_review_row,
            )
            .optional()
            .map_err(db_err)?;
        match review {
            Some(mut review) => {
                review.comments = self.comments_for(&review.id)?;
                Ok(Some(review))
            }
            None => Ok(None),
        }
    }

    /// Reviews newest first, each with its comments.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn list_reviews(&self, limit: Option<usize>) -> Result<Vec<Review>, LookoutError> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, repo, pr_number, status, summary, created_at FROM reviews
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], map_review_row)
            .map_err(db_err)?;

        let mut reviews = Vec::new();
        for row in rows {
            let mut review = row.map_err(db_err)?;
            review.comments = self.comments_for(&review.id)?;
            reviews.push(review);
        }
        Ok(reviews)
    }

    /// Whether at least one review exists.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn has_any_reviews(&self) -> Result<bool, LookoutError> {
        self.conn
            .query_row("SELECT EXISTS(SELECT 1 FROM reviews)", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Current status of a review, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn status_of(&self, id: &str) -> Result<Option<ReviewStatus>, LookoutError> {
        status_in(&self.conn, id)
    }

    /// Move a queued review to `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::NotFound`] for an unknown id and
    /// [`LookoutError::InvalidTransition`] if the review is not queued.
    pub fn mark_in_progress(&self, id: &str) -> Result<(), LookoutError> {
        transition(&self.conn, id, ReviewStatus::InProgress, None)
    }

    /// Mark an in-progress review completed, replacing its summary and
    /// appending its comments atomically.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::NotFound`] or [`LookoutError::InvalidTransition`]
    /// if the review is not in progress; nothing is written in that case.
    pub fn complete(
        &self,
        id: &str,
        summary: &str,
        comments: &[NewReviewComment],
    ) -> Result<Vec<ReviewComment>, LookoutError> {
        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        transition(&tx, id, ReviewStatus::Completed, Some(summary))?;
        let stored = insert_comments(&tx, id, comments)?;
        tx.commit().map_err(db_err)?;
        Ok(stored)
    }

    /// Fail a review that never finished, walking a queued review through
    /// `in_progress` first. Terminal reviews are left untouched.
    ///
    /// Returns `true` if the review was moved to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn abandon(&self, id: &str, summary: &str) -> Result<bool, LookoutError> {
        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        let abandoned = match status_in(&tx, id)? {
            Some(ReviewStatus::Queued) => {
                transition(&tx, id, ReviewStatus::InProgress, None)?;
                transition(&tx, id, ReviewStatus::Failed, Some(summary))?;
                true
            }
            Some(ReviewStatus::InProgress) => {
                transition(&tx, id, ReviewStatus::Failed, Some(summary))?;
                true
            }
            Some(_) | None => false,
        };
        tx.commit().map_err(db_err)?;
        Ok(abandoned)
    }

    /// Fail every review left `queued` or `in_progress`, returning how many
    /// were affected.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Database`] on SQLite failures.
    pub fn reconcile_interrupted(&self, summary: &str) -> Result<usize, LookoutError> {
        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE reviews SET status = ?1 WHERE status = ?2",
            params![ReviewStatus::InProgress.as_str(), ReviewStatus::Queued.as_str()],
        )
        .map_err(db_err)?;
        let failed = tx
            .execute(
                "UPDATE reviews SET status = ?1, summary = ?2 WHERE status = ?3",
                params![
                    ReviewStatus::Failed.as_str(),
                    summary,
                    ReviewStatus::InProgress.as_str()
                ],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(failed)
    }

    fn comments_for(&self, review_id: &str) -> Result<Vec<ReviewComment>, LookoutError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, review_id, file_path, line_start, line_end, message, severity
                 FROM review_comments WHERE review_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![review_id], map_comment_row)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn insert_review(conn: &Connection, review: &Review) -> Result<(), LookoutError> {
    let pr_number = i64::try_from(review.pr_number)
        .map_err(|_| LookoutError::Database(format!("PR number out of range: {}", review.pr_number)))?;
    conn.execute(
        "INSERT INTO reviews (id, repo, pr_number, status, summary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            review.id,
            review.repo,
            pr_number,
            review.status.as_str(),
            review.summary,
            to_rfc3339(&review.created_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_comments(
    conn: &Connection,
    review_id: &str,
    comments: &[NewReviewComment],
) -> Result<Vec<ReviewComment>, LookoutError> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO review_comments (review_id, file_path, line_start, line_end, message, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(db_err)?;
    let mut stored = Vec::with_capacity(comments.len());
    for comment in comments {
        stmt.execute(params![
            review_id,
            comment.file_path,
            comment.line_start,
            comment.line_end,
            comment.message,
            comment.severity.to_string(),
        ])
        .map_err(db_err)?;
        stored.push(ReviewComment {
            id: conn.last_insert_rowid(),
            review_id: review_id.to_string(),
            file_path: comment.file_path.clone(),
            line_start: comment.line_start,
            line_end: comment.line_end,
            message: comment.message.clone(),
            severity: comment.severity,
        });
    }
    Ok(stored)
}

/// Conditional status update. Only rows currently in one of the legal
/// predecessor states of `to` are touched.
fn transition(
    conn: &Connection,
    id: &str,
    to: ReviewStatus,
    summary: Option<&str>,
) -> Result<(), LookoutError> {
    let from = to.predecessors();
    let placeholders = vec!["?"; from.len()].join(", ");
    let changed = if from.is_empty() {
        0
    } else {
        let sql = match summary {
            Some(_) => format!(
                "UPDATE reviews SET status = ?, summary = ? WHERE id = ? AND status IN ({placeholders})"
            ),
            None => format!("UPDATE reviews SET status = ? WHERE id = ? AND status IN ({placeholders})"),
        };
        let mut values: Vec<&str> = vec![to.as_str()];
        values.extend(summary);
        values.push(id);
        values.extend(from.iter().map(|s| s.as_str()));
        conn.execute(&sql, params_from_iter(values)).map_err(db_err)?
    };

    if changed > 0 {
        return Ok(());
    }
    match status_in(conn, id)? {
        Some(current) => Err(LookoutError::InvalidTransition { from: current, to }),
        None => Err(LookoutError::NotFound(format!("review {id}"))),
    }
}

fn status_in(conn: &Connection, id: &str) -> Result<Option<ReviewStatus>, LookoutError> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM reviews WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)?;
    status
        .map(|s| s.parse().map_err(LookoutError::Database))
        .transpose()
}

fn map_review_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    let pr_number: i64 = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(Review {
        id: row.get(0)?,
        repo: row.get(1)?,
        pr_number: u64::try_from(pr_number).map_err(|e| conversion_err(2, e))?,
        status: status
            .parse()
            .map_err(|e: String| conversion_err(3, e))?,
        summary: row.get(4)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion_err(5, e))?
            .with_timezone(&Utc),
        comments: Vec::new(),
    })
}

fn map_comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewComment> {
    let severity: String = row.get(6)?;
    Ok(ReviewComment {
        id: row.get(0)?,
        review_id: row.get(1)?,
        file_path: row.get(2)?,
        line_start: row.get(3)?,
        line_end: row.get(4)?,
        message: row.get(5)?,
        severity: severity
            .parse()
            .map_err(|e: String| conversion_err(6, e))?,
    })
}

fn conversion_err(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err.into())
}

/// Current time at the precision stored in the database.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn to_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn db_err(e: rusqlite::Error) -> LookoutError {
    LookoutError::Database(e.to_string())
}
