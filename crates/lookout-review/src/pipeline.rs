use std::sync::Arc;

use lookout_core::{GeneratedReview, LookoutConfig, LookoutError, ReviewEvent};
use tracing::Instrument;

use crate::auth::{AppAuthenticator, InstallationTokens};
use crate::generator::{LlmReviewGenerator, ReviewGenerator};
use crate::github::{format_review_body, GitHubClient, PullRequestSource, ReviewPublisher};
use crate::store::ReviewStore;

/// One accepted webhook delivery, ready to be reviewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewJob {
    pub review_id: String,
    /// Repository full name, `owner/repo`.
    pub repo: String,
    pub pr_number: u64,
    pub installation_id: u64,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The review was missing or no longer queued; nothing was done.
    Skipped,
    /// Findings were published and stored.
    Completed { comments: usize },
    /// The review was marked failed with this summary.
    Failed(String),
}

/// External services a pipeline run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tokens: Arc<dyn InstallationTokens>,
    pub source: Arc<dyn PullRequestSource>,
    pub generator: Arc<dyn ReviewGenerator>,
    pub publisher: Arc<dyn ReviewPublisher>,
}

impl Collaborators {
    /// GitHub App and OpenAI-compatible implementations built from config.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] if an HTTP client cannot be built.
    pub fn from_config(config: &LookoutConfig) -> Result<Self, LookoutError> {
        let github = Arc::new(GitHubClient::new(&config.github)?);
        Ok(Self {
            tokens: Arc::new(AppAuthenticator::new(&config.github)?),
            source: github.clone(),
            generator: Arc::new(LlmReviewGenerator::new(&config.llm)?),
            publisher: github,
        })
    }
}

/// Drives one review from `queued` to `completed` or `failed`.
///
/// Stages run strictly in sequence: installation token, PR metadata,
/// changed files, model review, publish, persist. The first failing stage
/// ends the run and its error is recorded on the review as
/// `"Review failed: <error>"`. Comments are only stored after the review
/// has been published.
pub struct ReviewOrchestrator {
    store: ReviewStore,
    services: Collaborators,
    max_files: usize,
}

impl ReviewOrchestrator {
    pub fn new(store: ReviewStore, services: Collaborators, max_files: usize) -> Self {
        Self {
            store,
            services,
            max_files,
        }
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    /// Run the pipeline for `job`. Never returns an error: every failure
    /// after the review is picked up ends in a `failed` review.
    pub async fn run(&self, job: ReviewJob) -> RunOutcome {
        let span = tracing::info_span!(
            "review_run",
            review_id = %job.review_id,
            repo = %job.repo,
            pr = job.pr_number,
        );
        self.run_inner(job).instrument(span).await
    }

    async fn run_inner(&self, job: ReviewJob) -> RunOutcome {
        let review_id = job.review_id.clone();
        let started = self
            .store
            .with_session(move |session| match session.mark_in_progress(&review_id) {
                Ok(()) => Ok(true),
                Err(LookoutError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            })
            .await;

        match started {
            Ok(true) => tracing::info!("review started"),
            Ok(false) => {
                tracing::info!("review no longer exists, skipping");
                return RunOutcome::Skipped;
            }
            Err(e @ LookoutError::InvalidTransition { .. }) => {
                tracing::warn!(error = %e, "review is not queued, skipping");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(error = %e, "could not start review");
                return self.record_failure(&job.review_id, &e).await;
            }
        }

        let result = match self.execute(&job).await {
            Ok(review) => self.record_success(&job.review_id, review).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(comments) => {
                tracing::info!(comments, "review completed");
                RunOutcome::Completed { comments }
            }
            Err(e) => {
                tracing::warn!(error = %e, "review failed");
                self.record_failure(&job.review_id, &e).await
            }
        }
    }

    async fn execute(&self, job: &ReviewJob) -> Result<GeneratedReview, LookoutError> {
        let services = &self.services;

        let token = services
            .tokens
            .mint_installation_token(job.installation_id)
            .await?;
        let pr = services
            .source
            .fetch_pull_request(&job.repo, job.pr_number, &token)
            .await?;
        let files = services
            .source
            .fetch_pull_files(&job.repo, job.pr_number, &token, self.max_files)
            .await?;
        tracing::debug!(files = files.len(), "fetched pull request");

        let review = services.generator.generate(&pr, &files).await?;

        let body = format_review_body(&review);
        services
            .publisher
            .publish(&job.repo, job.pr_number, &token, &body, ReviewEvent::Comment)
            .await?;
        tracing::debug!("review published");

        Ok(review)
    }

    async fn record_success(
        &self,
        review_id: &str,
        review: GeneratedReview,
    ) -> Result<usize, LookoutError> {
        let review_id = review_id.to_string();
        self.store
            .with_session(move |session| {
                session
                    .complete(&review_id, &review.summary, &review.comments)
                    .map(|stored| stored.len())
            })
            .await
    }

    async fn record_failure(&self, review_id: &str, error: &LookoutError) -> RunOutcome {
        let summary = failure_summary(error);
        let id = review_id.to_string();
        let stored_summary = summary.clone();
        let recorded = self
            .store
            .with_session(move |session| session.abandon(&id, &stored_summary))
            .await;
        if let Err(e) = recorded {
            tracing::error!(error = %e, "could not record review failure");
        }
        RunOutcome::Failed(summary)
    }
}

/// Summary stored on a review whose run failed.
pub fn failure_summary(error: &impl std::fmt::Display) -> String {
    format!("Review failed: {error}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use lookout_core::{
        FileDiff, FileStatus, InstallationToken, NewReviewComment, PullRequestMeta, ReviewStatus,
        Severity,
    };
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct FakeTokens {
        minted: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl InstallationTokens for FakeTokens {
        async fn mint_installation_token(
            &self,
            installation_id: u64,
        ) -> Result<InstallationToken, LookoutError> {
            let mut minted = self.minted.lock().unwrap();
            minted.push(installation_id);
            if self.fail {
                return Err(LookoutError::Auth("token issuance failed with 401".into()));
            }
            Ok(InstallationToken::new(format!("ghs_{}", minted.len())))
        }
    }

    #[derive(Default)]
    struct FakeSource {
        limits: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PullRequestSource for FakeSource {
        async fn fetch_pull_request(
            &self,
            _repo: &str,
            pr_number: u64,
            _token: &InstallationToken,
        ) -> Result<PullRequestMeta, LookoutError> {
            Ok(PullRequestMeta {
                number: pr_number,
                title: "Add cache".into(),
                body: None,
                html_url: None,
            })
        }

        async fn fetch_pull_files(
            &self,
            _repo: &str,
            _pr_number: u64,
            _token: &InstallationToken,
            limit: usize,
        ) -> Result<Vec<FileDiff>, LookoutError> {
            self.limits.lock().unwrap().push(limit);
            Ok(vec![FileDiff {
                path: "src/cache.rs".into(),
                status: FileStatus::Added,
                patch: Some("+struct Cache;".into()),
            }])
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        entered: Option<Arc<Notify>>,
        release: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl ReviewGenerator for FakeGenerator {
        async fn generate(
            &self,
            _pr: &PullRequestMeta,
            _files: &[FileDiff],
        ) -> Result<GeneratedReview, LookoutError> {
            if let (Some(entered), Some(release)) = (&self.entered, &self.release) {
                entered.notify_one();
                release.notified().await;
            }
            Ok(GeneratedReview {
                summary: "One finding.".into(),
                comments: vec![NewReviewComment {
                    file_path: "src/cache.rs".into(),
                    line_start: 1,
                    line_end: 1,
                    message: "Cache is never evicted.".into(),
                    severity: Severity::Warning,
                }],
            })
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        bodies: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ReviewPublisher for FakePublisher {
        async fn publish(
            &self,
            _repo: &str,
            _pr_number: u64,
            _token: &InstallationToken,
            body: &str,
            event: ReviewEvent,
        ) -> Result<(), LookoutError> {
            assert_eq!(event, ReviewEvent::Comment);
            self.bodies.lock().unwrap().push(body.to_string());
            if self.fail {
                return Err(LookoutError::Publish(
                    "failed to post review: GitHub API error 500".into(),
                ));
            }
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        store: ReviewStore,
        tokens: Arc<FakeTokens>,
        source: Arc<FakeSource>,
        publisher: Arc<FakePublisher>,
        orchestrator: Arc<ReviewOrchestrator>,
    }

    fn harness(tokens: FakeTokens, generator: FakeGenerator, publisher: FakePublisher) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ReviewStore::open(&dir.path().join("reviews.db")).unwrap();
        let tokens = Arc::new(tokens);
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(publisher);
        let services = Collaborators {
            tokens: tokens.clone(),
            source: source.clone(),
            generator: Arc::new(generator),
            publisher: publisher.clone(),
        };
        let orchestrator = Arc::new(ReviewOrchestrator::new(store.clone(), services, 20));
        Harness {
            _dir: dir,
            store,
            tokens,
            source,
            publisher,
            orchestrator,
        }
    }

    fn queue_review(store: &ReviewStore) -> ReviewJob {
        let review = store
            .session()
            .unwrap()
            .create_review("octo/app", 7, ReviewStatus::Queued, "Webhook event: pull_request (opened)")
            .unwrap();
        ReviewJob {
            review_id: review.id,
            repo: "octo/app".into(),
            pr_number: 7,
            installation_id: 99,
        }
    }

    #[tokio::test]
    async fn successful_run_publishes_then_persists() {
        let h = harness(FakeTokens::default(), FakeGenerator::default(), FakePublisher::default());
        let job = queue_review(&h.store);

        let outcome = h.orchestrator.run(job.clone()).await;
        assert_eq!(outcome, RunOutcome::Completed { comments: 1 });

        let review = h.store.session().unwrap().get_review(&job.review_id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.summary, "One finding.");
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.comments[0].message, "Cache is never evicted.");

        let bodies = h.publisher.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("- **WARNING** src/cache.rs: Cache is never evicted."));
        assert_eq!(*h.tokens.minted.lock().unwrap(), vec![99]);
        assert_eq!(*h.source.limits.lock().unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn publish_failure_fails_review_without_comments() {
        let h = harness(
            FakeTokens::default(),
            FakeGenerator::default(),
            FakePublisher {
                fail: true,
                ..FakePublisher::default()
            },
        );
        let job = queue_review(&h.store);

        let outcome = h.orchestrator.run(job.clone()).await;
        assert!(matches!(outcome, RunOutcome::Failed(ref s) if s.contains("GitHub API error 500")));

        let review = h.store.session().unwrap().get_review(&job.review_id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert!(review.summary.starts_with("Review failed: publish error:"));
        assert!(review.summary.contains("GitHub API error 500"));
        assert!(review.comments.is_empty());
    }

    #[tokio::test]
    async fn auth_failure_stops_before_any_fetch() {
        let h = harness(
            FakeTokens {
                fail: true,
                ..FakeTokens::default()
            },
            FakeGenerator::default(),
            FakePublisher::default(),
        );
        let job = queue_review(&h.store);

        let outcome = h.orchestrator.run(job.clone()).await;
        assert_eq!(
            outcome,
            RunOutcome::Failed(
                "Review failed: authentication error: token issuance failed with 401".into()
            )
        );
        assert!(h.source.limits.lock().unwrap().is_empty());
        assert!(h.publisher.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_review_is_a_silent_no_op() {
        let h = harness(FakeTokens::default(), FakeGenerator::default(), FakePublisher::default());
        let outcome = h
            .orchestrator
            .run(ReviewJob {
                review_id: "purged".into(),
                repo: "octo/app".into(),
                pr_number: 7,
                installation_id: 99,
            })
            .await;
        assert_eq!(outcome, RunOutcome::Skipped);
        assert!(h.tokens.minted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_review_is_not_rerun() {
        let h = harness(FakeTokens::default(), FakeGenerator::default(), FakePublisher::default());
        let job = queue_review(&h.store);
        assert!(matches!(h.orchestrator.run(job.clone()).await, RunOutcome::Completed { .. }));

        assert_eq!(h.orchestrator.run(job.clone()).await, RunOutcome::Skipped);
        let review = h.store.session().unwrap().get_review(&job.review_id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(h.tokens.minted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_run_mints_a_fresh_token() {
        let h = harness(FakeTokens::default(), FakeGenerator::default(), FakePublisher::default());
        let first = queue_review(&h.store);
        let second = queue_review(&h.store);
        h.orchestrator.run(first).await;
        h.orchestrator.run(second).await;
        assert_eq!(*h.tokens.minted.lock().unwrap(), vec![99, 99]);
    }

    #[tokio::test]
    async fn in_progress_is_visible_while_the_run_is_underway() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness(
            FakeTokens::default(),
            FakeGenerator {
                entered: Some(entered.clone()),
                release: Some(release.clone()),
            },
            FakePublisher::default(),
        );
        let job = queue_review(&h.store);

        let orchestrator = h.orchestrator.clone();
        let run_job = job.clone();
        let handle = tokio::spawn(async move { orchestrator.run(run_job).await });

        entered.notified().await;
        let mid_run = h.store.session().unwrap().status_of(&job.review_id).unwrap();
        assert_eq!(mid_run, Some(ReviewStatus::InProgress));

        release.notify_one();
        assert!(matches!(handle.await.unwrap(), RunOutcome::Completed { .. }));
        let done = h.store.session().unwrap().status_of(&job.review_id).unwrap();
        assert_eq!(done, Some(ReviewStatus::Completed));
    }

    #[test]
    fn failure_summary_prefixes_error() {
        let err = LookoutError::Fetch("GitHub API error 404 Not Found".into());
        assert_eq!(
            failure_summary(&err),
            "Review failed: fetch error: GitHub API error 404 Not Found"
        );
    }
}
