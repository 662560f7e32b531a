use async_trait::async_trait;
use lookout_core::{
    FileDiff, GeneratedReview, LlmConfig, LookoutError, PullRequestMeta, ResponseFormat,
};

use crate::llm::{ChatMessage, LlmClient, Role};
use crate::prompt;

/// Produces a structured review for a pull request.
///
/// Malformed model output is not an error: implementations degrade to a
/// fallback review. Errors are reserved for configuration and transport.
#[async_trait]
pub trait ReviewGenerator: Send + Sync {
    async fn generate(
        &self,
        pr: &PullRequestMeta,
        files: &[FileDiff],
    ) -> Result<GeneratedReview, LookoutError>;
}

/// [`ReviewGenerator`] backed by a chat completions endpoint.
pub struct LlmReviewGenerator {
    client: LlmClient,
    response_format: ResponseFormat,
}

impl LlmReviewGenerator {
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LookoutError> {
        Ok(Self {
            client: LlmClient::new(config)?,
            response_format: config.response_format,
        })
    }
}

#[async_trait]
impl ReviewGenerator for LlmReviewGenerator {
    async fn generate(
        &self,
        pr: &PullRequestMeta,
        files: &[FileDiff],
    ) -> Result<GeneratedReview, LookoutError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: prompt::build_system_prompt(),
            },
            ChatMessage {
                role: Role::User,
                content: prompt::build_review_prompt(pr, files),
            },
        ];

        tracing::debug!(
            model = self.client.model(),
            files = files.len(),
            "requesting review from model"
        );

        let text = self
            .client
            .chat(messages, prompt::response_format(self.response_format))
            .await?;

        let review = prompt::parse_review_response(&text);
        tracing::debug!(comments = review.comments.len(), "model review parsed");
        Ok(review)
    }
}
