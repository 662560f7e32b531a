//! Core types, configuration, and error handling for Lookout.
//!
//! This crate provides the shared foundation used by the other Lookout crates:
//! - [`LookoutError`]: unified error type using `thiserror`
//! - [`LookoutConfig`]: configuration loaded from `lookout.toml` and the environment
//! - Shared types: [`Review`], [`ReviewComment`], [`ReviewStatus`], [`Severity`],
//!   [`PullRequestMeta`], [`FileDiff`], [`GeneratedReview`], [`InstallationToken`]

mod config;
mod error;
mod types;

pub use config::{
    GitHubConfig, LlmConfig, LookoutConfig, ResponseFormat, ServerConfig, StoreConfig,
    WorkerConfig,
};
pub use error::LookoutError;
pub use types::{
    FileDiff, FileStatus, GeneratedReview, InstallationToken, NewReviewComment, OutputFormat,
    PullRequestMeta, Review, ReviewComment, ReviewEvent, ReviewStatus, Severity,
};

/// A convenience `Result` type for Lookout operations.
pub type Result<T> = std::result::Result<T, LookoutError>;
