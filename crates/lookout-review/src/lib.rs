//! Pull request review pipeline for the Lookout GitHub App.
//!
//! Provides webhook signature checks, installation authentication, pull
//! request fetching, model-backed review generation, publishing, SQLite
//! persistence, and the orchestrator plus worker queue that tie them
//! together.

pub mod auth;
pub mod generator;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod signature;
pub mod store;
pub mod worker;
