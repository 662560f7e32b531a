use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration loaded from `lookout.toml`.
///
/// Supports layered resolution: CLI flags > env vars > config file > defaults.
///
/// # Examples
///
/// ```
/// use lookout_core::LookoutConfig;
///
/// let config = LookoutConfig::default();
/// assert_eq!(config.github.max_files, 20);
/// assert_eq!(config.worker.max_concurrent_runs, 4);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookoutConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// GitHub App credentials and API settings.
    #[serde(default)]
    pub github: GitHubConfig,
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review database settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Background worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl LookoutConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LookoutError::Io`] if the file cannot be read, or
    /// [`crate::LookoutError::Toml`] if the content is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout_core::LookoutConfig;
    ///
    /// let config = LookoutConfig::from_toml("[github]\nmax_files = 5\n").unwrap();
    /// assert_eq!(config.github.max_files, 5);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe a value from the config file.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout_core::LookoutConfig;
    ///
    /// let mut config = LookoutConfig::default();
    /// config.apply_env_with(|key| (key == "OPENAI_MODEL").then(|| "gpt-4o".to_string()));
    /// assert_eq!(config.llm.model, "gpt-4o");
    /// ```
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GITHUB_APP_ID") {
            self.github.app_id = Some(v);
        }
        if let Some(v) = get("GITHUB_PRIVATE_KEY") {
            self.github.private_key = Some(v);
        }
        if let Some(v) = get("GITHUB_PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(v);
        }
        if let Some(v) = get("GITHUB_API_URL") {
            self.github.api_base_url = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.store.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("LOOKOUT_BIND") {
            self.server.bind = v;
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default: `0.0.0.0:8000`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed by CORS for the review API.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// GitHub App configuration.
///
/// Credentials are optional here; a run without them fails with an
/// authentication error instead of preventing start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// App identifier used as the JWT issuer.
    pub app_id: Option<String>,
    /// PEM-encoded RSA private key. Literal `\n` sequences are expanded.
    pub private_key: Option<String>,
    /// File holding the PEM key, used when `private_key` is unset.
    pub private_key_path: Option<PathBuf>,
    /// Shared secret for `X-Hub-Signature-256`.
    pub webhook_secret: Option<String>,
    /// REST API root (default: `https://api.github.com`).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Maximum changed files sent to the model per review (default: 20).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Per-request timeout in seconds (default: 20).
    #[serde(default = "default_github_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.github.com".into()
}

fn default_max_files() -> usize {
    20
}

fn default_github_timeout() -> u64 {
    20
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            private_key: None,
            private_key_path: None,
            webhook_secret: None,
            api_base_url: default_api_base_url(),
            max_files: default_max_files(),
            request_timeout_secs: default_github_timeout(),
        }
    }
}

impl GitHubConfig {
    /// Return the PEM private key, inline value first, then the key file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LookoutError::Io`] if `private_key_path` is set but unreadable.
    pub fn resolve_private_key(&self) -> Result<Option<String>> {
        if let Some(key) = self.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(Some(key.replace("\\n", "\n")));
        }
        match &self.private_key_path {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }
}

/// How the chat completion request constrains the model output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Strict JSON schema (`summary` + `comments`).
    #[default]
    JsonSchema,
    /// Any JSON object; the schema is only described in the prompt.
    JsonObject,
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use lookout_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o-mini");
/// assert!(config.api_key.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for an OpenAI-compatible endpoint.
    pub base_url: Option<String>,
    /// Sampling temperature (default: 0.2).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
    /// Output constraint sent with the request.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            request_timeout_secs: default_llm_timeout(),
            response_format: ResponseFormat::default(),
        }
    }
}

/// Review database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file (default: `./data/reviews.db`).
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/reviews.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Background worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Pipeline runs allowed to execute at once (default: 4).
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Runs that may wait for a free worker (default: 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = LookoutConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.github.api_base_url, "https://api.github.com");
        assert_eq!(config.github.max_files, 20);
        assert_eq!(config.github.request_timeout_secs, 20);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.response_format, ResponseFormat::JsonSchema);
        assert_eq!(config.store.database_path, PathBuf::from("./data/reviews.db"));
        assert_eq!(config.worker.queue_capacity, 64);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = LookoutConfig::from_toml("").unwrap();
        assert_eq!(config.github.max_files, 20);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[server]
bind = "127.0.0.1:9000"
cors_origins = []

[github]
app_id = "12345"
webhook_secret = "s3cret"
api_base_url = "https://ghe.example.com/api/v3"
max_files = 50

[llm]
model = "gpt-4o"
base_url = "http://localhost:11434"
response_format = "json_object"

[store]
database_path = "/var/lib/lookout/reviews.db"

[worker]
max_concurrent_runs = 2
queue_capacity = 8
"#;
        let config = LookoutConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(config.server.cors_origins.is_empty());
        assert_eq!(config.github.app_id.as_deref(), Some("12345"));
        assert_eq!(config.github.max_files, 50);
        assert_eq!(config.github.request_timeout_secs, 20);
        assert_eq!(config.llm.response_format, ResponseFormat::JsonObject);
        assert_eq!(config.worker.max_concurrent_runs, 2);
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(LookoutConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = LookoutConfig::from_toml("[llm]\nmodel = \"from-file\"\n").unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_MODEL", "from-env"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GITHUB_APP_ID", "42"),
            ("DATABASE_PATH", "/tmp/x.db"),
            ("GITHUB_WEBHOOK_SECRET", "  "),
        ]);
        config.apply_env_with(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.model, "from-env");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.github.app_id.as_deref(), Some("42"));
        assert_eq!(config.store.database_path, PathBuf::from("/tmp/x.db"));
        assert!(config.github.webhook_secret.is_none());
    }

    #[test]
    fn private_key_expands_escaped_newlines() {
        let github = GitHubConfig {
            private_key: Some("-----BEGIN KEY-----\\nabc\\n-----END KEY-----".into()),
            ..GitHubConfig::default()
        };
        let key = github.resolve_private_key().unwrap().unwrap();
        assert_eq!(key, "-----BEGIN KEY-----\nabc\n-----END KEY-----");
    }

    #[test]
    fn private_key_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, "PEM").unwrap();
        let github = GitHubConfig {
            private_key_path: Some(path),
            ..GitHubConfig::default()
        };
        assert_eq!(github.resolve_private_key().unwrap().as_deref(), Some("PEM"));
    }

    #[test]
    fn private_key_absent_is_none() {
        assert!(GitHubConfig::default().resolve_private_key().unwrap().is_none());
    }
}
