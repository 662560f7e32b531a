use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use lookout_core::{LookoutConfig, OutputFormat, Review, ReviewStatus};
use lookout_review::github::parse_pr_reference;
use lookout_review::pipeline::{Collaborators, ReviewJob, ReviewOrchestrator, RunOutcome};
use lookout_review::store::ReviewStore;

const DEFAULT_CONFIG_PATH: &str = "lookout.toml";

#[derive(Parser)]
#[command(
    name = "lookout",
    version,
    about = "GitHub App that reviews pull requests with an LLM",
    long_about = "Lookout receives GitHub pull request webhooks, asks an LLM for a review\n\
                   of the changed files, posts the findings back to the pull request and\n\
                   keeps a record of every review.\n\n\
                   Examples:\n  \
                     lookout serve                                  Run the webhook server\n  \
                     lookout review --pr owner/repo#12 --installation 345\n  \
                     lookout reviews --limit 10                     List recent reviews\n  \
                     lookout doctor                                 Check credentials and config"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: lookout.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable tables and summaries (default)\n  \
                         json  Machine-readable JSON"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and review API
    #[command(long_about = "Run the webhook server and review API.\n\n\
        Reviews left in_progress by a previous process are marked failed on startup.\n\
        Stops gracefully on Ctrl-C.\n\n\
        Examples:\n  lookout serve\n  lookout serve --bind 127.0.0.1:8080")]
    Serve {
        /// Socket address to bind (overrides [server].bind and LOOKOUT_BIND)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Review one pull request now and post the result
    #[command(long_about = "Review one pull request now and post the result.\n\n\
        Creates a review record and runs the full pipeline inline: installation token,\n\
        pull request metadata, changed files, model review, publish.\n\n\
        Examples:\n  lookout review --pr octo/app#12 --installation 345")]
    Review {
        /// Pull request to review (format: owner/repo#123)
        #[arg(long)]
        pr: String,
        /// GitHub App installation id for the repository
        #[arg(long)]
        installation: u64,
    },
    /// List stored reviews, newest first
    Reviews {
        /// Maximum reviews to show
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create a default lookout.toml
    #[command(long_about = "Create a default lookout.toml in the current directory.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if lookout.toml already exists.")]
    Init,
    /// Check credentials and configuration
    #[command(long_about = "Check credentials and configuration.\n\n\
        Reports the config file, GitHub App credentials, webhook secret, LLM API key\n\
        and review database. Use --format json for machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

fn run_doctor(
    config: &LookoutConfig,
    config_path: &Path,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    if config_path.exists() {
        checks.push(CheckResult::pass(
            "config_file",
            format!("{} found", config_path.display()),
        ));
    } else {
        checks.push(CheckResult::info(
            "config_file",
            format!("{} not found, using defaults and environment", config_path.display()),
        ));
    }

    match config.github.app_id.as_deref() {
        Some(id) => checks.push(CheckResult::pass("github_app_id", format!("app {id}"))),
        None => checks.push(CheckResult::fail(
            "github_app_id",
            "GITHUB_APP_ID not set",
            "export GITHUB_APP_ID=... or set [github].app_id",
        )),
    }

    match config.github.resolve_private_key() {
        Ok(Some(_)) => checks.push(CheckResult::pass("github_private_key", "private key loaded")),
        Ok(None) => checks.push(CheckResult::fail(
            "github_private_key",
            "GITHUB_PRIVATE_KEY not set",
            "export GITHUB_PRIVATE_KEY_PATH=/path/to/app.pem or set [github].private_key_path",
        )),
        Err(e) => checks.push(CheckResult::fail(
            "github_private_key",
            format!("cannot read private key: {e}"),
            "check [github].private_key_path",
        )),
    }

    if config
        .github
        .webhook_secret
        .as_deref()
        .is_some_and(|s| !s.is_empty())
    {
        checks.push(CheckResult::pass("webhook_secret", "GITHUB_WEBHOOK_SECRET set"));
    } else {
        checks.push(CheckResult::fail(
            "webhook_secret",
            "GITHUB_WEBHOOK_SECRET not set, every delivery will be rejected",
            "export GITHUB_WEBHOOK_SECRET=... matching the App's webhook settings",
        ));
    }

    let base_url = config
        .llm
        .base_url
        .as_deref()
        .unwrap_or("https://api.openai.com");
    checks.push(CheckResult::pass(
        "llm_model",
        format!("{} at {base_url}", config.llm.model),
    ));
    if config.llm.api_key.is_some() {
        checks.push(CheckResult::pass("llm_api_key", "OPENAI_API_KEY set"));
    } else {
        checks.push(CheckResult::fail(
            "llm_api_key",
            "OPENAI_API_KEY not set",
            "export OPENAI_API_KEY=... or set [llm].api_key",
        ));
    }

    let db_path = &config.store.database_path;
    if db_path.exists() {
        let detail = match ReviewStore::open(db_path).and_then(|store| {
            store
                .session()
                .and_then(|session| session.list_reviews(None))
        }) {
            Ok(reviews) => format!("{} ({} reviews)", db_path.display(), reviews.len()),
            Err(e) => format!("{} (unreadable: {e})", db_path.display()),
        };
        checks.push(CheckResult::pass("database", detail));
    } else {
        checks.push(CheckResult::info(
            "database",
            format!("{} will be created on first start", db_path.display()),
        ));
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        OutputFormat::Text => {
            println!("Lookout v{} environment check\n", env!("CARGO_PKG_VERSION"));
            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

fn print_reviews(reviews: &[Review], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(reviews).into_diagnostic()?);
        }
        OutputFormat::Text => {
            if reviews.is_empty() {
                println!("No reviews yet.");
                return Ok(());
            }
            for review in reviews {
                println!(
                    "{}  {:<11}  {}#{}  {}  {} comments",
                    review.id,
                    review.status,
                    review.repo,
                    review.pr_number,
                    review.created_at.format("%Y-%m-%d %H:%M:%S"),
                    review.comments.len(),
                );
                if !review.summary.is_empty() {
                    println!("    {}", review.summary.lines().next().unwrap_or_default());
                }
            }
        }
    }
    Ok(())
}

async fn run_review(config: &LookoutConfig, pr: &str, installation_id: u64) -> Result<RunOutcome> {
    let (repo, pr_number) = parse_pr_reference(pr).into_diagnostic()?;
    let store = ReviewStore::open(&config.store.database_path).into_diagnostic()?;

    let summary = format!("Manual review: {repo}#{pr_number}");
    let review_repo = repo.clone();
    let review = store
        .with_session(move |s| s.create_review(&review_repo, pr_number, ReviewStatus::Queued, &summary))
        .await
        .into_diagnostic()?;

    let services = Collaborators::from_config(config).into_diagnostic()?;
    let orchestrator = ReviewOrchestrator::new(store, services, config.github.max_files);
    let outcome = orchestrator
        .run(ReviewJob {
            review_id: review.id.clone(),
            repo,
            pr_number,
            installation_id,
        })
        .await;
    tracing::debug!(review_id = %review.id, ?outcome, "manual run finished");
    Ok(outcome)
}

const DEFAULT_CONFIG: &str = r#"# Lookout Configuration
# Environment variables override these values.

[server]
# bind = "0.0.0.0:8000"
# cors_origins = ["http://localhost:5173"]

[github]
# app_id = "12345"                       # GITHUB_APP_ID
# private_key_path = "./lookout.pem"     # GITHUB_PRIVATE_KEY_PATH
# webhook_secret = "..."                 # GITHUB_WEBHOOK_SECRET
# api_base_url = "https://api.github.com"
# max_files = 20
# request_timeout_secs = 20

[llm]
# model = "gpt-4o-mini"                  # OPENAI_MODEL
# base_url = "https://api.openai.com"    # OPENAI_BASE_URL
# temperature = 0.2
# request_timeout_secs = 120
# response_format = "json_schema"        # or "json_object"

[store]
# database_path = "./data/reviews.db"    # DATABASE_PATH

[worker]
# max_concurrent_runs = 4
# queue_capacity = 64
"#;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = if config_path.exists() {
        LookoutConfig::from_file(&config_path).into_diagnostic()?
    } else if cli.config.is_some() {
        miette::bail!("config file {} not found", config_path.display());
    } else {
        LookoutConfig::default()
    };
    config.apply_env();

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            lookout_server::serve(config).await.into_diagnostic()?;
        }
        Command::Review { ref pr, installation } => {
            match run_review(&config, pr, installation).await? {
                RunOutcome::Completed { comments } => {
                    println!("Review posted to {pr} with {comments} findings");
                }
                RunOutcome::Skipped => {
                    println!("Review was not run");
                }
                RunOutcome::Failed(summary) => {
                    miette::bail!("{summary}");
                }
            }
        }
        Command::Reviews { limit } => {
            let store = ReviewStore::open(&config.store.database_path).into_diagnostic()?;
            let reviews = store
                .with_session(move |s| s.list_reviews(limit))
                .await
                .into_diagnostic()?;
            print_reviews(&reviews, cli.format)?;
        }
        Command::Init => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                miette::bail!("{DEFAULT_CONFIG_PATH} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {DEFAULT_CONFIG_PATH} with default configuration");
        }
        Command::Doctor => {
            run_doctor(&config, &config_path, cli.format, use_color)?;
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "lookout", &mut std::io::stdout());
        }
    }

    Ok(())
}
