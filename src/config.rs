//! Runtime configuration and CLI surface.
//!
//! `Settings` is a `clap::Args` struct whose fields double as environment
//! variables (`#[arg(env = "...")]`), flattened into each subcommand that
//! needs the full configuration. `Cli` is the top-level `clap::Parser`,
//! loaded with `dotenvy::dotenv()` then `Cli::parse()` in `main`, the same
//! two-step boot every CLI in this family uses.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Which AI-validator backend the validation pipeline's `ai` stage talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum AiProviderKind {
    /// HTTPS multimodal API (reqwest + rustls).
    CloudApi,
    /// Shell out to a local CLI tool per invocation.
    CliSubprocess,
    /// A provider fronted by a pay-per-seat subscription proxy endpoint.
    SubscriptionProxy,
    /// `CloudApi` with `CliSubprocess` as a transport-error fallback.
    Fallback,
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Disable TLS for the Postgres connection (local/dev only).
    #[arg(long, env = "NO_TLS", default_value_t = false)]
    pub no_tls: bool,

    /// Max size of the Postgres connection pool.
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 10)]
    pub db_pool_size: usize,

    /// Number of browser workers to run.
    #[arg(long, env = "BROWSER_WORKERS", default_value_t = 4)]
    pub browser_workers: usize,

    /// Number of validation workers to run.
    #[arg(long, env = "VALIDATION_WORKERS", default_value_t = 2)]
    pub validation_workers: usize,

    /// Fleet-wide cap on concurrently in-flight object tasks.
    #[arg(long, env = "OBJECT_TASK_CONCURRENCY_CAP", default_value_t = 20)]
    pub object_task_concurrency_cap: i64,

    /// Seconds of heartbeat silence before a task is considered abandoned.
    #[arg(long, env = "HEARTBEAT_TIMEOUT_SECONDS", default_value_t = 120)]
    pub heartbeat_timeout_seconds: u64,

    /// How often the heartbeat checker sweeps for abandoned tasks.
    #[arg(long, env = "HEARTBEAT_CHECK_INTERVAL_SECONDS", default_value_t = 30)]
    pub heartbeat_check_interval_seconds: u64,

    /// How often a worker emits its own liveness heartbeat while a task is
    /// in flight.
    #[arg(long, env = "HEARTBEAT_EMIT_INTERVAL_SECONDS", default_value_t = 20)]
    pub heartbeat_emit_interval_seconds: u64,

    /// Idle sleep between claim attempts when neither queue has work.
    #[arg(long, env = "WORKER_IDLE_SLEEP_SECONDS", default_value_t = 5)]
    pub worker_idle_sleep_seconds: u64,

    /// Backoff interval for `acquire_with_wait` on the proxy pool.
    #[arg(long, env = "PROXY_WAIT_POLL_SECONDS", default_value_t = 3)]
    pub proxy_wait_poll_seconds: u64,

    /// Bound on browser context/page/browser teardown during a proxy swap.
    #[arg(long, env = "BROWSER_CLOSE_TIMEOUT_SECONDS", default_value_t = 10)]
    pub browser_close_timeout_seconds: u64,

    /// Consecutive proxy errors before the proxy is permanently blocked.
    #[arg(long, env = "PROXY_ERROR_BLOCK_THRESHOLD", default_value_t = 3)]
    pub proxy_error_block_threshold: i32,

    /// Maximum captcha-resolution attempts before giving up on a task.
    #[arg(long, env = "MAX_CAPTCHA_ATTEMPTS", default_value_t = 3)]
    pub max_captcha_attempts: u32,

    /// Minimum listing price to survive the `price_filter` stage.
    #[arg(long, env = "MIN_PRICE")]
    pub min_price: Option<f64>,

    /// `N` in the validation pipeline: minimum survivors at every gate.
    #[arg(long, env = "MIN_VALIDATED_ITEMS", default_value_t = 5)]
    pub min_validated_items: usize,

    /// Require the articulum's own text to appear (folded/normalized) in a
    /// listing's title/snippet/seller text to survive `mechanical`.
    #[arg(long, env = "REQUIRE_ARTICULUM_IN_TEXT", default_value_t = true)]
    pub require_articulum_in_text: bool,

    /// Comma-separated case-insensitive substrings that reject a listing
    /// outright during `mechanical` (e.g. "aftermarket,replica,analog").
    #[arg(long, env = "MECHANICAL_STOPWORDS", value_delimiter = ',')]
    pub mechanical_stopwords: Vec<String>,

    /// Minimum seller review count to survive `mechanical`; unset disables
    /// the check.
    #[arg(long, env = "MIN_SELLER_REVIEWS")]
    pub min_seller_reviews: Option<i32>,

    /// Enable the `ai` validation stage.
    #[arg(long, env = "AI_VALIDATION_ENABLED", default_value_t = false)]
    pub ai_validation_enabled: bool,

    /// Which AI provider backend to build when the `ai` stage is enabled.
    #[arg(long, env = "AI_PROVIDER", value_enum, default_value_t = AiProviderKind::CloudApi)]
    pub ai_provider: AiProviderKind,

    /// API key for the cloud AI provider.
    #[arg(long, env = "AI_API_KEY")]
    pub ai_api_key: Option<String>,

    /// Base URL for the cloud AI provider / subscription proxy.
    #[arg(long, env = "AI_BASE_URL")]
    pub ai_base_url: Option<String>,

    /// Local executable invoked by the CLI-subprocess AI provider variant.
    #[arg(long, env = "AI_CLI_PATH")]
    pub ai_cli_path: Option<String>,

    /// Collect listing images for the AI validator's `use_images` argument.
    #[arg(long, env = "AI_USE_IMAGES", default_value_t = false)]
    pub ai_use_images: bool,

    /// Consecutive AI transport failures before a validation worker gives
    /// up and exits with the distinguished shutdown exit code.
    #[arg(long, env = "AI_MAX_CONSECUTIVE_ERRORS", default_value_t = 3)]
    pub ai_max_consecutive_errors: u32,

    /// Re-parse mode: browser workers only claim object tasks, never
    /// catalog tasks, and the first object task for an articulum does not
    /// trigger `VALIDATED -> OBJECT_PARSING`.
    #[arg(long, env = "REPARSE_MODE", default_value_t = false)]
    pub reparse_mode: bool,

    /// Skip materializing object tasks when a validation pipeline succeeds.
    #[arg(long, env = "SKIP_OBJECT_PARSING", default_value_t = false)]
    pub skip_object_parsing: bool,

    /// Run headless (default) or headed browser sessions.
    #[arg(long, env = "BROWSER_HEADLESS", default_value_t = true)]
    pub browser_headless: bool,

    /// How long the supervisor waits for a child to exit on graceful
    /// shutdown before force-killing it.
    #[arg(long, env = "SHUTDOWN_GRACE_SECONDS", default_value_t = 10)]
    pub shutdown_grace_seconds: u64,

    /// How often the supervisor polls child task exit codes.
    #[arg(long, env = "SUPERVISOR_POLL_INTERVAL_SECONDS", default_value_t = 10)]
    pub supervisor_poll_interval_seconds: u64,
}

impl Settings {
    /// `price_filter`'s global floor. `None` disables the stage's rejection
    /// (every listing survives Gate 1, audit rows are still written).
    pub fn min_price_decimal(&self) -> Option<bigdecimal::BigDecimal> {
        self.min_price.and_then(|p| {
            bigdecimal::BigDecimal::try_from(p)
                .map_err(|e| tracing::warn!("min_price {p} is not representable: {e}"))
                .ok()
        })
    }

    /// A `Debug`-style rendering safe to print: the database URL's password
    /// and the AI API key are redacted rather than shown in the clear.
    pub fn redacted(&self) -> String {
        let mut settings = self.clone();
        settings.database_url = crate::repository::util::redact_url_password(&settings.database_url);
        if settings.ai_api_key.is_some() {
            settings.ai_api_key = Some("***".to_string());
        }
        format!("{settings:#?}")
    }
}

/// Top-level CLI entry point: `articulum <subcommand>`.
#[derive(Debug, Clone, Parser)]
#[command(name = "articulum-engine", version, about = "Articulum coordination engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the heartbeat checker and the whole browser/validation worker
    /// fleet in one process.
    Supervisor(Settings),
    /// Run a single browser or validation worker, for a deployment that
    /// wants one worker per host/process instead of the in-process fleet.
    Worker(WorkerArgs),
    /// Run pending database migrations, then exit.
    Migrate(MigrateArgs),
    /// Print the resolved configuration (with secrets redacted), then exit.
    Config(Settings),
}

/// Which worker loop the `worker` subcommand drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum WorkerKind {
    Browser,
    Validation,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Which worker loop to run.
    #[arg(long, value_enum)]
    pub kind: WorkerKind,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Disable TLS for the Postgres connection (local/dev only).
    #[arg(long, env = "NO_TLS", default_value_t = false)]
    pub no_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_command_is_well_formed() {
        Cli::command().debug_assert();
    }
}
