use clap::Parser;
use hookwatch_analysis::ModelSettings;
use hookwatch_storage::DEFAULT_CAPACITY;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_DATA_FILE: &str = "data/messages.json";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_FLUSH_SECS: u64 = 300;
const DEFAULT_LOG_RING: usize = 1000;
const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 180;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub data_file: PathBuf,
    pub capacity: Option<usize>,
    pub flush_interval: Duration,
    pub log_dir: String,
    pub log_ring_size: usize,
    pub relay_url: Option<String>,
    pub model: ModelSettings,
    pub analysis_timeout: Duration,
    pub debug: bool,
}

#[derive(Parser, Debug, Default)]
#[command(name = "hookwatch-hub", about = "Sentry webhook intake and analysis hub")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub data_file: String,
    /// Records kept before the oldest is evicted; 0 keeps everything.
    #[arg(long)]
    pub capacity: Option<usize>,
    #[arg(long)]
    pub flush_interval: Option<u64>,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long)]
    pub log_ring_size: Option<usize>,
    /// WeCom group bot webhook; relay is off when unset.
    #[arg(long, default_value = "")]
    pub relay_url: String,
    #[arg(long, default_value = "")]
    pub model_base_url: String,
    #[arg(long, default_value = "")]
    pub model: String,
    #[arg(long, default_value = "")]
    pub api_key: String,
    #[arg(long)]
    pub analysis_timeout: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

pub fn load_config() -> Config {
    Config::resolve(Args::parse(), |key| std::env::var(key).ok())
}

impl Config {
    /// Flag, then `HOOKWATCH_*` environment, then the built-in default.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let capacity = args
            .capacity
            .or_else(|| parse_env(&env, "HOOKWATCH_CAPACITY"))
            .unwrap_or(DEFAULT_CAPACITY);
        let analysis_timeout = Duration::from_secs(
            args.analysis_timeout
                .or_else(|| parse_env(&env, "HOOKWATCH_ANALYSIS_TIMEOUT"))
                .unwrap_or(DEFAULT_ANALYSIS_TIMEOUT_SECS),
        );
        let api_key = non_empty(&args.api_key)
            .or_else(|| env("HOOKWATCH_API_KEY"))
            .or_else(|| env("DEEPSEEK_API_KEY"));

        Self {
            addr: resolve_text(&args.addr, env("HOOKWATCH_ADDR"), DEFAULT_ADDR),
            data_file: PathBuf::from(resolve_text(
                &args.data_file,
                env("HOOKWATCH_DATA_FILE"),
                DEFAULT_DATA_FILE,
            )),
            capacity: (capacity > 0).then_some(capacity),
            flush_interval: Duration::from_secs(
                args.flush_interval
                    .or_else(|| parse_env(&env, "HOOKWATCH_FLUSH_INTERVAL"))
                    .unwrap_or(DEFAULT_FLUSH_SECS),
            ),
            log_dir: resolve_text(&args.log_dir, env("HOOKWATCH_LOG_DIR"), DEFAULT_LOG_DIR),
            log_ring_size: args
                .log_ring_size
                .or_else(|| parse_env(&env, "HOOKWATCH_LOG_RING_SIZE"))
                .unwrap_or(DEFAULT_LOG_RING),
            relay_url: non_empty(&args.relay_url).or_else(|| env("HOOKWATCH_RELAY_URL")),
            model: ModelSettings {
                api_key,
                base_url: resolve_text(
                    &args.model_base_url,
                    env("HOOKWATCH_MODEL_BASE_URL"),
                    hookwatch_analysis::adapter::DEFAULT_BASE_URL,
                ),
                model: resolve_text(
                    &args.model,
                    env("HOOKWATCH_MODEL"),
                    hookwatch_analysis::adapter::DEFAULT_MODEL,
                ),
                request_timeout: analysis_timeout,
            },
            analysis_timeout,
            debug: args.debug || env("HOOKWATCH_DEBUG").is_some_and(|value| is_true(&value)),
        }
    }
}

fn resolve_text(flag: &str, env_value: Option<String>, default: &str) -> String {
    non_empty(flag)
        .or(env_value)
        .unwrap_or_else(|| default.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|value| value.trim().parse().ok())
}

fn is_true(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
