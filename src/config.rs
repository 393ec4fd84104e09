use anyhow::{Result, bail};
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Which query router the session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RouterKind {
    Heuristic,
    Model,
}

impl FromStr for RouterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "keyword" | "keywords" => Ok(RouterKind::Heuristic),
            "model" | "llm" => Ok(RouterKind::Model),
            other => Err(format!("unknown router: {other}")),
        }
    }
}

/// How the model marks its reasoning output in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkEncoding {
    /// A separate `thinking` field on each chunk.
    Structured,
    /// Inline `<think>...</think>` markers inside `content`.
    Tags,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_url: String,
    pub model: String,
    pub ollama_timeout: Duration,
    pub num_ctx: u32,

    pub searxng_url: String,
    pub search_timeout: Duration,
    pub max_results: usize,

    pub crawl_timeout: Duration,
    pub max_crawlers: usize,
    pub max_content_size: usize,
    pub user_agent: String,

    pub history_path: PathBuf,
    pub max_history_size: usize,
    pub history_window: usize,

    pub auto_search: bool,
    pub verbose: bool,
    pub show_thinking: bool,
    pub router: RouterKind,
    pub think_encoding: ThinkEncoding,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ollama_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:8b".to_string(),
            ollama_timeout: Duration::from_secs(120),
            num_ctx: 32_768,

            searxng_url: "http://localhost:9090".to_string(),
            search_timeout: Duration::from_secs(10),
            max_results: 5,

            crawl_timeout: Duration::from_secs(15),
            max_crawlers: 5,
            max_content_size: 5 * 1024 * 1024,
            user_agent: "web-ollama/1.0".to_string(),

            history_path: expand_home("~/.web-ollama/history.json"),
            max_history_size: 10,
            history_window: 10,

            auto_search: true,
            verbose: false,
            show_thinking: true,
            router: RouterKind::Model,
            think_encoding: ThinkEncoding::Structured,
        }
    }
}

impl Config {
    /// Defaults overridden by `WEBCHAT_*` variables (a `.env` file is honored).
    pub fn from_env() -> Config {
        dotenv().ok();
        let d = Config::default();
        Config {
            ollama_url: get_env_or_default("WEBCHAT_OLLAMA_URL", &d.ollama_url),
            model: get_env_or_default("WEBCHAT_MODEL", &d.model),
            ollama_timeout: get_secs_or("WEBCHAT_OLLAMA_TIMEOUT_SECS", d.ollama_timeout),
            num_ctx: get_parsed_or("WEBCHAT_NUM_CTX", d.num_ctx),

            searxng_url: get_env_or_default("WEBCHAT_SEARXNG_URL", &d.searxng_url),
            search_timeout: get_secs_or("WEBCHAT_SEARCH_TIMEOUT_SECS", d.search_timeout),
            max_results: get_parsed_or("WEBCHAT_MAX_RESULTS", d.max_results),

            crawl_timeout: get_secs_or("WEBCHAT_CRAWL_TIMEOUT_SECS", d.crawl_timeout),
            max_crawlers: get_parsed_or("WEBCHAT_MAX_CRAWLERS", d.max_crawlers),
            max_content_size: get_parsed_or("WEBCHAT_MAX_CONTENT_SIZE", d.max_content_size),
            user_agent: get_env_or_default("WEBCHAT_USER_AGENT", &d.user_agent),

            history_path: env::var("WEBCHAT_HISTORY_PATH")
                .map(|p| expand_home(&p))
                .unwrap_or(d.history_path),
            max_history_size: get_parsed_or("WEBCHAT_MAX_HISTORY_SIZE", d.max_history_size),
            history_window: get_parsed_or("WEBCHAT_HISTORY_WINDOW", d.history_window),

            auto_search: get_parsed_or("WEBCHAT_AUTO_SEARCH", d.auto_search),
            verbose: get_parsed_or("WEBCHAT_VERBOSE", d.verbose),
            show_thinking: get_parsed_or("WEBCHAT_SHOW_THINKING", d.show_thinking),
            router: get_parsed_or("WEBCHAT_ROUTER", d.router),
            think_encoding: if get_parsed_or("WEBCHAT_THINK_TAGS", false) {
                ThinkEncoding::Tags
            } else {
                d.think_encoding
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ollama_url.trim().is_empty() {
            bail!("ollama URL cannot be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model name cannot be empty");
        }
        if !(1..=10).contains(&self.max_results) {
            bail!("max results must be between 1 and 10");
        }
        if self.max_crawlers < 1 {
            bail!("max crawlers must be at least 1");
        }
        Ok(())
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid value for {key}: {raw:?}");
            default
        }),
        Err(_) => default,
    }
}

fn get_secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(get_parsed_or(key, default.as_secs()))
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = env::var("HOME")
                .or_else(|_| env::var("USERPROFILE"))
                .unwrap_or_else(|_| ".".to_string());
            PathBuf::from(format!("{home}{rest}"))
        }
        None => PathBuf::from(path),
    }
}
