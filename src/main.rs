use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use webchat::config::{CONFIG, Config, RouterKind, ThinkEncoding};
use webchat::crawler::Crawler;
use webchat::data_models::{HistoryMessage, SearchDecision};
use webchat::error::{ErrorKind, SearchError};
use webchat::fetcher::{Fetcher, FetcherConfig};
use webchat::history::{HistoryStore, JsonHistoryStore, MemoryHistoryStore};
use webchat::inference::{ChatBackend, OllamaClient};
use webchat::pipeline::{AugmentObserver, Augmentation, Augmenter, build_messages};
use webchat::router::{HeuristicRouter, ModelRouter, QueryRouter};
use webchat::search::SearchClient;
use webchat::splitter::{StreamAdapter, StreamObserver, StructuredFieldAdapter, TagDelimitedAdapter};

#[derive(Parser, Debug)]
#[command(name = "webchat", about = "Chat with a local model, backed by web search")]
struct Cli {
    /// Model name
    #[arg(long)]
    model: Option<String>,
    /// Inference service URL
    #[arg(long)]
    ollama_url: Option<String>,
    /// Search service URL
    #[arg(long)]
    searxng_url: Option<String>,
    /// Maximum search results to crawl per query
    #[arg(long)]
    max_results: Option<usize>,
    /// Inference request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Disable automatic web search
    #[arg(long)]
    no_search: bool,
    /// Log pipeline activity
    #[arg(long)]
    verbose: bool,
    /// Hide the model's reasoning output
    #[arg(long)]
    hide_thinking: bool,
    /// Strategy deciding when to search
    #[arg(long, value_enum)]
    router: Option<RouterKind>,
    /// The model marks reasoning with inline <think> tags
    #[arg(long)]
    think_tags: bool,
}

impl Cli {
    fn apply(self, mut cfg: Config) -> Config {
        if let Some(model) = self.model {
            cfg.model = model;
        }
        if let Some(url) = self.ollama_url {
            cfg.ollama_url = url;
        }
        if let Some(url) = self.searxng_url {
            cfg.searxng_url = url;
        }
        if let Some(n) = self.max_results {
            cfg.max_results = n;
        }
        if let Some(secs) = self.timeout {
            cfg.ollama_timeout = Duration::from_secs(secs);
        }
        if let Some(router) = self.router {
            cfg.router = router;
        }
        cfg.auto_search &= !self.no_search;
        cfg.verbose |= self.verbose;
        cfg.show_thinking &= !self.hide_thinking;
        if self.think_tags {
            cfg.think_encoding = ThinkEncoding::Tags;
        }
        cfg
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    // the library logs through `log`; forward those records to the subscriber
    tracing_log::LogTracer::init()?;
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Prints pipeline progress and the streamed reply.
struct Terminal {
    show_thinking: bool,
    verbose: bool,
    reasoning_open: bool,
}

impl Terminal {
    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            log::debug!("failed to write to stdout: {e}");
        }
    }

    /// Forgets any reasoning block a previous, interrupted stream left open.
    fn begin_turn(&mut self) {
        self.reasoning_open = false;
    }

    fn info(&self, msg: &str) {
        println!("ℹ {msg}");
    }

    fn warn(&self, msg: &str) {
        println!("⚠ {msg}");
    }
}

impl StreamObserver for Terminal {
    fn on_reasoning(&mut self, fragment: &str) {
        if !self.show_thinking {
            return;
        }
        if !self.reasoning_open {
            self.print("💭 ");
            self.reasoning_open = true;
        }
        self.print(fragment);
    }

    fn on_reasoning_done(&mut self) {
        if self.show_thinking {
            self.print("\n\n");
        }
        self.reasoning_open = false;
    }

    fn on_answer(&mut self, fragment: &str) {
        self.print(fragment);
    }
}

impl AugmentObserver for Terminal {
    fn on_decision(&mut self, decision: &SearchDecision) {
        if !self.verbose {
            return;
        }
        if decision.needs_search {
            self.info(&format!(
                "Search queries: {:?} (Reason: {})",
                decision.search_queries, decision.reason
            ));
        } else {
            self.info(&format!("No search needed: {}", decision.reason));
        }
    }

    fn on_decision_failed(&mut self, error: &str) {
        self.warn(&format!("Analysis failed: {error}"));
    }

    fn on_search(&mut self, index: usize, total: usize, query: &str) {
        if total > 1 || self.verbose {
            self.info(&format!("Search {index}/{total}: \"{query}\""));
        } else {
            self.info("Searching the web");
        }
    }

    fn on_search_failed(&mut self, index: usize, error: &SearchError) {
        self.warn(&format!("Search {index} failed: {error}"));
    }

    fn on_crawl(&mut self, url_count: usize) {
        self.info(&format!("Crawling {url_count} URLs"));
    }
}

struct Session {
    cfg: Config,
    ollama: Arc<OllamaClient>,
    augmenter: Augmenter<SearchClient, Fetcher>,
    history: Box<dyn HistoryStore>,
    terminal: Terminal,
}

impl Session {
    fn adapter(&self) -> Box<dyn StreamAdapter> {
        match self.cfg.think_encoding {
            ThinkEncoding::Structured => Box::new(StructuredFieldAdapter),
            ThinkEncoding::Tags => Box::new(TagDelimitedAdapter::new()),
        }
    }

    async fn turn(&mut self, query: &str, cancel: &CancellationToken) {
        let asked_at = Utc::now();
        self.terminal.begin_turn();

        let augmentation = if self.cfg.auto_search {
            self.terminal.info("Analyzing query...");
            self.augmenter.augment(query, cancel, &mut self.terminal).await
        } else {
            Augmentation::default()
        };
        if augmentation.searches_run > 0 {
            let ok = augmentation.successful_sources();
            if ok > 0 {
                self.terminal.info(&format!(
                    "Gathered information from {ok} sources across {} searches",
                    augmentation.searches_run
                ));
            } else {
                self.terminal.warn("No information gathered from searches");
            }
        }

        let recent = self.history.recent(self.cfg.history_window);
        let messages = build_messages(&recent, query, &augmentation.context);

        println!();
        let mut adapter = self.adapter();
        let outcome = self
            .ollama
            .chat_streaming(messages, adapter.as_mut(), &mut self.terminal, cancel)
            .await;
        println!();

        if let Some(e) = &outcome.error {
            self.terminal.warn(&format!("Response failed: {e}"));
            if outcome.answer.is_empty() {
                return;
            }
        }
        if !augmentation.source_urls.is_empty() {
            println!("\nSources:");
            for url in &augmentation.source_urls {
                println!("  - {url}");
            }
        }
        println!();

        let user = HistoryMessage::new("user", query, asked_at);
        let assistant = HistoryMessage::new("assistant", outcome.answer, Utc::now())
            .with_sources(augmentation.source_urls);
        for msg in [user, assistant] {
            if let Err(e) = self.history.append(msg) {
                self.terminal.warn(&format!("Failed to save history: {e}"));
            }
        }
    }

    fn print_history(&self) {
        let session = self.history.current_session();
        if session.messages.is_empty() {
            self.terminal.info("No conversation history yet");
            return;
        }
        for msg in &session.messages {
            let who = if msg.role == "user" { "You" } else { "Assistant" };
            println!("\n[{}] {who}:\n{}", msg.timestamp.format("%H:%M:%S"), msg.content);
            if let Some(meta) = &msg.metadata {
                if !meta.source_urls.is_empty() {
                    println!("Sources:");
                    for url in &meta.source_urls {
                        println!("  - {url}");
                    }
                }
            }
        }
    }
}

fn welcome(cfg: &Config) {
    println!("webchat · model {}", cfg.model);
    println!("Type /exit to quit, /history to show this session, /clear to reset the screen.\n");
}

async fn check_model(ollama: &OllamaClient) -> Result<bool> {
    let models = ollama.list_models().await.context("failed to list models")?;
    if models.iter().any(|m| m == ollama.model()) {
        return Ok(true);
    }
    eprintln!("model '{}' not found", ollama.model());
    eprintln!("Available models:");
    for m in &models {
        eprintln!("  - {m}");
    }
    eprintln!("Pull the model with: ollama pull {}", ollama.model());
    Ok(false)
}

async fn run(cfg: Config) -> Result<ExitCode> {
    let ollama = Arc::new(
        OllamaClient::new(&cfg.ollama_url, &cfg.model, cfg.ollama_timeout)
            .context("failed to build inference client")?
            .with_num_ctx(cfg.num_ctx),
    );

    if let Err(e) = ollama.health_check().await {
        eprintln!("{e}");
        if e.kind() == ErrorKind::FatalStartup {
            eprintln!("Make sure Ollama is running: ollama serve");
        }
        return Ok(ExitCode::FAILURE);
    }
    if !check_model(&ollama).await? {
        return Ok(ExitCode::FAILURE);
    }

    let mut cfg = cfg;
    let search = SearchClient::new(&cfg.searxng_url, cfg.search_timeout, &cfg.user_agent)
        .context("failed to build search client")?;
    if cfg.auto_search {
        if let Err(e) = search.health_check().await {
            println!("⚠ Search check failed: {e}");
            println!("ℹ Web search will be disabled. Start SearXNG or use --no-search.");
            cfg.auto_search = false;
        }
    }

    let fetcher = Fetcher::new(FetcherConfig {
        timeout: cfg.crawl_timeout,
        max_content_size: cfg.max_content_size,
        user_agent: cfg.user_agent.clone(),
    })
    .context("failed to build fetcher")?;
    let crawler = Crawler::new(fetcher, cfg.max_crawlers);

    let router: Box<dyn QueryRouter> = match cfg.router {
        RouterKind::Heuristic => Box::new(HeuristicRouter::new()),
        RouterKind::Model => Box::new(ModelRouter::new(ollama.clone() as Arc<dyn ChatBackend>)),
    };
    let augmenter = Augmenter::new(router, search, crawler, cfg.max_results);
    log::info!("query router: {}", augmenter.router_name());

    let history: Box<dyn HistoryStore> =
        match JsonHistoryStore::open(&cfg.history_path, cfg.max_history_size) {
            Ok(store) => Box::new(store),
            Err(e) => {
                println!("⚠ Failed to load history: {e}");
                Box::new(MemoryHistoryStore::new())
            }
        };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut session = Session {
        terminal: Terminal {
            show_thinking: cfg.show_thinking,
            verbose: cfg.verbose,
            reasoning_open: false,
        },
        cfg,
        ollama: ollama.clone(),
        augmenter,
        history,
    };

    welcome(&session.cfg);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        if let Err(e) = std::io::stdout().flush() {
            log::debug!("failed to flush prompt: {e}");
        }

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let query = match line {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) | Err(_) => break,
        };

        match query.as_str() {
            "" => continue,
            "/exit" | "/quit" | "exit" | "quit" => break,
            "/clear" => {
                print!("\x1b[2J\x1b[H");
                welcome(&session.cfg);
                continue;
            }
            "/history" => {
                session.print_history();
                continue;
            }
            _ => {}
        }

        session.turn(&query, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }

    println!("\nStopping model to free up RAM...");
    if let Err(e) = ollama.stop_model().await {
        println!("⚠ Failed to stop model: {e}");
    }
    println!("Goodbye!");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = cli.apply(CONFIG.clone());
    init_logging(cfg.verbose)?;

    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return Ok(ExitCode::FAILURE);
    }

    run(cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal() -> Terminal {
        Terminal {
            show_thinking: true,
            verbose: false,
            reasoning_open: false,
        }
    }

    #[test]
    fn reasoning_prefix_reopens_after_interrupted_stream() {
        let mut term = terminal();
        term.on_reasoning("half a thought");
        assert!(term.reasoning_open);

        // stream died before any answer arrived
        term.begin_turn();
        assert!(!term.reasoning_open);

        term.on_reasoning("next");
        assert!(term.reasoning_open);
    }

    #[test]
    fn answer_closes_reasoning_block() {
        let mut term = terminal();
        term.on_reasoning("r");
        term.on_reasoning_done();
        assert!(!term.reasoning_open);
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from(["webchat", "--no-search", "--think-tags", "--router", "heuristic", "--max-results", "3"]);
        let cfg = cli.apply(Config::default());
        assert!(!cfg.auto_search);
        assert_eq!(cfg.think_encoding, ThinkEncoding::Tags);
        assert_eq!(cfg.router, RouterKind::Heuristic);
        assert_eq!(cfg.max_results, 3);
    }
}
