use std::collections::HashSet;
use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;

use crate::crawler::{Crawler, PageFetcher};
use crate::data_models::{ChatMessage, CrawlResult, HistoryMessage, SearchDecision};
use crate::error::SearchError;
use crate::router::QueryRouter;
use crate::search::SearchClient;

const BASE_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
const SEARCH_SYSTEM_SUFFIX: &str = " You have access to current web information to answer questions accurately. Cite sources when referencing specific information.";
const CONTEXT_ACK: &str =
    "I've reviewed the web search results and I'm ready to answer your question based on this information.";

/// Source of search hits for the pipeline. `SearchClient` is the real one.
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    async fn search_urls(
        &self,
        query: &str,
        cancel: &CancellationToken,
        max_results: usize,
    ) -> Result<Vec<String>, SearchError>;
}

#[async_trait::async_trait]
impl WebSearch for SearchClient {
    async fn search_urls(
        &self,
        query: &str,
        cancel: &CancellationToken,
        max_results: usize,
    ) -> Result<Vec<String>, SearchError> {
        let results = self.search(query, cancel, max_results).await?;
        Ok(results.into_iter().map(|r| r.url).collect())
    }
}

/// Progress notifications for the terminal layer.
pub trait AugmentObserver {
    fn on_decision(&mut self, _decision: &SearchDecision) {}
    fn on_decision_failed(&mut self, _error: &str) {}
    fn on_search(&mut self, _index: usize, _total: usize, _query: &str) {}
    fn on_search_failed(&mut self, _index: usize, _error: &SearchError) {}
    fn on_crawl(&mut self, _url_count: usize) {}
}

pub struct SilentAugmentObserver;

impl AugmentObserver for SilentAugmentObserver {}

#[derive(Debug, Default)]
pub struct Augmentation {
    pub decision: Option<SearchDecision>,
    pub context: String,
    /// Every unique URL dispatched to the crawler, in search order.
    pub source_urls: Vec<String>,
    pub results: Vec<CrawlResult>,
    pub searches_run: usize,
}

impl Augmentation {
    pub fn successful_sources(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// Wires router → search → crawl → context block for one turn.
pub struct Augmenter<S: WebSearch, F: PageFetcher> {
    router: Box<dyn QueryRouter>,
    search: S,
    crawler: Crawler<F>,
    max_results: usize,
}

impl<S: WebSearch, F: PageFetcher> Augmenter<S, F> {
    pub fn new(
        router: Box<dyn QueryRouter>,
        search: S,
        crawler: Crawler<F>,
        max_results: usize,
    ) -> Augmenter<S, F> {
        Augmenter {
            router,
            search,
            crawler,
            max_results,
        }
    }

    pub fn router_name(&self) -> &'static str {
        self.router.name()
    }

    /// Decides, searches and crawls. Nothing in here fails the turn: decision and
    /// search errors are reported to `observer` and the turn goes on without them.
    pub async fn augment<O: AugmentObserver + ?Sized>(
        &self,
        query: &str,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> Augmentation {
        let mut out = Augmentation::default();

        let decision = match self.router.decide(query, cancel).await {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("search decision failed: {e}");
                observer.on_decision_failed(&e.to_string());
                return out;
            }
        };
        observer.on_decision(&decision);

        if decision.needs_search {
            let queries = if decision.search_queries.is_empty() {
                vec![query.trim().to_string()]
            } else {
                decision.search_queries.clone()
            };
            self.run_searches(&queries, cancel, observer, &mut out).await;
            out.context = build_search_context(&out.results);
        }
        out.decision = Some(decision);
        out
    }

    async fn run_searches<O: AugmentObserver + ?Sized>(
        &self,
        queries: &[String],
        cancel: &CancellationToken,
        observer: &mut O,
        out: &mut Augmentation,
    ) {
        let mut seen: HashSet<String> = HashSet::new();
        for (i, query) in queries.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            observer.on_search(i + 1, queries.len(), query);
            let urls = match self.search.search_urls(query, cancel, self.max_results).await {
                Ok(urls) => urls,
                Err(e) => {
                    log::warn!("search {} failed: {e}", i + 1);
                    observer.on_search_failed(i + 1, &e);
                    continue;
                }
            };
            out.searches_run += 1;

            let fresh: Vec<String> = urls
                .into_iter()
                .filter(|u| !u.is_empty() && seen.insert(u.clone()))
                .collect();
            if fresh.is_empty() {
                continue;
            }
            out.source_urls.extend(fresh.iter().cloned());
            observer.on_crawl(fresh.len());
            let results = self.crawler.crawl_all(fresh, cancel).await;
            out.results.extend(results);
        }
    }
}

/// Formats successful, non-empty crawl results as a source-attributed block.
/// Returns an empty string when nothing usable was crawled.
pub fn build_search_context(results: &[CrawlResult]) -> String {
    let usable: Vec<&CrawlResult> = results
        .iter()
        .filter(|r| r.is_success() && !r.content.is_empty())
        .collect();
    if usable.is_empty() {
        return String::new();
    }

    let mut sb = String::new();
    sb.push_str("# Web Search Results\n\n");
    sb.push_str("The following information was retrieved from the web:\n\n");
    for (i, result) in usable.iter().enumerate() {
        let _ = writeln!(sb, "## Source {}: {}", i + 1, result.title);
        let _ = writeln!(sb, "URL: {}\n", result.url);
        sb.push_str(&result.content);
        sb.push_str("\n\n---\n\n");
    }
    sb
}

/// System prompt, optional context exchange, recent history, then the query.
pub fn build_messages(history: &[HistoryMessage], query: &str, search_context: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 4);

    let mut system = BASE_SYSTEM_PROMPT.to_string();
    if !search_context.is_empty() {
        system.push_str(SEARCH_SYSTEM_SUFFIX);
    }
    messages.push(ChatMessage::system(system));

    if !search_context.is_empty() {
        messages.push(ChatMessage::user(search_context));
        messages.push(ChatMessage::assistant(CONTEXT_ACK));
    }

    for msg in history {
        messages.push(ChatMessage::new(&msg.role, msg.content.clone()));
    }

    messages.push(ChatMessage::user(query));
    messages
}
