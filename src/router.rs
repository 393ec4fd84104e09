use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data_models::{ChatMessage, SearchDecision};
use crate::error::DecisionError;
use crate::inference::ChatBackend;

/// Decides, per user query, whether to search the web and for what.
///
/// One implementation is picked when the session starts. A failed decision means
/// "no search this turn", never a fatal error.
#[async_trait::async_trait]
pub trait QueryRouter: Send + Sync {
    async fn decide(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchDecision, DecisionError>;

    fn name(&self) -> &'static str;
}

/// Scores must be strictly greater than this to trigger a search.
pub const SEARCH_THRESHOLD: i32 = 40;

struct KeywordCategory {
    label: &'static str,
    weight: i32,
    patterns: &'static [&'static str],
}

const CATEGORIES: &[KeywordCategory] = &[
    KeywordCategory {
        label: "time-sensitive",
        weight: 40,
        patterns: &[
            "latest",
            "current",
            "today",
            "now",
            "recent",
            "2024",
            "2025",
            "this year",
            "this month",
            "this week",
            "breaking",
            "news",
            "updated",
            "new",
            "yesterday",
            "live",
            "ongoing",
            "happening",
        ],
    },
    KeywordCategory {
        label: "factual",
        weight: 30,
        patterns: &[
            "what is",
            "what are",
            "who is",
            "who are",
            "when did",
            "when was",
            "where is",
            "where are",
            "how many",
            "how much",
            "which",
            "price of",
            "cost of",
            "weather",
            "stock",
            "score",
            "result",
        ],
    },
    KeywordCategory {
        label: "research",
        weight: 20,
        patterns: &[
            "compare",
            "comparison",
            "best",
            "top",
            "review",
            "reviews",
            "vs",
            "versus",
            "difference between",
            "pros and cons",
            "alternatives",
            "options",
            "recommend",
        ],
    },
    KeywordCategory {
        label: "explanation (LLM better)",
        weight: -30,
        patterns: &[
            "explain",
            "how does",
            "how do",
            "why does",
            "why do",
            "concept of",
            "teach me",
            "tutorial",
            "guide",
            "understanding",
            "learn",
        ],
    },
    KeywordCategory {
        label: "code (LLM better)",
        weight: -40,
        patterns: &[
            "code",
            "function",
            "algorithm",
            "implement",
            "debug",
            "error",
            "syntax",
            "program",
            "variable",
            "class",
            "method",
            "api",
        ],
    },
];

/// Deterministic keyword scoring. No I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicRouter;

impl HeuristicRouter {
    pub fn new() -> HeuristicRouter {
        HeuristicRouter
    }

    /// Sums the weight of every category with at least one substring match.
    pub fn score(query: &str) -> (i32, Vec<&'static str>) {
        let query = query.trim().to_lowercase();
        let mut score = 0;
        let mut labels = Vec::new();
        for category in CATEGORIES {
            if category.patterns.iter().any(|p| query.contains(p)) {
                score += category.weight;
                labels.push(category.label);
            }
        }
        (score, labels)
    }

    pub fn analyze(&self, query: &str) -> SearchDecision {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return SearchDecision {
                confidence: Some(0),
                ..SearchDecision::no_search("empty query")
            };
        }

        let (score, labels) = Self::score(trimmed);
        let needs_search = score > SEARCH_THRESHOLD;
        let reason = if labels.is_empty() {
            "general query".to_string()
        } else {
            labels.join(", ")
        };

        SearchDecision {
            needs_search,
            search_queries: if needs_search {
                vec![trimmed.to_string()]
            } else {
                Vec::new()
            },
            reason,
            confidence: Some(score),
        }
    }
}

#[async_trait::async_trait]
impl QueryRouter for HeuristicRouter {
    async fn decide(
        &self,
        query: &str,
        _cancel: &CancellationToken,
    ) -> Result<SearchDecision, DecisionError> {
        Ok(self.analyze(query))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

const DECISION_PROMPT: &str = r#"You are a search decision system. Analyze if the user's query requires web search.

User query: "{query}"

Decide if this query needs current web information. Respond ONLY with valid JSON in this exact format:
{
  "needs_search": true/false,
  "search_queries": ["query 1", "query 2"],
  "reason": "brief reason"
}

Guidelines:
- needs_search=true for: current events, recent news, prices, weather, facts that change
- needs_search=false for: coding help, explanations, math, creative writing, general knowledge
- If needs_search=true, provide search_queries as an array (each query: concise, 2-5 words)
- You can provide multiple queries to gather comprehensive information (e.g., "iPhone 16 specs" and "Samsung S24 specs" for comparison)
- Keep reason under 10 words

Respond with JSON only, no other text."#;

/// Asks the model itself whether the query needs a search.
pub struct ModelRouter {
    backend: Arc<dyn ChatBackend>,
}

impl ModelRouter {
    pub fn new(backend: Arc<dyn ChatBackend>) -> ModelRouter {
        ModelRouter { backend }
    }

    pub fn prompt(query: &str) -> String {
        DECISION_PROMPT.replace("{query}", query)
    }

    /// Parses the model's reply, tolerating a surrounding markdown code fence.
    pub fn parse_reply(reply: &str) -> Result<SearchDecision, DecisionError> {
        let cleaned = strip_code_fence(reply);
        let mut decision: SearchDecision =
            serde_json::from_str(cleaned).map_err(|source| DecisionError::Parse {
                response: cleaned.to_string(),
                source,
            })?;
        decision.search_queries = decision
            .search_queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        Ok(decision)
    }
}

#[async_trait::async_trait]
impl QueryRouter for ModelRouter {
    async fn decide(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchDecision, DecisionError> {
        if query.trim().is_empty() {
            return Ok(SearchDecision::no_search("empty query"));
        }
        let messages = vec![ChatMessage::user(Self::prompt(query))];
        let reply = self.backend.chat(messages, cancel).await?;
        let decision = Self::parse_reply(&reply)?;
        log::debug!(
            "model decision: needs_search={} queries={:?} reason={:?}",
            decision.needs_search,
            decision.search_queries,
            decision.reason
        );
        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        return trimmed;
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
