use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FetchError;

/// A single hit returned by the search service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Snippet text.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SearchResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub number_of_results: f64,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// Outcome of fetching one URL. Failures are kept in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub error: Option<FetchError>,
    pub duration: Duration,
}

impl CrawlResult {
    pub fn success(url: String, title: String, content: String, duration: Duration) -> CrawlResult {
        CrawlResult {
            url,
            title,
            content,
            error: None,
            duration,
        }
    }

    pub fn failure(url: String, error: FetchError, duration: Duration) -> CrawlResult {
        CrawlResult {
            url,
            title: String::new(),
            content: String::new(),
            error: Some(error),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchDecision {
    pub needs_search: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub search_queries: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
    /// Keyword score; only set by the heuristic router.
    #[serde(skip)]
    pub confidence: Option<i32>,
}

/// Models often answer `null` for fields they have nothing to put in.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl SearchDecision {
    pub fn no_search(reason: impl Into<String>) -> SearchDecision {
        SearchDecision {
            needs_search: false,
            search_queries: Vec::new(),
            reason: reason.into(),
            confidence: None,
        }
    }
}

/// Normalized unit of a streamed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Reasoning(String),
    Answer(String),
    Done,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.into(),
            thinking: String::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> ChatMessage {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> ChatMessage {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> ChatMessage {
        Self::new("assistant", content)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    pub search_performed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,
}

/// A completed turn record handed to the history store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl HistoryMessage {
    pub fn new(role: &str, content: impl Into<String>, timestamp: DateTime<Utc>) -> HistoryMessage {
        HistoryMessage {
            role: role.to_string(),
            content: content.into(),
            timestamp,
            metadata: None,
        }
    }

    pub fn with_sources(mut self, source_urls: Vec<String>) -> HistoryMessage {
        if !source_urls.is_empty() {
            self.metadata = Some(MessageMetadata {
                search_performed: true,
                source_urls,
            });
        }
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

impl Session {
    pub fn new() -> Session {
        let now = Utc::now();
        Session {
            id: nanoid::nanoid!(),
            started_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
