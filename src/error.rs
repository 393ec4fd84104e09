use thiserror::Error;

/// Coarse classification shared by every component error. Callers use it to decide
/// between "warn and continue" and "abort at startup".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection, DNS, TLS or timeout failures.
    Transport,
    /// Unexpected status codes or malformed response bodies.
    Protocol,
    /// The URL was reachable but its content is refused (type, redirects).
    ContentPolicy,
    /// The query router could not produce a decision.
    Decision,
    /// A required collaborator is unreachable at startup.
    FatalStartup,
    /// The caller cancelled the operation.
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("failed to parse HTML: {0}")]
    Parse(String),
}

/// Per-URL failure. Stored on `CrawlResult` instead of being returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("HTTP {status}")]
    Http { status: u16 },
    #[error("non-HTML content type: {0}")]
    UnsupportedContentType(String),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("failed to extract text: {0}")]
    Extract(#[from] ExtractError),
    #[error("crawl worker stopped before finishing this url")]
    WorkerLost,
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transport(_) | FetchError::Body(_) | FetchError::WorkerLost => {
                ErrorKind::Transport
            }
            FetchError::InvalidUrl { .. } | FetchError::Http { .. } | FetchError::Extract(_) => {
                ErrorKind::Protocol
            }
            FetchError::TooManyRedirects | FetchError::UnsupportedContentType(_) => {
                ErrorKind::ContentPolicy
            }
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_redirect() {
            FetchError::TooManyRedirects
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error(
        "search service returned 403 Forbidden; the JSON API may not be enabled (check settings.yml for 'formats: [html, json]')"
    )]
    ApiDisabled,
    #[error("search service returned status {status}: {body}")]
    Service { status: u16, body: String },
    #[error("failed to parse search response: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("search service is unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::Transport(_) | SearchError::Unreachable { .. } => ErrorKind::Transport,
            SearchError::ApiDisabled | SearchError::Service { .. } | SearchError::Parse(_) => {
                ErrorKind::Protocol
            }
            SearchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference service is unreachable at {url}: {source} (is Ollama running?)")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("inference service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Decode(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("cancelled")]
    Cancelled,
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Unreachable { .. } => ErrorKind::FatalStartup,
            InferenceError::Transport(_) | InferenceError::Stream(_) => ErrorKind::Transport,
            InferenceError::Status { .. } | InferenceError::Decode(_) => ErrorKind::Protocol,
            InferenceError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("decision call failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("failed to parse decision: {source}; response: {response}")]
    Parse {
        response: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecisionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Decision
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}
