//! Demultiplexes a streamed model reply into reasoning and answer text.
//!
//! Providers mark reasoning differently, so each encoding gets a [`StreamAdapter`]
//! that turns raw NDJSON lines into [`StreamEvent`]s. One [`StreamSplitter`] state
//! machine then runs over those events regardless of where they came from. Pick one
//! adapter per provider; they are not meant to be stacked.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::data_models::StreamEvent;
use crate::error::InferenceError;
use crate::inference::ChatChunk;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Receives fragments as they arrive. All methods default to no-ops.
pub trait StreamObserver {
    fn on_reasoning(&mut self, _fragment: &str) {}
    /// Fired once, between the last reasoning fragment and the first answer fragment.
    fn on_reasoning_done(&mut self) {}
    fn on_answer(&mut self, _fragment: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Events(Vec<StreamEvent>),
    /// Unparseable noise; the line is dropped.
    Skip,
    /// The provider reported an error in-band.
    Failed(String),
}

/// Normalizes one provider encoding into `StreamEvent`s.
pub trait StreamAdapter: Send {
    fn ingest(&mut self, line: &[u8]) -> LineOutcome;

    /// Flushes anything held back when the stream ends without a terminal chunk.
    fn finish(&mut self) -> Vec<StreamEvent> {
        Vec::new()
    }
}

fn parse_chunk(line: &[u8]) -> Option<ChatChunk> {
    serde_json::from_slice::<ChatChunk>(line).ok()
}

/// Reasoning arrives in a dedicated `message.thinking` field.
#[derive(Debug, Default)]
pub struct StructuredFieldAdapter;

impl StreamAdapter for StructuredFieldAdapter {
    fn ingest(&mut self, line: &[u8]) -> LineOutcome {
        let Some(chunk) = parse_chunk(line) else {
            return LineOutcome::Skip;
        };
        if let Some(err) = chunk.error {
            return LineOutcome::Failed(err);
        }

        let mut events = Vec::new();
        if !chunk.message.thinking.is_empty() {
            events.push(StreamEvent::Reasoning(chunk.message.thinking));
        }
        if !chunk.message.content.is_empty() {
            events.push(StreamEvent::Answer(chunk.message.content));
        }
        if chunk.done {
            events.push(StreamEvent::Done);
        }
        LineOutcome::Events(events)
    }
}

/// Reasoning is wrapped in inline `<think>`/`</think>` markers inside `content`.
/// Markers may be split across chunks, so a possible tag prefix at the end of a
/// chunk is held back until the next one arrives.
#[derive(Debug, Default)]
pub struct TagDelimitedAdapter {
    in_think: bool,
    pending: String,
    trim_next_answer: bool,
}

impl TagDelimitedAdapter {
    pub fn new() -> TagDelimitedAdapter {
        TagDelimitedAdapter::default()
    }

    fn emit(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if self.in_think {
            if !text.is_empty() {
                events.push(StreamEvent::Reasoning(text.to_string()));
            }
            return;
        }
        let text = if self.trim_next_answer {
            let trimmed = text.trim_start();
            if trimmed.is_empty() {
                return;
            }
            self.trim_next_answer = false;
            trimmed
        } else {
            text
        };
        if !text.is_empty() {
            events.push(StreamEvent::Answer(text.to_string()));
        }
    }

    fn push_content(&mut self, content: &str, events: &mut Vec<StreamEvent>) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(content);
        let mut rest = buf.as_str();

        loop {
            let tag = if self.in_think { THINK_CLOSE } else { THINK_OPEN };
            match rest.find(tag) {
                Some(pos) => {
                    let (before, after) = rest.split_at(pos);
                    self.emit(before, events);
                    if self.in_think {
                        self.trim_next_answer = true;
                    }
                    self.in_think = !self.in_think;
                    rest = &after[tag.len()..];
                }
                None => {
                    let keep = partial_tag_suffix(rest, tag);
                    let (emit_now, hold) = rest.split_at(rest.len() - keep);
                    self.emit(emit_now, events);
                    self.pending = hold.to_string();
                    break;
                }
            }
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| {
            n <= text.len()
                && text.is_char_boundary(text.len() - n)
                && tag.starts_with(&text[text.len() - n..])
        })
        .unwrap_or(0)
}

impl StreamAdapter for TagDelimitedAdapter {
    fn ingest(&mut self, line: &[u8]) -> LineOutcome {
        let Some(chunk) = parse_chunk(line) else {
            return LineOutcome::Skip;
        };
        if let Some(err) = chunk.error {
            return LineOutcome::Failed(err);
        }

        let mut events = Vec::new();
        if !chunk.message.content.is_empty() {
            self.push_content(&chunk.message.content, &mut events);
        }
        if chunk.done {
            events.extend(self.finish());
            events.push(StreamEvent::Done);
        }
        LineOutcome::Events(events)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        self.emit(&pending, &mut events);
        events
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitState {
    Idle,
    Reasoning,
    Answering,
    Done,
}

/// Reasoning/answer state machine fed with normalized events.
#[derive(Debug)]
pub struct StreamSplitter {
    state: SplitState,
    reasoning: String,
    answer: String,
}

impl Default for StreamSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSplitter {
    pub fn new() -> StreamSplitter {
        StreamSplitter {
            state: SplitState::Idle,
            reasoning: String::new(),
            answer: String::new(),
        }
    }

    pub fn state(&self) -> SplitState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SplitState::Done
    }

    /// Applies one event. Events after `Done` are ignored.
    pub fn handle<O: StreamObserver + ?Sized>(&mut self, event: StreamEvent, observer: &mut O) {
        if self.state == SplitState::Done {
            return;
        }
        match event {
            StreamEvent::Reasoning(fragment) => {
                // reasoning that shows up after the answer started is still recorded,
                // but the answer phase is not reopened
                if self.state == SplitState::Idle {
                    self.state = SplitState::Reasoning;
                }
                self.reasoning.push_str(&fragment);
                observer.on_reasoning(&fragment);
            }
            StreamEvent::Answer(fragment) => {
                match self.state {
                    SplitState::Reasoning => {
                        self.state = SplitState::Answering;
                        observer.on_reasoning_done();
                    }
                    SplitState::Idle => self.state = SplitState::Answering,
                    _ => {}
                }
                self.answer.push_str(&fragment);
                observer.on_answer(&fragment);
            }
            StreamEvent::Done => self.state = SplitState::Done,
        }
    }

    pub fn into_outcome(self, error: Option<InferenceError>) -> SplitOutcome {
        SplitOutcome {
            completed: self.state == SplitState::Done,
            reasoning: self.reasoning,
            answer: self.answer,
            error,
        }
    }
}

/// Everything accumulated for one request, plus the error that ended it early, if any.
#[derive(Debug)]
pub struct SplitOutcome {
    pub reasoning: String,
    pub answer: String,
    /// True when the terminal marker was seen.
    pub completed: bool,
    pub error: Option<InferenceError>,
}

impl SplitOutcome {
    pub fn failed(error: InferenceError) -> SplitOutcome {
        StreamSplitter::new().into_outcome(Some(error))
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs one line through the adapter and the splitter. Returns the in-band error, if any.
fn feed_line<A, O>(
    line: &[u8],
    adapter: &mut A,
    splitter: &mut StreamSplitter,
    observer: &mut O,
) -> Option<InferenceError>
where
    A: StreamAdapter + ?Sized,
    O: StreamObserver + ?Sized,
{
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match adapter.ingest(line) {
        LineOutcome::Events(events) => {
            for event in events {
                splitter.handle(event, observer);
            }
            None
        }
        LineOutcome::Skip => {
            log::debug!("skipping malformed stream line");
            None
        }
        LineOutcome::Failed(msg) => Some(InferenceError::Stream(msg)),
    }
}

/// Reads an NDJSON byte stream to completion (or to the terminal marker), feeding
/// each line through `adapter` and the resulting events through the splitter.
pub async fn split_stream<S, B, E, A, O>(
    stream: S,
    adapter: &mut A,
    observer: &mut O,
    cancel: &CancellationToken,
) -> SplitOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    A: StreamAdapter + ?Sized,
    O: StreamObserver + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut splitter = StreamSplitter::new();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return splitter.into_outcome(Some(InferenceError::Cancelled));
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                buf.extend_from_slice(bytes.as_ref());
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(err) = feed_line(&line, adapter, &mut splitter, observer) {
                        return splitter.into_outcome(Some(err));
                    }
                    if splitter.is_done() {
                        return splitter.into_outcome(None);
                    }
                }
            }
            Some(Err(e)) => {
                return splitter.into_outcome(Some(InferenceError::Stream(e.to_string())));
            }
            None => break,
        }
    }

    // trailing line without a newline
    if !buf.is_empty() {
        if let Some(err) = feed_line(&buf, adapter, &mut splitter, observer) {
            return splitter.into_outcome(Some(err));
        }
    }
    if !splitter.is_done() {
        for event in adapter.finish() {
            splitter.handle(event, observer);
        }
    }
    splitter.into_outcome(None)
}
