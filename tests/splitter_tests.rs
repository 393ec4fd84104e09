use futures::stream;
use tokio_util::sync::CancellationToken;

use webchat::data_models::StreamEvent;
use webchat::error::{ErrorKind, InferenceError};
use webchat::splitter::*;

mod test_helpers {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Seen {
        Reasoning(String),
        ReasoningDone,
        Answer(String),
    }

    #[derive(Default)]
    pub struct Recorder {
        pub seen: Vec<Seen>,
    }

    impl StreamObserver for Recorder {
        fn on_reasoning(&mut self, fragment: &str) {
            self.seen.push(Seen::Reasoning(fragment.to_string()));
        }

        fn on_reasoning_done(&mut self) {
            self.seen.push(Seen::ReasoningDone);
        }

        fn on_answer(&mut self, fragment: &str) {
            self.seen.push(Seen::Answer(fragment.to_string()));
        }
    }

    pub fn structured(thinking: &str, content: &str, done: bool) -> String {
        format!(
            "{}\n",
            serde_json::json!({
                "model": "m",
                "message": {"role": "assistant", "content": content, "thinking": thinking},
                "done": done,
            })
        )
    }

    pub fn tagged(content: &str, done: bool) -> String {
        format!(
            "{}\n",
            serde_json::json!({
                "message": {"role": "assistant", "content": content},
                "done": done,
            })
        )
    }

    pub fn ok_chunks(chunks: Vec<String>) -> Vec<Result<Vec<u8>, String>> {
        chunks.into_iter().map(|c| Ok(c.into_bytes())).collect()
    }
}

use test_helpers::*;

#[cfg(test)]
mod state_machine_tests {
    use super::*;

    #[test]
    fn test_reasoning_then_answer_fires_done_once() {
        let mut splitter = StreamSplitter::new();
        let mut rec = Recorder::default();
        for event in [
            StreamEvent::Reasoning("a".into()),
            StreamEvent::Reasoning("b".into()),
            StreamEvent::Answer("c".into()),
            StreamEvent::Answer("d".into()),
            StreamEvent::Done,
        ] {
            splitter.handle(event, &mut rec);
        }

        assert_eq!(
            rec.seen,
            vec![
                Seen::Reasoning("a".into()),
                Seen::Reasoning("b".into()),
                Seen::ReasoningDone,
                Seen::Answer("c".into()),
                Seen::Answer("d".into()),
            ]
        );
        let outcome = splitter.into_outcome(None);
        assert_eq!(outcome.reasoning, "ab");
        assert_eq!(outcome.answer, "cd");
        assert!(outcome.completed);
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_late_reasoning_does_not_reopen_phase() {
        let mut splitter = StreamSplitter::new();
        let mut rec = Recorder::default();
        splitter.handle(StreamEvent::Reasoning("r".into()), &mut rec);
        splitter.handle(StreamEvent::Answer("a".into()), &mut rec);
        splitter.handle(StreamEvent::Reasoning("late".into()), &mut rec);
        splitter.handle(StreamEvent::Answer("b".into()), &mut rec);

        assert_eq!(splitter.state(), SplitState::Answering);
        let done_count = rec.seen.iter().filter(|s| **s == Seen::ReasoningDone).count();
        assert_eq!(done_count, 1);
        let outcome = splitter.into_outcome(None);
        assert_eq!(outcome.reasoning, "rlate");
        assert_eq!(outcome.answer, "ab");
    }

    #[test]
    fn test_done_without_content() {
        let mut splitter = StreamSplitter::new();
        splitter.handle(StreamEvent::Done, &mut NoopObserver);
        let outcome = splitter.into_outcome(None);
        assert!(outcome.completed);
        assert!(outcome.answer.is_empty());
        assert!(outcome.reasoning.is_empty());
    }
}

#[cfg(test)]
mod split_stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_structured_stream_end_to_end() {
        let chunks = ok_chunks(vec![
            structured("Let me", "", false),
            structured(" think", "", false),
            structured("", "The answer", false),
            structured("", " is 4.", false),
            structured("", "", true),
        ]);
        let mut rec = Recorder::default();

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut rec,
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_ok());
        assert!(outcome.completed);
        assert_eq!(outcome.reasoning, "Let me think");
        assert_eq!(outcome.answer, "The answer is 4.");
        let done_at = rec.seen.iter().position(|s| *s == Seen::ReasoningDone).unwrap();
        assert!(rec.seen[..done_at].iter().all(|s| matches!(s, Seen::Reasoning(_))));
        assert!(rec.seen[done_at + 1..].iter().all(|s| matches!(s, Seen::Answer(_))));
    }

    #[tokio::test]
    async fn test_lines_split_across_byte_chunks() {
        let full = format!("{}{}", structured("", "hello", false), structured("", "", true));
        let (a, b) = full.split_at(17);
        let chunks = ok_chunks(vec![a.to_string(), b.to_string()]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.answer, "hello");
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let chunks = ok_chunks(vec![
            "garbage line\n".to_string(),
            "\n".to_string(),
            structured("", "still here", false),
            "{\"broken\": \n".to_string(),
            structured("", "", true),
        ]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.answer, "still here");
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_output() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(structured("hmm", "", false).into_bytes()),
            Ok(structured("", "partial", false).into_bytes()),
            Err("connection reset".to_string()),
            Ok(structured("", " never seen", false).into_bytes()),
        ];

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.reasoning, "hmm");
        assert_eq!(outcome.answer, "partial");
        assert!(!outcome.completed);
        let err = outcome.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_in_band_error_stops_the_stream() {
        let chunks = ok_chunks(vec![
            structured("", "before", false),
            "{\"error\":\"model crashed\"}\n".to_string(),
            structured("", " after", false),
        ]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.answer, "before");
        assert!(matches!(outcome.error, Some(InferenceError::Stream(ref m)) if m == "model crashed"));
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_marker() {
        let chunks = ok_chunks(vec![
            structured("", "end", true),
            structured("", " extra", false),
        ]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.answer, "end");
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn test_stream_without_done_is_not_completed() {
        let chunks = ok_chunks(vec![structured("", "cut", false)]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut StructuredFieldAdapter,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_ok());
        assert!(!outcome.completed);
        assert_eq!(outcome.answer, "cut");
    }

    #[tokio::test]
    async fn test_cancelled_stream_reports_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks = ok_chunks(vec![structured("", "x", true)]);

        let outcome = split_stream(stream::iter(chunks), &mut StructuredFieldAdapter, &mut NoopObserver, &cancel).await;

        assert!(matches!(outcome.error, Some(InferenceError::Cancelled)));
        assert!(outcome.answer.is_empty());
    }

    #[tokio::test]
    async fn test_tagged_stream_end_to_end() {
        let chunks = ok_chunks(vec![
            tagged("<think>", false),
            tagged("step one, ", false),
            tagged("step two</th", false),
            tagged("ink>\n\nFinal", false),
            tagged(" answer", false),
            tagged("", true),
        ]);
        let mut rec = Recorder::default();

        let outcome = split_stream(
            stream::iter(chunks),
            &mut TagDelimitedAdapter::new(),
            &mut rec,
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.completed);
        assert_eq!(outcome.reasoning, "step one, step two");
        assert_eq!(outcome.answer, "Final answer");
        assert_eq!(rec.seen.iter().filter(|s| **s == Seen::ReasoningDone).count(), 1);
    }

    #[tokio::test]
    async fn test_tagged_stream_without_markers_is_all_answer() {
        let chunks = ok_chunks(vec![tagged("plain ", false), tagged("reply", false), tagged("", true)]);
        let mut rec = Recorder::default();

        let outcome = split_stream(
            stream::iter(chunks),
            &mut TagDelimitedAdapter::new(),
            &mut rec,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.answer, "plain reply");
        assert!(outcome.reasoning.is_empty());
        assert!(!rec.seen.contains(&Seen::ReasoningDone));
    }

    #[tokio::test]
    async fn test_held_back_prefix_flushed_at_eof() {
        // ends on "<" with no terminal chunk: the held-back byte still reaches the answer
        let chunks = ok_chunks(vec![tagged("a <", false)]);

        let outcome = split_stream(
            stream::iter(chunks),
            &mut TagDelimitedAdapter::new(),
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.answer, "a <");
    }
}
