//! Server-sent event decoding for streaming providers.

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};

use super::FragmentStream;
use crate::error::GenerationError;

/// What a provider-specific parser made of one event payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Payload {
    Fragment(String),
    Skip,
    Done,
}

/// Incremental `text/event-stream` decoder yielding the `data` of each event.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds raw bytes, returning the payloads of every event completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flushes an event left open when the body ended without a blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let mut events = Vec::new();
            self.handle_line(line.trim_end_matches('\r'), &mut events);
        }
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(std::mem::take(&mut self.data).join("\n"));
            }
            return;
        }
        // comment, event:, id: and retry: lines carry nothing we use
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

struct SseState<S, F> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    queued: VecDeque<String>,
    parse: F,
    finished: bool,
}

/// Adapts a streaming HTTP body into answer fragments.
///
/// Nothing is read from `body` until the returned stream is polled, and the
/// stream ends after the first error or `Payload::Done`.
pub(crate) fn fragment_stream<S, B, F>(body: S, parse: F) -> FragmentStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: Fn(&str) -> Result<Payload, GenerationError> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        queued: VecDeque::new(),
        parse,
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.queued.pop_front() {
                match (state.parse)(&data) {
                    Ok(Payload::Fragment(text)) => return Some((Ok(text), state)),
                    Ok(Payload::Skip) => continue,
                    Ok(Payload::Done) => return None,
                    Err(err) => {
                        state.finished = true;
                        state.queued.clear();
                        return Some((Err(err), state));
                    }
                }
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.queued.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(GenerationError::Http(err)), state));
                }
                None => {
                    state.finished = true;
                    state.queued.extend(state.decoder.finish());
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn echo(data: &str) -> Result<Payload, GenerationError> {
        match data {
            "[DONE]" => Ok(Payload::Done),
            "" => Ok(Payload::Skip),
            "boom" => Err(GenerationError::Malformed {
                provider: "test",
                message: "boom".into(),
            }),
            other => Ok(Payload::Fragment(other.to_string())),
        }
    }

    #[test]
    fn decodes_events_split_across_reads() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\n: keepalive\n\n"), vec!["{\"a\":1}"]);
        assert_eq!(
            decoder.push(b"event: message\ndata: one\ndata: two\n\n"),
            vec!["one\ntwo"]
        );
        assert_eq!(decoder.push(b"data: tail"), Vec::<String>::new());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn keeps_multibyte_text_split_mid_character() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: café\n\n".as_bytes();
        let (head, tail) = bytes.split_at(10);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["café"]);
    }

    #[tokio::test]
    async fn yields_fragments_until_done() {
        let body = stream::iter(vec![
            Ok::<_, reqwest::Error>(b"data: Hello\n\ndata: \n\n".to_vec()),
            Ok(b"data: , world\n\ndata: [DONE]\n\ndata: ignored\n\n".to_vec()),
        ]);
        let fragments: Vec<String> = fragment_stream(body, echo)
            .map(|item| item.expect("fragment"))
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hello", ", world"]);
    }

    #[tokio::test]
    async fn stops_after_parse_error() {
        let body = stream::iter(vec![Ok::<_, reqwest::Error>(
            b"data: ok\n\ndata: boom\n\ndata: later\n\n".to_vec(),
        )]);
        let items: Vec<Result<String, GenerationError>> =
            fragment_stream(body, echo).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(GenerationError::Malformed { .. })));
    }

    #[tokio::test]
    async fn flushes_unterminated_final_event() {
        let body = stream::iter(vec![Ok::<_, reqwest::Error>(b"data: last".to_vec())]);
        let fragments: Vec<String> = fragment_stream(body, echo)
            .map(|item| item.expect("fragment"))
            .collect()
            .await;
        assert_eq!(fragments, vec!["last"]);
    }

    #[tokio::test]
    async fn dropping_fragments_stops_reading_the_body() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::task::Poll;

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let mut reads: std::vec::IntoIter<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"data: one\n\n".to_vec()),
            Ok(b"data: two\n\n".to_vec()),
            Ok(b"data: three\n\n".to_vec()),
        ]
        .into_iter();
        let body = stream::poll_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(reads.next())
        });

        let mut fragments = fragment_stream(body, echo);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        let first = fragments.next().await.expect("fragment").expect("ok");
        assert_eq!(first, "one");
        drop(fragments);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }
}
