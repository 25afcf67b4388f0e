//! Incremental decoding of `text/event-stream` bodies into answer fragments.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::debug;

use super::error::ApiError;

const DATA_PREFIX: &str = "data:";

/// Buffers raw chunks and yields one fragment per `data:` line of every
/// complete event. Events are delimited by a blank line; an incomplete
/// trailing event stays buffered until the next chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some((end, delimiter_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
            parse_event(&event[..end], &mut fragments);
        }
        fragments
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        let mut fragments = Vec::new();
        if !rest.is_empty() {
            parse_event(&rest, &mut fragments);
        }
        fragments
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Position of the first blank line, as (event end, delimiter length).
/// Both `\n\n` and `\r\n\r\n` terminate an event.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// One fragment per `data:` line. A single space after the colon is a
/// separator and is removed, so `data: hello` gives `hello`; further spaces
/// are content. A payload that is empty after that (`data:` or `data: `)
/// stands for a line break. A backend that puts a leading-space token right
/// after the colon (`data: jours` for `" jours"`) therefore loses that space;
/// it must send `data:  jours`.
fn parse_event(event: &[u8], out: &mut Vec<String>) {
    // Delimiters are ASCII, so a complete event never splits a UTF-8 sequence.
    let text = String::from_utf8_lossy(event);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            if payload.is_empty() {
                out.push("\n".to_string());
            } else {
                out.push(payload.to_string());
            }
        }
    }
}

struct FragmentState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    finished: bool,
    emitted: usize,
}

/// Adapt a body of byte chunks into a stream of fragments.
///
/// A transport error ends the stream with that error. Dropping the returned
/// stream drops the body, which aborts the underlying connection.
pub fn fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String, ApiError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ApiError> + Send,
{
    let state = FragmentState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
        emitted: 0,
    };

    stream::try_unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.ready.pop_front() {
                st.emitted += 1;
                return Ok(Some((fragment, st)));
            }
            if st.finished {
                debug!(fragments = st.emitted, "event stream completed");
                return Ok(None);
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let decoded = st.decoder.feed(chunk.as_ref());
                    st.ready.extend(decoded);
                }
                Some(Err(e)) => {
                    let err: ApiError = e.into();
                    debug!(fragments = st.emitted, error = %err, "event stream failed");
                    return Err(err);
                }
                None => {
                    st.finished = true;
                    let rest = st.decoder.finish();
                    st.ready.extend(rest);
                }
            }
        }
    })
}
