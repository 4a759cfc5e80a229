//! Stream reader: turns a chunked response body into text fragments.
//!
//! Contract:
//! - `text/event-stream` bodies are de-framed from `data: <json>` records; only
//!   `text-delta` frames contribute text. A record split across chunks is held
//!   back until its line is complete.
//! - Any other content type is forwarded verbatim as decoded text.
//! - A transport error is yielded once and ends the stream. So does an upstream
//!   `error` frame. `[DONE]` or body closure ends the stream cleanly.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;

use crate::error::{CoreResult, Game0Error};
use crate::http_client::{ByteStream, ResponseBody};

/// How the body is framed, decided from the declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    EventStream,
    Plain,
}

impl FrameMode {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|s| s.trim().to_ascii_lowercase());
        match essence.as_deref() {
            Some("text/event-stream") => Self::EventStream,
            _ => Self::Plain,
        }
    }
}

/// Incremental UTF-8 decoder. A multi-byte sequence cut by a chunk boundary is
/// held until the next chunk; invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still held; an unfinished sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Payload of one `data:` record.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    TextDelta {
        delta: String,
    },
    Error {
        #[serde(rename = "errorText", default)]
        error_text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Classification of a single event-stream line.
#[derive(Debug, PartialEq, Eq)]
pub enum Record {
    /// Blank lines, comments, and non-data fields.
    Ignore,
    Done,
    Frame(Frame),
    Malformed,
}

pub fn parse_record(line: &str) -> Record {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(payload) = line.strip_prefix("data:") else {
        return Record::Ignore;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == "[DONE]" {
        return Record::Done;
    }
    match serde_json::from_str::<Frame>(payload) {
        Ok(frame) => Record::Frame(frame),
        Err(_) => Record::Malformed,
    }
}

/// Lazy sequence of decoded text fragments over a byte stream.
pub struct FragmentStream<S> {
    inner: S,
    mode: FrameMode,
    decoder: Utf8Decoder,
    line_buf: String,
    ready: VecDeque<CoreResult<String>>,
    finished: bool,
}

impl FragmentStream<ByteStream> {
    pub fn from_response(resp: ResponseBody) -> Self {
        let mode = FrameMode::from_content_type(resp.content_type.as_deref());
        Self::new(resp.body, mode)
    }
}

impl<S> FragmentStream<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    pub fn new(inner: S, mode: FrameMode) -> Self {
        Self {
            inner,
            mode,
            decoder: Utf8Decoder::new(),
            line_buf: String::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    fn accept_text(&mut self, text: String) {
        match self.mode {
            FrameMode::Plain => {
                if !text.is_empty() {
                    self.ready.push_back(Ok(text));
                }
            }
            FrameMode::EventStream => {
                self.line_buf.push_str(&text);
                while !self.finished {
                    let Some(idx) = self.line_buf.find('\n') else {
                        break;
                    };
                    let line: String = self.line_buf.drain(..=idx).collect();
                    self.accept_line(line.trim_end_matches('\n'));
                }
            }
        }
    }

    fn accept_line(&mut self, line: &str) {
        match parse_record(line) {
            Record::Ignore | Record::Frame(Frame::Unknown) => {}
            Record::Done => {
                self.finished = true;
                self.line_buf.clear();
            }
            Record::Frame(Frame::TextDelta { delta }) => {
                if !delta.is_empty() {
                    self.ready.push_back(Ok(delta));
                }
            }
            Record::Frame(Frame::Error { error_text }) => {
                tracing::warn!(error = %error_text, "upstream reported an error frame");
                self.ready.push_back(Err(Game0Error::Upstream {
                    message: error_text,
                }));
                self.finished = true;
                self.line_buf.clear();
            }
            Record::Malformed => {
                tracing::debug!(line, "skipping malformed event-stream record");
            }
        }
    }

    fn accept_end(&mut self) {
        let tail = self.decoder.finish();
        self.accept_text(tail);
        if self.mode == FrameMode::EventStream && !self.finished && !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.accept_line(&line);
        }
        self.finished = true;
    }
}

impl<S> Stream for FragmentStream<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    type Item = CoreResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let text = this.decoder.decode(&chunk);
                    this.accept_text(text);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.accept_end(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use futures_util::stream;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = CoreResult<Bytes>> + Unpin {
        let owned: Vec<CoreResult<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        stream::iter(owned)
    }

    async fn texts<S>(s: FragmentStream<S>) -> Vec<String>
    where
        S: Stream<Item = CoreResult<Bytes>> + Unpin,
    {
        s.map(|r| r.expect("fragment ok")).collect().await
    }

    #[test]
    fn content_type_selects_mode() {
        assert_eq!(
            FrameMode::from_content_type(Some("text/event-stream")),
            FrameMode::EventStream
        );
        assert_eq!(
            FrameMode::from_content_type(Some("Text/Event-Stream; charset=utf-8")),
            FrameMode::EventStream
        );
        assert_eq!(
            FrameMode::from_content_type(Some("text/plain; charset=utf-8")),
            FrameMode::Plain
        );
        assert_eq!(FrameMode::from_content_type(None), FrameMode::Plain);
    }

    #[test]
    fn decoder_holds_split_multibyte_sequence() {
        let snow = "☃".as_bytes(); // 3 bytes
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&snow[..1]), "");
        assert_eq!(d.decode(&snow[1..2]), "");
        assert_eq!(d.decode(&[snow[2], b'!']), "☃!");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&[b'a', 0xff, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn record_parsing() {
        assert_eq!(parse_record(""), Record::Ignore);
        assert_eq!(parse_record(": keep-alive"), Record::Ignore);
        assert_eq!(parse_record("event: message"), Record::Ignore);
        assert_eq!(parse_record("data: [DONE]"), Record::Done);
        assert_eq!(
            parse_record("data:{\"type\":\"text-delta\",\"delta\":\"x\"}\r"),
            Record::Frame(Frame::TextDelta { delta: "x".into() })
        );
        assert_eq!(
            parse_record("data: {\"type\":\"text-start\",\"id\":\"0\"}"),
            Record::Frame(Frame::Unknown)
        );
        assert_eq!(parse_record("data: {\"type\":"), Record::Malformed);
    }

    #[tokio::test]
    async fn plain_mode_forwards_text_verbatim() {
        let s = FragmentStream::new(chunks(&[b"```htm", b"l\nfoo", b"\n```"]), FrameMode::Plain);
        assert_eq!(texts(s).await, vec!["```htm", "l\nfoo", "\n```"]);
    }

    #[tokio::test]
    async fn event_stream_reassembles_records_across_chunks() {
        let s = FragmentStream::new(
            chunks(&[
                b"data: {\"type\":\"start\"}\n\ndata: {\"type\":\"text-del",
                b"ta\",\"delta\":\"```html\\n\"}\n\ndata: {\"type\":\"text-delta\",\"delta\":\"<p>",
                b"hi</p>\"}\r\n\r\ndata: [DONE]\n\ndata: {\"type\":\"text-delta\",\"delta\":\"late\"}\n",
            ]),
            FrameMode::EventStream,
        );
        assert_eq!(texts(s).await, vec!["```html\n", "<p>hi</p>"]);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let s = FragmentStream::new(
            chunks(&[
                b"data: {oops}\n",
                b"data: {\"type\":\"text-delta\",\"delta\":\"ok\"}\n",
                b"data: not json at all\n",
            ]),
            FrameMode::EventStream,
        );
        assert_eq!(texts(s).await, vec!["ok"]);
    }

    #[tokio::test]
    async fn unterminated_tail_is_parsed_at_end() {
        let s = FragmentStream::new(
            chunks(&[b"data: {\"type\":\"text-delta\",\"delta\":\"tail\"}"]),
            FrameMode::EventStream,
        );
        assert_eq!(texts(s).await, vec!["tail"]);
    }

    #[tokio::test]
    async fn error_frame_surfaces_and_ends() {
        let mut s = FragmentStream::new(
            chunks(&[
                b"data: {\"type\":\"text-delta\",\"delta\":\"a\"}\n",
                b"data: {\"type\":\"error\",\"errorText\":\"quota\"}\n",
                b"data: {\"type\":\"text-delta\",\"delta\":\"b\"}\n",
            ]),
            FrameMode::EventStream,
        );
        assert_eq!(s.next().await.unwrap().unwrap(), "a");
        match s.next().await {
            Some(Err(Game0Error::Upstream { message })) => assert_eq!(message, "quota"),
            other => panic!("expected upstream error, got {other:?}"),
        }
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_is_yielded_once() {
        let items: Vec<CoreResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(Game0Error::EndpointUnavailable { endpoint: "gen".into() }),
            Ok(Bytes::from_static(b"never")),
        ];
        let mut s = FragmentStream::new(stream::iter(items), FrameMode::Plain);
        assert_eq!(s.next().await.unwrap().unwrap(), "abc");
        assert!(matches!(
            s.next().await,
            Some(Err(Game0Error::EndpointUnavailable { .. }))
        ));
        assert!(s.next().await.is_none());
    }
}
