//! Streamed chat completion.
//!
//! Providers hand back an [`AnswerStream`]: a lazy, single-use sequence of text
//! fragments in generation order. It ends when the provider signals completion,
//! yields one `Err` and stops if anything goes wrong first, and releases the
//! underlying connection as soon as it is dropped.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::build_prompt::Message;
use crate::error::{Error, Result};
use crate::http::Http;

pub type AnswerStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issues one generation request. Errors before the first byte of output are
    /// returned directly; later ones arrive through the stream.
    async fn stream(&self, messages: &[Message]) -> Result<AnswerStream>;
}

/// Collects a whole stream into one string, failing on the first error.
pub async fn collect_answer(mut fragments: AnswerStream) -> Result<String> {
    let mut out = String::new();
    while let Some(fragment) = fragments.next().await {
        out.push_str(&fragment?);
    }
    Ok(out)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

pub struct OllamaChat {
    http: Http,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(http: Http, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn stream(&self, messages: &[Message]) -> Result<AnswerStream> {
        let url = format!("{}/api/chat", self.base_url);
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let resp = self
            .http
            .post_stream(&url, None, &req)
            .await
            .map_err(|e| Error::provider(self.name(), e))?;
        tracing::debug!(provider = self.name(), model = %self.model, "answer stream opened");
        Ok(fragment_stream(resp, WireFormat::Ndjson, self.name()))
    }
}

pub struct OpenAiChat {
    http: Http,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(http: Http, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, messages: &[Message]) -> Result<AnswerStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let resp = self
            .http
            .post_stream(&url, Some(&self.api_key), &req)
            .await
            .map_err(|e| Error::provider(self.name(), e))?;
        tracing::debug!(provider = self.name(), model = %self.model, "answer stream opened");
        Ok(fragment_stream(resp, WireFormat::Sse, self.name()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON object per line, last one carries `"done": true` (Ollama).
    Ndjson,
    /// `data: {json}` events terminated by `data: [DONE]` (OpenAI).
    Sse,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Fragment(String),
    /// Final fragment that also signals completion.
    Last(String),
    Done,
    Skip,
}

/// Parses one complete line of a streamed chat body.
pub fn parse_line(format: WireFormat, line: &str) -> std::result::Result<LineEvent, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    match format {
        WireFormat::Ndjson => {
            let json: Value = serde_json::from_str(line)
                .map_err(|e| format!("malformed stream line: {} | {}", e, line))?;
            if let Some(err) = json.get("error") {
                return Err(error_text(err));
            }
            let content = json
                .pointer("/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if json.get("done").and_then(Value::as_bool).unwrap_or(false) {
                if content.is_empty() {
                    return Ok(LineEvent::Done);
                }
                return Ok(LineEvent::Last(content.to_string()));
            }
            Ok(fragment_or_skip(content))
        }
        WireFormat::Sse => {
            let Some(data) = line.strip_prefix("data:") else {
                // event:, id:, retry: and ":" comment lines carry no text
                return Ok(LineEvent::Skip);
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(LineEvent::Done);
            }
            let json: Value = serde_json::from_str(data)
                .map_err(|e| format!("malformed stream event: {} | {}", e, data))?;
            if let Some(err) = json.get("error") {
                return Err(error_text(err));
            }
            let content = json
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(fragment_or_skip(content))
        }
    }
}

fn fragment_or_skip(content: &str) -> LineEvent {
    if content.is_empty() {
        LineEvent::Skip
    } else {
        LineEvent::Fragment(content.to_string())
    }
}

fn error_text(err: &Value) -> String {
    err.get("message")
        .and_then(Value::as_str)
        .or_else(|| err.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string())
}

/// Splits a byte stream into lines without breaking multi-byte characters that
/// straddle network chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=idx).collect();
            lines.push(String::from_utf8_lossy(&line[..idx]).into_owned());
        }
        lines
    }

    /// Whatever is left after the body ended without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Feeds lines through [`parse_line`], queueing fragments until the completion signal.
#[derive(Debug)]
pub struct FragmentDecoder {
    format: WireFormat,
    lines: LineDecoder,
    pending: VecDeque<String>,
    done: bool,
}

impl FragmentDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            lines: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        for line in self.lines.push(bytes) {
            self.accept(&line)?;
        }
        Ok(())
    }

    /// Called once the body is exhausted. A body that ends before the completion
    /// signal is an error, not a short answer.
    pub fn finish(&mut self) -> std::result::Result<(), String> {
        if let Some(line) = self.lines.finish() {
            self.accept(&line)?;
        }
        if !self.done {
            return Err("stream ended before the provider signalled completion".to_string());
        }
        Ok(())
    }

    pub fn next_fragment(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn accept(&mut self, line: &str) -> std::result::Result<(), String> {
        if self.done {
            return Ok(());
        }
        match parse_line(self.format, line)? {
            LineEvent::Fragment(text) => self.pending.push_back(text),
            LineEvent::Last(text) => {
                self.pending.push_back(text);
                self.done = true;
            }
            LineEvent::Done => self.done = true,
            LineEvent::Skip => {}
        }
        Ok(())
    }
}

/// Source of raw body bytes. Implemented for a live `reqwest::Response`.
#[async_trait]
pub trait ByteSource: Send + 'static {
    async fn next_bytes(&mut self) -> std::result::Result<Option<Vec<u8>>, String>;
}

#[async_trait]
impl ByteSource for reqwest::Response {
    async fn next_bytes(&mut self) -> std::result::Result<Option<Vec<u8>>, String> {
        self.chunk()
            .await
            .map(|c| c.map(|bytes| bytes.to_vec()))
            .map_err(|e| e.to_string())
    }
}

struct StreamState<S> {
    source: S,
    decoder: FragmentDecoder,
    finished: bool,
    failure: Option<Error>,
}

/// Turns a response body into an [`AnswerStream`]. Nothing is read until the stream
/// is polled. Fragments decoded before a failure are still yielded, then the error.
pub fn fragment_stream<S: ByteSource>(
    source: S,
    format: WireFormat,
    provider: &'static str,
) -> AnswerStream {
    let state = StreamState {
        source,
        decoder: FragmentDecoder::new(format),
        finished: false,
        failure: None,
    };
    stream::try_unfold(state, move |mut st| async move {
        loop {
            if let Some(fragment) = st.decoder.next_fragment() {
                return Ok(Some((fragment, st)));
            }
            if let Some(err) = st.failure.take() {
                tracing::warn!(provider, error = %err, "answer stream failed");
                return Err(err);
            }
            if st.finished || st.decoder.is_done() {
                tracing::debug!(provider, "answer stream complete");
                return Ok(None);
            }
            let step = match st.source.next_bytes().await {
                Ok(Some(bytes)) => st.decoder.push(&bytes),
                Ok(None) => {
                    st.finished = true;
                    st.decoder.finish()
                }
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                st.finished = true;
                st.failure = Some(Error::provider(provider, e));
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays canned body chunks, optionally failing after them.
    struct Canned {
        chunks: VecDeque<Vec<u8>>,
        fail_at_end: bool,
    }

    impl Canned {
        fn new(chunks: &[&str], fail_at_end: bool) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                fail_at_end,
            }
        }
    }

    #[async_trait]
    impl ByteSource for Canned {
        async fn next_bytes(&mut self) -> std::result::Result<Option<Vec<u8>>, String> {
            match self.chunks.pop_front() {
                Some(c) => Ok(Some(c)),
                None if self.fail_at_end => Err("connection reset".to_string()),
                None => Ok(None),
            }
        }
    }

    async fn drain(stream: AnswerStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn parses_ollama_lines() {
        let line = r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(
            parse_line(WireFormat::Ndjson, line),
            Ok(LineEvent::Fragment("Hel".to_string()))
        );
        let done = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_line(WireFormat::Ndjson, done), Ok(LineEvent::Done));
        let last = r#"{"message":{"role":"assistant","content":"!"},"done":true}"#;
        assert_eq!(
            parse_line(WireFormat::Ndjson, last),
            Ok(LineEvent::Last("!".to_string()))
        );
        let err = r#"{"error":"model 'x' not found"}"#;
        assert_eq!(
            parse_line(WireFormat::Ndjson, err),
            Err("model 'x' not found".to_string())
        );
    }

    #[test]
    fn parses_openai_events() {
        let event = r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#;
        assert_eq!(
            parse_line(WireFormat::Sse, event),
            Ok(LineEvent::Fragment("lo".to_string()))
        );
        assert_eq!(parse_line(WireFormat::Sse, "data: [DONE]"), Ok(LineEvent::Done));
        assert_eq!(parse_line(WireFormat::Sse, ": keep-alive"), Ok(LineEvent::Skip));
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(WireFormat::Sse, role_only), Ok(LineEvent::Skip));
        let err = r#"data: {"error":{"message":"rate limited"}}"#;
        assert_eq!(parse_line(WireFormat::Sse, err), Err("rate limited".to_string()));
    }

    #[test]
    fn line_decoder_keeps_split_characters_whole() {
        let mut decoder = LineDecoder::default();
        let bytes = "héllo\nwörld\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(decoder.push(&bytes[..2]).is_empty());
        assert_eq!(decoder.push(&bytes[2..9]), vec!["héllo".to_string()]);
        assert_eq!(decoder.push(&bytes[9..]), vec!["wörld".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn streams_fragments_in_order_across_chunk_boundaries() {
        let body = Canned::new(
            &[
                "{\"message\":{\"content\":\"The \"},\"done\":false}\n{\"mess",
                "age\":{\"content\":\"answer\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            ],
            false,
        );
        let items = drain(fragment_stream(body, WireFormat::Ndjson, "ollama")).await;
        let texts: Vec<String> = items.into_iter().map(|r| r.expect("fragment")).collect();
        assert_eq!(texts, vec!["The ".to_string(), "answer".to_string()]);
    }

    #[tokio::test]
    async fn transport_failure_mid_stream_is_an_error() {
        let body = Canned::new(&["data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"], true);
        let items = drain(fragment_stream(body, WireFormat::Sse, "openai")).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("par"));
        assert!(matches!(
            items[1],
            Err(Error::Provider {
                provider: "openai",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn fragments_before_a_bad_line_are_delivered_first() {
        let body = Canned::new(
            &["{\"message\":{\"content\":\"ok\"},\"done\":false}\n{\"error\":\"model crashed\"}\n"],
            false,
        );
        let items = drain(fragment_stream(body, WireFormat::Ndjson, "ollama")).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("ok"));
        assert!(matches!(&items[1], Err(Error::Provider { detail, .. }) if detail == "model crashed"));
    }

    #[tokio::test]
    async fn body_ending_without_completion_is_an_error() {
        let body = Canned::new(&["data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n"], false);
        let items = drain(fragment_stream(body, WireFormat::Sse, "openai")).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn collect_answer_joins_fragments() {
        let body = Canned::new(
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n",
            ],
            false,
        );
        let answer = collect_answer(fragment_stream(body, WireFormat::Sse, "openai"))
            .await
            .expect("complete stream");
        assert_eq!(answer, "ab");
    }
}
