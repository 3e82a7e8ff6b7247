use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Protocol, ResolvedConfig};
use crate::document::{self, Document};
use crate::error::GenerationError;
use crate::prompt;
use crate::turns::{Turn, TurnLog};

// ── Generator seam ────────────────────────────────────────────────────────────

/// One successful generation: the document plus the model's one-line summary.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedUi {
    pub document: Document,
    pub explanation: Option<String>,
}

/// Anything that can turn a prompt plus prior turns into a UI document.
///
/// Implementations make exactly one upstream call per `generate` and never
/// retry; schema repair loops belong to the generator service itself.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, history: &TurnLog) -> Result<GeneratedUi, GenerationError>;
}

/// Build the generator selected by the resolved profile.
pub fn build_generator(resolved: &ResolvedConfig) -> anyhow::Result<Arc<dyn Generator>> {
    let timeout = Duration::from_secs(resolved.timeout_secs);
    let generator: Arc<dyn Generator> = match resolved.protocol {
        Protocol::Chat => {
            let mut client = ChatClient::new(resolved.endpoint.clone(), resolved.model.clone(), timeout)?;
            if let Some(key) = &resolved.api_key {
                client.set_api_key(key.clone());
            }
            client.set_max_tokens(resolved.max_tokens);
            Arc::new(client)
        }
        Protocol::Agent => {
            let mut client = AgentClient::new(resolved.endpoint.clone(), timeout)?;
            if let Some(key) = &resolved.api_key {
                client.set_api_key(key.clone());
            }
            Arc::new(client)
        }
    };
    Ok(generator)
}

// ── Chat protocol: SSE delta types ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
    /// Present when a server ignores `stream: true` and answers in one body
    message: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

// ── Chat protocol client ──────────────────────────────────────────────────────

/// Talks to an OpenAI-compatible `/v1/chat/completions` endpoint and decodes
/// the `sentence / delimiter / JSON array` reply.
pub struct ChatClient {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(endpoint: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint,
            model,
            api_key: None,
            max_tokens: 4096,
        })
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = max_tokens;
    }

    /// Stream a chat completion. Calls `on_text` for each text chunk as it
    /// arrives and returns the full reply text.
    pub async fn chat(
        &self,
        history: &TurnLog,
        prompt: &str,
        on_text: impl Fn(&str) + Send,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "max_tokens": self.max_tokens,
            "messages": prompt::build_messages(&prompt::system_prompt(), history, prompt),
        });

        let url = format!("{}/v1/chat/completions", self.endpoint.trim_end_matches('/'));

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body: text });
        }

        let mut stream = resp.bytes_stream();
        let mut reader = SseReader::default();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| GenerationError::Transport(e.to_string()))?;
            reader.feed(&bytes, &on_text)?;
        }
        reader.finish(&on_text)
    }
}

// ── SSE body reader ───────────────────────────────────────────────────────────

/// Incremental decoder for a chat completion body. Handles SSE `data:` lines
/// split across chunks, a final event with no trailing newline, and servers
/// that ignore `stream: true` and send one plain JSON body.
#[derive(Default)]
struct SseReader {
    /// Bytes of a line not yet terminated by '\n'
    pending: Vec<u8>,
    /// Whole body, kept until the first SSE event shows up
    raw: Vec<u8>,
    saw_event: bool,
    text: String,
}

impl SseReader {
    fn feed(&mut self, bytes: &[u8], on_text: &impl Fn(&str)) -> Result<(), GenerationError> {
        if !self.saw_event {
            self.raw.extend_from_slice(bytes);
        }
        self.pending.extend_from_slice(bytes);

        while let Some(nl) = self.pending.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=nl).collect();
            self.line(&String::from_utf8_lossy(&line_bytes), on_text)?;
        }
        Ok(())
    }

    /// End of stream: flush the unterminated tail, then fall back to a plain
    /// JSON body if no SSE event was seen.
    fn finish(mut self, on_text: &impl Fn(&str)) -> Result<String, GenerationError> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let tail = String::from_utf8_lossy(&tail);
            if tail.trim_start().starts_with("data:") {
                self.line(&tail, on_text)?;
            }
        }

        if !self.saw_event && !self.raw.is_empty() {
            let whole = String::from_utf8_lossy(&self.raw);
            let chunk_val: StreamChunk = serde_json::from_str(whole.trim())
                .map_err(|e| GenerationError::Malformed(format!("undecodable body: {e}")))?;
            if let Some(text) = absorb_chunk(chunk_val)? {
                on_text(&text);
                self.text.push_str(&text);
            }
        }

        if self.text.trim().is_empty() {
            return Err(GenerationError::Malformed("empty reply".to_string()));
        }
        Ok(self.text)
    }

    fn line(&mut self, line: &str, on_text: &impl Fn(&str)) -> Result<(), GenerationError> {
        let line = line.trim();
        if line.is_empty() || line == "data: [DONE]" {
            return Ok(());
        }
        let Some(json_str) = line.strip_prefix("data:") else {
            return Ok(());
        };
        self.saw_event = true;
        let chunk_val: StreamChunk = serde_json::from_str(json_str.trim())
            .map_err(|e| GenerationError::Malformed(format!("bad stream event: {e}")))?;
        if let Some(text) = absorb_chunk(chunk_val)? {
            on_text(&text);
            self.text.push_str(&text);
        }
        Ok(())
    }
}

/// Pull the text out of one chunk, or surface an in-band error.
fn absorb_chunk(chunk: StreamChunk) -> Result<Option<String>, GenerationError> {
    if let Some(err) = chunk.error {
        return Err(GenerationError::Upstream(error_message(&err)));
    }
    let mut out = String::new();
    for choice in chunk.choices.unwrap_or_default() {
        if let Some(text) = choice.delta.or(choice.message).and_then(|d| d.content) {
            out.push_str(&text);
        }
    }
    Ok(Some(out).filter(|s| !s.is_empty()))
}

fn error_message(err: &Value) -> String {
    err.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| err.as_str().map(str::to_string))
        .unwrap_or_else(|| err.to_string())
}

#[async_trait]
impl Generator for ChatClient {
    async fn generate(&self, prompt: &str, history: &TurnLog) -> Result<GeneratedUi, GenerationError> {
        log::debug!("chat request to {} ({} context turns)", self.endpoint, history.len());
        let text = self
            .chat(history, prompt, |chunk| log::trace!("stream: {chunk}"))
            .await?;
        let (explanation, fragments) = document::decode_reply(&text)?;
        Ok(GeneratedUi {
            document: Document::from_fragments(fragments)?,
            explanation,
        })
    }
}

// ── Agent protocol ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    prompt_text: &'a str,
    history: &'a [Turn],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentReply {
    Failure {
        error: String,
    },
    Ui {
        #[serde(rename = "documentFragments")]
        document_fragments: Vec<Value>,
        #[serde(rename = "explanationText", default)]
        explanation_text: Option<String>,
    },
}

/// Posts `{promptText, history}` to a UI-generating agent service and reads
/// back `{documentFragments, explanationText?}` or `{error}`.
pub struct AgentClient {
    http: reqwest::Client,
    pub endpoint: String,
    api_key: Option<String>,
}

impl AgentClient {
    pub fn new(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint,
            api_key: None,
        })
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }
}

#[async_trait]
impl Generator for AgentClient {
    async fn generate(&self, prompt: &str, history: &TurnLog) -> Result<GeneratedUi, GenerationError> {
        log::debug!("agent request to {} ({} context turns)", self.endpoint, history.len());
        let body = AgentRequest { prompt_text: prompt, history: history.turns() };

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            // Prefer the agent's own message when it sent one
            if let Ok(AgentReply::Failure { error }) = serde_json::from_str::<AgentReply>(&text) {
                return Err(GenerationError::Upstream(error));
            }
            return Err(GenerationError::Status { status: status.as_u16(), body: text });
        }
        decode_agent_reply(&text)
    }
}

pub fn decode_agent_reply(body: &str) -> Result<GeneratedUi, GenerationError> {
    if body.trim().is_empty() {
        return Err(GenerationError::Malformed("empty payload".to_string()));
    }
    let reply: AgentReply = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("undecodable payload: {e}")))?;
    match reply {
        AgentReply::Failure { error } => Err(GenerationError::Upstream(error)),
        AgentReply::Ui { document_fragments, explanation_text } => Ok(GeneratedUi {
            document: Document::from_fragments(document_fragments)?,
            explanation: explanation_text.filter(|s| !s.trim().is_empty()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DELIMITER;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    // ── Loopback stub server ──────────────────────────────────────────────────

    /// Serve exactly one HTTP response; the raw request comes back on the channel.
    async fn serve_once(status_line: &str, content_type: &str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            let _ = tx.send(request);
        });
        (format!("http://{addr}"), rx)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = sock.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn sse(chunks: &[&str]) -> String {
        let mut out: String = chunks
            .iter()
            .map(|c| format!("data: {}\n\n", json!({"choices": [{"delta": {"content": c}}]})))
            .collect();
        out.push_str("data: [DONE]\n\n");
        out
    }

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    // ── Agent protocol ────────────────────────────────────────────────────────

    #[test]
    fn test_decode_agent_success() {
        let ui = decode_agent_reply(
            r#"{"documentFragments": [{"beginRendering": {}}, {"surfaceUpdate": {}}], "explanationText": "A form."}"#,
        )
        .unwrap();
        assert_eq!(ui.document.len(), 2);
        assert_eq!(ui.explanation.as_deref(), Some("A form."));
    }

    #[test]
    fn test_decode_agent_failures_stay_distinct() {
        assert_eq!(
            decode_agent_reply(r#"{"error": "Schema not loaded."}"#),
            Err(GenerationError::Upstream("Schema not loaded.".to_string()))
        );
        assert_eq!(
            decode_agent_reply(r#"{"documentFragments": []}"#),
            Err(GenerationError::EmptyResult)
        );
        assert!(matches!(decode_agent_reply("  "), Err(GenerationError::Malformed(_))));
        assert!(matches!(decode_agent_reply("{}"), Err(GenerationError::Malformed(_))));
        assert!(matches!(decode_agent_reply("<html>"), Err(GenerationError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_agent_sends_prompt_and_history() {
        let body = json!({"documentFragments": [{"beginRendering": {}}]}).to_string();
        let (url, request) = serve_once("200 OK", "application/json", body).await;
        let client = AgentClient::new(url, timeout()).unwrap();

        let doc = Document::from_fragments(vec![json!({"a": 1})]).unwrap();
        let mut history = TurnLog::new();
        history.push_round(Turn::user("Build a contact form"), Turn::assistant(None, &doc));

        let ui = client.generate("Add a phone field", &history).await.unwrap();
        assert_eq!(ui.document.len(), 1);

        let raw = request.await.unwrap();
        assert!(raw.contains(r#""promptText":"Add a phone field""#));
        assert!(raw.contains(r#""role":"assistant""#));
    }

    #[tokio::test]
    async fn test_agent_error_status_with_message_is_upstream() {
        let body = json!({"error": "quota exceeded"}).to_string();
        let (url, _rx) = serve_once("500 Internal Server Error", "application/json", body).await;
        let client = AgentClient::new(url, timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert_eq!(err, GenerationError::Upstream("quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn test_agent_bare_error_status() {
        let (url, _rx) = serve_once("502 Bad Gateway", "text/plain", "upstream down".to_string()).await;
        let client = AgentClient::new(url, timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert_eq!(err, GenerationError::Status { status: 502, body: "upstream down".to_string() });
    }

    #[tokio::test]
    async fn test_unreachable_generator_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = AgentClient::new(format!("http://{addr}"), timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)), "got {err:?}");
    }

    // ── Chat protocol ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_chat_stream_decodes_document() {
        let array = json!([{"beginRendering": {"surfaceId": "s"}}, {"surfaceUpdate": {}}, {"dataModelUpdate": {}}]);
        let payload = format!("{array}");
        let (a, b) = payload.split_at(10);
        let body = sse(&["Here is the Cortex AI form.\n", DELIMITER, "\n", a, b]);
        let (url, request) = serve_once("200 OK", "text/event-stream", body).await;

        let client = ChatClient::new(url, "test-model".to_string(), timeout()).unwrap();
        let ui = client.generate("Build a contact form", &TurnLog::new()).await.unwrap();
        assert_eq!(ui.document.len(), 3);
        assert_eq!(ui.explanation.as_deref(), Some("Here is the Cortex AI form."));

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.contains(r#""model":"test-model""#));
    }

    #[tokio::test]
    async fn test_chat_without_delimiter_is_malformed() {
        let body = sse(&["I cannot build that."]);
        let (url, _rx) = serve_once("200 OK", "text/event-stream", body).await;
        let client = ChatClient::new(url, "m".to_string(), timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_chat_in_stream_error_is_upstream() {
        let body = format!("data: {}\n\n", json!({"error": {"message": "model overloaded"}}));
        let (url, _rx) = serve_once("200 OK", "text/event-stream", body).await;
        let client = ChatClient::new(url, "m".to_string(), timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert_eq!(err, GenerationError::Upstream("model overloaded".to_string()));
    }

    #[tokio::test]
    async fn test_chat_plain_json_body() {
        let content = format!("A card.\n{DELIMITER}\n[{{\"beginRendering\": {{}}}}]");
        let body = json!({"choices": [{"message": {"content": content}}]}).to_string();
        let (url, _rx) = serve_once("200 OK", "application/json", body).await;
        let client = ChatClient::new(url, "m".to_string(), timeout()).unwrap();
        let ui = client.generate("x", &TurnLog::new()).await.unwrap();
        assert_eq!(ui.document.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_http_error_status() {
        let (url, _rx) = serve_once("401 Unauthorized", "application/json", "{\"error\":\"bad key\"}".to_string()).await;
        let client = ChatClient::new(url, "m".to_string(), timeout()).unwrap();
        let err = client.generate("x", &TurnLog::new()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_chat_final_event_without_newline() {
        let content = format!("One card.\n{DELIMITER}\n[{{\"beginRendering\": {{}}}}]");
        let body = format!("data: {}", json!({"choices": [{"delta": {"content": content}}]}));
        let (url, _rx) = serve_once("200 OK", "text/event-stream", body).await;
        let client = ChatClient::new(url, "m".to_string(), timeout()).unwrap();
        let ui = client.generate("x", &TurnLog::new()).await.unwrap();
        assert_eq!(ui.document.len(), 1);
        assert_eq!(ui.explanation.as_deref(), Some("One card."));
    }

    #[test]
    fn test_sse_reader_joins_split_and_unterminated_lines() {
        let event = |c: &str| format!("data: {}", json!({"choices": [{"delta": {"content": c}}]}));
        let body = format!("{}\n\n{}", event("ab"), event("cd"));
        let (first, second) = body.split_at(7);

        let seen = Mutex::new(Vec::new());
        let on_text = |t: &str| seen.lock().unwrap().push(t.to_string());
        let mut reader = SseReader::default();
        reader.feed(first.as_bytes(), &on_text).unwrap();
        reader.feed(second.as_bytes(), &on_text).unwrap();

        assert_eq!(reader.finish(&on_text).unwrap(), "abcd");
        assert_eq!(*seen.lock().unwrap(), vec!["ab", "cd"]);
    }

    #[test]
    fn test_sse_reader_empty_body_is_malformed() {
        let reader = SseReader::default();
        assert!(matches!(reader.finish(&|_: &str| {}), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_absorb_chunk_concatenates_choices() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"content": "ab"}}, {"delta": {"content": "cd"}}]
        }))
        .unwrap();
        assert_eq!(absorb_chunk(chunk).unwrap().as_deref(), Some("abcd"));

        let empty: StreamChunk = serde_json::from_value(json!({"choices": [{"delta": {}}]})).unwrap();
        assert_eq!(absorb_chunk(empty).unwrap(), None);
    }
}
