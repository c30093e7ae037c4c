use crate::{
    agent::{ModelProvider, ModelRequest, ModelResponse},
    error::Result,
    options::ModelOptions,
    types::{Message, Part, Role},
    PipelineError,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Configuration for the Ollama provider.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Ollama API endpoint (e.g., "http://localhost:11434")
    pub endpoint: String,
    /// Model used when the agent and call options name none.
    pub default_model: Option<String>,
    /// Request timeout (default: 120s)
    pub timeout: Duration,
    /// Remove `<think>...</think>` blocks from replies (default: true)
    pub strip_thinking: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            default_model: None,
            timeout: Duration::from_secs(120),
            strip_thinking: true,
        }
    }
}

impl OllamaConfig {
    /// Read `OLLAMA_HOST`, `OLLAMA_MODEL` and `OLLAMA_TIMEOUT_SECS`, falling
    /// back to the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load `.env` from the current directory (if present) into the process
    /// environment, then read the config as [`from_env`](Self::from_env) does.
    /// Variables already set in the environment are not overridden.
    pub fn from_dotenv() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Read the config from an env file. Values in the file take precedence
    /// over the process environment; the environment is not modified.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let unreadable = |e: dotenvy::Error| {
            PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        };
        let entries = dotenvy::from_path_iter(path)
            .map_err(unreadable)?
            .collect::<std::result::Result<HashMap<String, String>, _>>()
            .map_err(unreadable)?;
        Self::from_lookup(|key| entries.get(key).cloned().or_else(|| std::env::var(key).ok()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            config.endpoint = normalize_endpoint(&host);
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|m| !m.trim().is_empty()) {
            config.default_model = Some(model);
        }
        if let Some(secs) = lookup("OLLAMA_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "OLLAMA_TIMEOUT_SECS is not a number: {}",
                    secs
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = normalize_endpoint(&endpoint.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strip_thinking(mut self, enabled: bool) -> Self {
        self.strip_thinking = enabled;
        self
    }
}

/// `OLLAMA_HOST` is often given without a scheme (`127.0.0.1:11434`).
fn normalize_endpoint(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// [`ModelProvider`] for a local or remote Ollama server (`/api/chat`).
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Reuse an existing HTTP client (connection pool, proxies, TLS settings).
    pub fn with_client(client: Client, config: OllamaConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = chat_body(request);
        let url = format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'));

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "ollama chat request"
        );
        let resp = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Provider(format!("Failed to connect to Ollama at {}: {}", url, e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Provider(format!(
                "Ollama returned error {}: {}",
                status, text
            )));
        }

        let body = resp.text().await?;
        parse_chat_body(&body, self.config.strip_thinking)
    }

    fn default_model(&self) -> Option<&str> {
        self.config.default_model.as_deref()
    }
}

/// Build the `/api/chat` request body.
fn chat_body(request: &ModelRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().filter_map(chat_message).collect();

    json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
        "options": ollama_options(&request.options),
    })
}

/// Convert one message; messages with neither text nor images are dropped.
fn chat_message(message: &Message) -> Option<Value> {
    let mut content = String::new();
    let mut images = Vec::new();

    for part in &message.parts {
        match part {
            Part::Text { text } => content.push_str(text),
            Part::File { uri, .. } => push_line(&mut content, &format!("File: {}", uri)),
            Part::Data { bytes, mime_type } => {
                let is_image = mime_type
                    .as_deref()
                    .is_some_and(|m| m.starts_with("image/"));
                if is_image {
                    images.push(STANDARD.encode(bytes));
                } else {
                    push_line(
                        &mut content,
                        &format!("Data: {}", String::from_utf8_lossy(bytes)),
                    );
                }
            }
        }
    }

    if content.is_empty() && images.is_empty() {
        return None;
    }

    let mut value = json!({
        "role": message.role.as_str(),
        "content": content,
    });
    if !images.is_empty() {
        value["images"] = json!(images);
    }
    Some(value)
}

fn push_line(content: &mut String, line: &str) {
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(line);
}

/// Map sampling options to Ollama's names and merge provider-specific extras.
fn ollama_options(options: &ModelOptions) -> Value {
    let mut map = Map::new();
    if let Some(temperature) = options.temperature {
        map.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        map.insert("num_predict".to_string(), json!(max_tokens));
    }
    if let Some(top_p) = options.top_p {
        map.insert("top_p".to_string(), json!(top_p));
    }
    for (k, v) in &options.extra {
        map.insert(k.clone(), v.clone());
    }
    Value::Object(map)
}

fn parse_chat_body(body: &str, strip_thinking: bool) -> Result<ModelResponse> {
    let json: Value = serde_json::from_str(body)?;
    parse_chat_response(&json, strip_thinking)
}

fn parse_chat_response(json: &Value, strip_thinking: bool) -> Result<ModelResponse> {
    if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
        return Err(PipelineError::Provider(format!("Ollama error: {}", err)));
    }

    let message = json
        .get("message")
        .ok_or_else(|| PipelineError::Provider("Ollama response has no message".to_string()))?;
    let role = message
        .get("role")
        .and_then(|v| v.as_str())
        .map(Role::from_str_lossy)
        .unwrap_or(Role::Assistant);
    let raw = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let content = if strip_thinking {
        let (thinking, cleaned) = extract_thinking(raw);
        if let Some(thinking) = thinking {
            tracing::debug!(chars = thinking.len(), "dropped reasoning block from reply");
        }
        cleaned
    } else {
        raw.to_string()
    };

    if content.trim().is_empty() {
        return Err(PipelineError::EmptyResponse);
    }

    Ok(ModelResponse {
        messages: vec![Message::new(role, vec![Part::text(content)])],
    })
}

/// Extract `<think>...</think>` blocks from a response (DeepSeek R1 style).
fn extract_thinking(text: &str) -> (Option<String>, String) {
    let think_start = "<think>";
    let think_end = "</think>";

    if let Some(start_idx) = text.find(think_start) {
        if let Some(end_idx) = text.find(think_end) {
            if end_idx > start_idx {
                let thinking = text[start_idx + think_start.len()..end_idx]
                    .trim()
                    .to_string();
                let mut cleaned = String::new();
                cleaned.push_str(&text[..start_idx]);
                cleaned.push_str(&text[end_idx + think_end.len()..]);
                let cleaned = cleaned.trim().to_string();
                let thinking = if thinking.is_empty() {
                    None
                } else {
                    Some(thinking)
                };
                return (thinking, cleaned);
            }
        }
    }

    (None, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<Message>, options: ModelOptions) -> ModelRequest {
        ModelRequest {
            model: "llama3".to_string(),
            messages,
            options,
        }
    }

    #[test]
    fn test_extract_thinking_present() {
        let text = "Before <think>my reasoning here</think> after";
        let (thinking, cleaned) = extract_thinking(text);
        assert_eq!(thinking, Some("my reasoning here".to_string()));
        assert_eq!(cleaned, "Before  after");
    }

    #[test]
    fn test_extract_thinking_absent() {
        let (thinking, cleaned) = extract_thinking("no thinking tags here");
        assert!(thinking.is_none());
        assert_eq!(cleaned, "no thinking tags here");
    }

    #[test]
    fn test_extract_thinking_empty() {
        let (thinking, cleaned) = extract_thinking("<think>  </think>actual content");
        assert!(thinking.is_none());
        assert_eq!(cleaned, "actual content");
    }

    #[test]
    fn test_chat_body_maps_roles_and_options() {
        let req = request(
            vec![Message::system("be terse"), Message::user("hi")],
            ModelOptions::new()
                .with_temperature(0.2)
                .with_max_tokens(256)
                .with_extra("num_ctx", json!(8192)),
        );
        let body = chat_body(&req);

        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be terse");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["options"]["temperature"], json!(0.2));
        assert_eq!(body["options"]["num_predict"], json!(256));
        assert_eq!(body["options"]["num_ctx"], json!(8192));
        assert!(body["options"].get("top_p").is_none());
    }

    #[test]
    fn test_chat_message_handles_files_and_images() {
        let msg = Message::new(
            Role::User,
            vec![
                Part::text("describe"),
                Part::File {
                    uri: "https://example.com/doc.pdf".into(),
                    mime_type: None,
                },
                Part::Data {
                    bytes: vec![1, 2, 3],
                    mime_type: Some("image/png".into()),
                },
                Part::Data {
                    bytes: b"raw notes".to_vec(),
                    mime_type: Some("text/plain".into()),
                },
            ],
        );
        let value = chat_message(&msg).unwrap();
        assert_eq!(
            value["content"],
            "describe\nFile: https://example.com/doc.pdf\nData: raw notes"
        );
        assert_eq!(value["images"][0], STANDARD.encode([1u8, 2, 3]));
    }

    #[test]
    fn test_chat_message_drops_empty() {
        let msg = Message::new(Role::User, vec![]);
        assert!(chat_message(&msg).is_none());
    }

    #[test]
    fn test_parse_chat_response_normalizes_role() {
        let json = json!({"message": {"role": "tool", "content": "hello"}});
        let resp = parse_chat_response(&json, true).unwrap();
        assert_eq!(resp.messages[0].role, Role::User);
        assert_eq!(resp.messages[0].text(), "hello");
    }

    #[test]
    fn test_parse_chat_response_strips_thinking() {
        let json = json!({"message": {"role": "assistant", "content": "<think>hmm</think>Answer"}});
        let resp = parse_chat_response(&json, true).unwrap();
        assert_eq!(resp.messages[0].text(), "Answer");

        let kept = parse_chat_response(&json, false).unwrap();
        assert_eq!(kept.messages[0].text(), "<think>hmm</think>Answer");
    }

    #[test]
    fn test_parse_chat_response_errors() {
        let err = parse_chat_response(&json!({"error": "model not found"}), true);
        match err {
            Err(PipelineError::Provider(msg)) => assert!(msg.contains("model not found")),
            _ => panic!("Expected Provider error"),
        }

        let empty = json!({"message": {"role": "assistant", "content": "<think>only</think>"}});
        assert!(matches!(
            parse_chat_response(&empty, true),
            Err(PipelineError::EmptyResponse)
        ));
        assert!(parse_chat_response(&json!({}), true).is_err());
    }

    #[test]
    fn test_parse_chat_body() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"hi"},"done":true}"#;
        let resp = parse_chat_body(body, true).unwrap();
        assert_eq!(resp.messages[0].text(), "hi");

        match parse_chat_body("<html>502 Bad Gateway</html>", true) {
            Err(PipelineError::Json(_)) => {}
            _ => panic!("Expected Json error"),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert!(config.strip_thinking);
        assert!(config.default_model.is_none());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = OllamaConfig::from_lookup(|key| match key {
            "OLLAMA_HOST" => Some("127.0.0.1:11434/".to_string()),
            "OLLAMA_MODEL" => Some("qwen2.5".to_string()),
            "OLLAMA_TIMEOUT_SECS" => Some("30".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.default_model.as_deref(), Some("qwen2.5"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_lookup_bad_timeout() {
        let result = OllamaConfig::from_lookup(|key| {
            (key == "OLLAMA_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_from_env_file() {
        let path = std::env::temp_dir().join(format!("llm-chain-{}.env", std::process::id()));
        std::fs::write(
            &path,
            "# local settings\nOLLAMA_HOST=10.0.0.2:11434\nOLLAMA_MODEL=from-file\nOLLAMA_TIMEOUT_SECS=45\n",
        )
        .unwrap();

        let config = OllamaConfig::from_env_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.endpoint, "http://10.0.0.2:11434");
        assert_eq!(config.default_model.as_deref(), Some("from-file"));
        assert_eq!(config.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_config_from_missing_env_file() {
        let result = OllamaConfig::from_env_file("/nonexistent/llm-chain/.env");
        match result {
            Err(PipelineError::InvalidConfig(msg)) => assert!(msg.contains("cannot read")),
            _ => panic!("Expected InvalidConfig error"),
        }
    }

    #[test]
    fn test_provider_exposes_default_model() {
        let provider = OllamaProvider::new(
            OllamaConfig::default()
                .with_endpoint("https://ollama.internal/")
                .with_default_model("mistral"),
        );
        assert_eq!(provider.default_model(), Some("mistral"));
        assert_eq!(provider.config().endpoint, "https://ollama.internal");
    }
}
