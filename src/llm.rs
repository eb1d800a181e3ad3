// src/llm.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{LlmBackend, LlmSection};
use crate::error::{Error, Result};

/// Anything that turns a prompt into free text. Reports and product
/// enrichment take one of these instead of building their own client.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Prompts larger than this are cut to stay within context limits.
const MAX_PROMPT_CHARS: usize = 24_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key = std::env::var(&llm.remote.api_key_env).map_err(|_| {
                Error::Config(format!(
                    "{} env var required for remote backend",
                    llm.remote.api_key_env
                ))
            })?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatClient {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl ChatClient {
    pub async fn connect(llm: &LlmSection) -> Result<Self> {
        let endpoint = resolve_endpoint(llm)?;
        let client = Client::new();

        if llm.backend == LlmBackend::Ollama && !check_ollama_health(&client, &endpoint.base_url).await {
            return Err(Error::Config(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )));
        }

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let prompt = truncate_chars(prompt, MAX_PROMPT_CHARS);

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamGeneration(format!("LLM API error {status}: {body}")));
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::UpstreamGeneration("Empty response from LLM".to_string()))?;

        info!(chars = content.len(), model = %self.endpoint.model, "LLM response received");
        Ok(content)
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            warn!(max, "Prompt truncated");
            &s[..idx]
        }
        None => s,
    }
}

/// Strip markdown fences and any chatter around the JSON payload, then parse it.
pub fn unwrap_json(text: &str) -> Result<serde_json::Value> {
    parse_json(text)
}

/// Unwrap the reply and check it against the expected shape `T`. Each
/// outermost `{...}` or `[...]` block is tried in order of appearance and
/// the first one that fits `T` wins, so bracketed chatter before the
/// payload does not hide it.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let stripped = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let mut last_error = Error::UpstreamGeneration("No JSON found in LLM response".to_string());
    for block in json_blocks(stripped) {
        let value: serde_json::Value = match serde_json::from_str(block) {
            Ok(value) => value,
            Err(e) => {
                last_error = Error::UpstreamGeneration(format!("response is not valid JSON: {e}\nRaw: {block}"));
                continue;
            }
        };
        match serde_json::from_value(value) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => {
                last_error =
                    Error::UpstreamGeneration(format!("response does not match the expected schema: {e}"));
            }
        }
    }
    Err(last_error)
}

/// Send `prompt` and validate the answer as `T`.
pub async fn generate_json<T: DeserializeOwned>(generator: &dyn TextGenerator, prompt: &str) -> Result<T> {
    let raw = generator.generate(prompt).await?;
    parse_json(&raw)
}

/// Outermost object and array spans in `s`, earliest first.
fn json_blocks(s: &str) -> Vec<&str> {
    let mut blocks: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = s.find(open)?;
            let end = s.rfind(close).filter(|&end| end > start)?;
            Some((start, &s[start..=end]))
        })
        .collect();
    blocks.sort_by_key(|&(start, _)| start);
    blocks.into_iter().map(|(_, block)| block).collect()
}
