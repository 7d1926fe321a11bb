use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::env;
use std::time::Duration;

/// External judgment/drafting/review capability. Every call is blocking
/// with the configured timeout; callers treat failures as recoverable
/// per-record events.
pub trait LlmProvider {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
    #[allow(dead_code)]
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "anthropic" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            config.model.clone(),
            config.timeout_secs,
        )?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(
            config.model.clone(),
            config.timeout_secs,
        )?)),
        other => Err(anyhow!(
            "Unknown llm provider '{}'. Available: anthropic, openai",
            other
        )),
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here")?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { api_key, model_id, client })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            system: system.to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAIMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { api_key, model_id, client })
    }
}

impl LlmProvider for OpenAIProvider {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Structured output helpers ---

/// Parse a typed judgment out of a model response. Models wrap JSON in
/// prose and code fences often enough that a direct parse is tried first
/// and the outermost `{...}` span second. Anything else is a recoverable
/// error for the caller.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            return serde_json::from_str(&trimmed[start..=end])
                .context("Response contained a JSON object that did not match the expected shape");
        }
    }
    Err(anyhow!("No JSON object found in response"))
}

/// Truncate to a character budget without splitting a UTF-8 sequence.
pub fn truncate(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// --- Test double ---

/// Canned provider for exercising the pipeline without network access.
/// Responses are handed out in order; running dry is an error, which is
/// exactly what a flaky capability looks like to the caller.
#[cfg(test)]
pub struct ScriptedProvider {
    responses: std::cell::RefCell<std::collections::VecDeque<String>>,
    pub calls: std::cell::RefCell<Vec<String>>,
}

#[cfg(test)]
impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: std::cell::RefCell::new(
                responses.into_iter().map(Into::into).collect(),
            ),
            calls: std::cell::RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

#[cfg(test)]
impl LlmProvider for ScriptedProvider {
    fn complete(&self, system: &str, user: &str, _max_tokens: u32) -> Result<String> {
        self.calls
            .borrow_mut()
            .push(format!("{system}\n---\n{user}"));
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("Scripted provider ran out of responses"))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        score: f64,
        feedback: String,
    }

    #[test]
    fn test_extract_json_direct() {
        let verdict: Verdict =
            extract_json(r#"{"score": 88.5, "feedback": "tighten the summary"}"#).unwrap();
        assert_eq!(verdict.score, 88.5);
        assert_eq!(verdict.feedback, "tighten the summary");
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let text = "Here is my review:\n```json\n{\"score\": 72, \"feedback\": \"ok\"}\n```\nHope that helps!";
        let verdict: Verdict = extract_json(text).unwrap();
        assert_eq!(verdict.score, 72.0);
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json::<Verdict>("I cannot review this.").is_err());
        assert!(extract_json::<Verdict>("{\"wrong\": true}").is_err());
        assert!(extract_json::<Verdict>("").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // Multi-byte: never split a sequence.
        let s = "héllo";
        let cut = truncate(s, 2);
        assert!(cut.len() <= 2);
        assert!(s.starts_with(cut));
    }

    #[test]
    fn test_create_provider_unknown() {
        let config = LlmConfig {
            provider: "llamacpp".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_anthropic_provider_requires_api_key() {
        let original = env::var("ANTHROPIC_API_KEY").ok();
        unsafe { env::remove_var("ANTHROPIC_API_KEY"); }

        let result = AnthropicProvider::new("claude-sonnet-4-5-20250929".to_string(), 120);

        if let Some(val) = original {
            unsafe { env::set_var("ANTHROPIC_API_KEY", val); }
        }

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o".to_string(), 120);

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_scripted_provider_plays_in_order() {
        let provider = ScriptedProvider::new(["first", "second"]);
        assert_eq!(provider.complete("s", "u", 100).unwrap(), "first");
        assert_eq!(provider.complete("s", "u", 100).unwrap(), "second");
        assert!(provider.complete("s", "u", 100).is_err());
        assert_eq!(provider.call_count(), 3);
    }
}
