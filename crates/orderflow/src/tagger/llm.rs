use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TaggerConfig;
use crate::error::TagError;

use super::{TagAnalysis, TagAnalyzer};

const MAX_ATTEMPTS: usize = 3;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\s*(\{.*\}|\[.*\])\s*```").unwrap());

/// Chat-completions client that asks the model to split tags into source,
/// character and the rest, translated to `language`.
pub struct OpenAiTagAnalyzer {
    client: Client,
    endpoint: String,
    model: String,
    language: String,
    api_key: SecretString,
}

impl OpenAiTagAnalyzer {
    pub fn from_config(config: &TaggerConfig, proxy: Option<&str>) -> Result<Self, TagError> {
        let api_key = config
            .api_key
            .resolve("tagger.api_key")
            .map_err(|e| TagError::Request(e.to_string()))?;

        let mut builder = Client::builder().timeout(Duration::from_secs(120));
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| TagError::Request(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| TagError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            api_key,
        })
    }

    fn request_body(&self, tags: &[String]) -> Value {
        let instructions = format!(
            "You receive comma separated image tags. Identify the game or series \
             (source), the character (without any '_(source)' suffix) and all \
             remaining descriptive tags. Translate every one of them to language \
             '{}'. Reply with a single JSON object and nothing else: \
             {{\"source\": \"...\", \"character\": \"...\", \"other\": [\"...\"]}}",
            self.language
        );

        json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": tags.join(",") }
            ]
        })
    }

    fn complete(&self, body: &Value) -> Result<String, TagError> {
        let response: Value = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| TagError::Request(e.to_string()))?
            .json()
            .map_err(|e| TagError::InvalidResponse(e.to_string()))?;

        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TagError::InvalidResponse("reply has no message content".to_string()))
    }
}

impl TagAnalyzer for OpenAiTagAnalyzer {
    fn analyze(&mut self, tags: &[String]) -> Result<TagAnalysis, TagError> {
        let body = self.request_body(tags);
        let mut last_error = TagError::InvalidResponse("no reply".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            let reply = self.complete(&body)?;
            debug!(attempt, "Tagger reply: {}", reply);

            match parse_analysis(&reply) {
                Ok(analysis) => return Ok(analysis),
                Err(e) => {
                    warn!(attempt, "Unusable tagger reply: {}", e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

fn parse_analysis(reply: &str) -> Result<TagAnalysis, TagError> {
    let mut value = parse_json_robustly(reply)
        .ok_or_else(|| TagError::InvalidResponse(truncate(reply, 100)))?;

    if let Value::Array(items) = value {
        value = items
            .into_iter()
            .next()
            .ok_or_else(|| TagError::InvalidResponse("empty JSON array".to_string()))?;
    }

    for field in ["source", "character"] {
        if !value.get(field).is_some_and(Value::is_string) {
            return Err(TagError::MissingField(field));
        }
    }

    serde_json::from_value(value).map_err(|e| TagError::InvalidResponse(e.to_string()))
}

/// Pulls a JSON object or array out of model output that may wrap it in a
/// ```json fence or surround it with prose.
pub fn parse_json_robustly(text: &str) -> Option<Value> {
    let candidate = match FENCED_JSON.captures(text) {
        Some(captures) => captures.get(1)?.as_str(),
        None => {
            let brace = text.find('{');
            let bracket = text.find('[');
            let (start, end_char) = match (brace, bracket) {
                (Some(b), Some(k)) if k < b => (k, ']'),
                (Some(b), _) => (b, '}'),
                (None, Some(k)) => (k, ']'),
                (None, None) => return None,
            };
            let end = text.rfind(end_char).filter(|&end| end > start)?;
            &text[start..=end]
        }
    };

    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    serde_json::from_str(candidate).ok()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
