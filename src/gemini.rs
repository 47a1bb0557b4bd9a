use std::time::Duration;

use anyhow::Context as _;

use crate::error::ServiceError;
use crate::llm::TextService;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Categories whose blocking threshold is lifted for fiction translation.
const RELAXED_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub fn generate_content_endpoint(base_url: &str, model: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models/{model}:generateContent")
}

pub struct GeminiService {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiService {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: generate_content_endpoint(base_url, model),
            api_key,
        })
    }
}

pub fn request_body(prompt: &str) -> serde_json::Value {
    let safety_settings = RELAXED_CATEGORIES
        .iter()
        .map(|category| serde_json::json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect::<Vec<_>>();

    serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "safetySettings": safety_settings,
    })
}

impl TextService for GeminiService {
    fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt))
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().context("read Gemini response body")?;
        if !status.is_success() {
            let (api_status, message) = parse_error(&raw);
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
                || api_status.as_deref() == Some("RESOURCE_EXHAUSTED")
            {
                return Err(ServiceError::RateLimited(message));
            }
            return Err(anyhow::anyhow!("Gemini API error ({status}): {message}").into());
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse Gemini response")?;
        extract_text(&value)
    }
}

fn parse_error(raw_json: &str) -> (Option<String>, String) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw_json) else {
        return (None, raw_json.to_owned());
    };
    let error = value.get("error");
    let status = error
        .and_then(|e| e.get("status"))
        .and_then(|s| s.as_str())
        .map(str::to_owned);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| raw_json.to_owned());
    (status, message)
}

fn extract_text(value: &serde_json::Value) -> Result<String, ServiceError> {
    if let Some(reason) = value
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(ServiceError::Blocked(format!("prompt blocked: {reason}")));
    }

    let Some(candidate) = value.pointer("/candidates/0") else {
        return Err(ServiceError::Empty);
    };

    let mut text = String::new();
    if let Some(parts) = candidate.pointer("/content/parts").and_then(|v| v.as_array()) {
        for part in parts {
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }

    if text.trim().is_empty() {
        let finish = candidate.get("finishReason").and_then(|v| v.as_str());
        return match finish {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason) => {
                Err(ServiceError::Blocked(format!("candidate finished with {reason}")))
            }
            _ => Err(ServiceError::Empty),
        };
    }
    Ok(text)
}
