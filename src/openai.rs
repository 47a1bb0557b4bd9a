use std::time::Duration;

use anyhow::Context as _;

use crate::error::ServiceError;
use crate::llm::TextService;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

pub struct OpenAiService {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiService {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: responses_endpoint(base_url),
            api_key,
            model,
        })
    }
}

impl TextService for OpenAiService {
    fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": prompt,
            "text": { "format": { "type": "text" } },
            "store": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().context("read OpenAI response body")?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            return Err(ServiceError::RateLimited(message));
        }
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            return Err(anyhow::anyhow!("OpenAI API error ({status}): {message}").into());
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse OpenAI response")?;
        extract_output_text(&value)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> Result<String, ServiceError> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let mut text = String::new();
    let mut refusal = None;
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            match part.get("type").and_then(|v| v.as_str()) {
                Some("output_text") => {
                    if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                        text.push_str(part_text);
                    }
                }
                Some("refusal") => {
                    refusal = part
                        .get("refusal")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned);
                }
                _ => {}
            }
        }
    }

    if text.trim().is_empty() {
        return match refusal {
            Some(reason) => Err(ServiceError::Blocked(reason)),
            None => Err(ServiceError::Empty),
        };
    }
    Ok(text)
}
