//! OpenAI-compatible chat-completions adapter (caption rewriting).
//!
//! Defaults target DeepSeek; any endpoint speaking the `/chat/completions`
//! protocol works by changing `base_url` in the settings file.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use fwd_core::{errors::Error, settings::RewriteSettings, text::TextProcessor, Result};

#[derive(Clone, Debug)]
pub struct ChatRewriter {
    /// Takes precedence over the key in the settings file.
    env_api_key: Option<String>,
    http: reqwest::Client,
}

impl ChatRewriter {
    pub fn new(env_api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Rewrite(format!("http client build error: {e}")))?;
        Ok(Self { env_api_key, http })
    }

    fn api_key<'a>(&'a self, settings: &'a RewriteSettings) -> Option<&'a str> {
        self.env_api_key
            .as_deref()
            .or(Some(settings.api_key.as_str()))
            .filter(|k| !k.trim().is_empty())
    }
}

#[async_trait]
impl TextProcessor for ChatRewriter {
    async fn rewrite(&self, text: &str, settings: &RewriteSettings) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }
        let Some(api_key) = self.api_key(settings) else {
            return Err(Error::Rewrite("rewrite API key is not configured".to_string()));
        };

        let url = completions_url(&settings.base_url);
        let body = request_body(text, settings);
        debug!(url = %url, model = %settings.model, chars = text.chars().count(), "rewrite request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Rewrite(format!("rewrite request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rewrite(format!(
                "rewrite failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Rewrite(format!("rewrite json error: {e}")))?;

        extract_content(&v)
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn request_body(text: &str, settings: &RewriteSettings) -> Value {
    json!({
        "model": settings.model,
        "messages": [
            { "role": "system", "content": settings.system_prompt },
            { "role": "user", "content": text },
        ],
        "max_tokens": settings.max_tokens,
        "temperature": settings.temperature,
        "stream": false,
    })
}

fn extract_content(v: &Value) -> Result<String> {
    let content = v
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if content.is_empty() {
        return Err(Error::Rewrite(
            "rewrite response contained no text".to_string(),
        ));
    }
    Ok(content.to_string())
}
