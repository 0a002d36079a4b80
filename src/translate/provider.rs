//! Remote translation provider.
//! `TranslationProvider` is the seam the dispatcher calls through; `HttpProvider`
//! speaks a Google-v3-style JSON API over a pooled reqwest client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{TranslateCall, TranslateError, AUTO_LANG};
use crate::config::ApiConfig;

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate every text in `call`; the reply is aligned to `call.texts`.
    async fn translate(&self, call: &TranslateCall) -> Result<Vec<String>, TranslateError>;

    /// Best-guess language tag for `text`.
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError>;
}

pub struct HttpProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    project_id: String,
}

impl HttpProvider {
    pub fn new(config: &ApiConfig) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.project_id, method)
    }

    /// POST `body` to `method`. Transport failures map to `Network`, non-2xx to `Http`.
    async fn post(&self, method: &str, body: &serde_json::Value) -> Result<serde_json::Value, TranslateError> {
        let mut request = self.http.post(self.endpoint(method)).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(TranslateError::Http {
                status: status.as_u16(),
                body: body_text.chars().take(200).collect(),
            });
        }

        debug!(method, status = status.as_u16(), "provider call ok");
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| TranslateError::UnexpectedResponseShape(e.to_string()))
    }
}

#[async_trait]
impl TranslationProvider for HttpProvider {
    async fn translate(&self, call: &TranslateCall) -> Result<Vec<String>, TranslateError> {
        let body = translate_body(call);
        let reply = self.post("translate", &body).await?;
        parse_translations(reply)
    }

    async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        let reply = self.post("detectLanguage", &json!({ "content": text })).await?;
        parse_detected_language(reply)
    }
}

fn translate_body(call: &TranslateCall) -> serde_json::Value {
    let mut body = json!({
        "q": call.texts,
        "target": call.target_lang,
        "format": call.format.mime_type(),
    });
    if call.source_lang != AUTO_LANG {
        body["source"] = json!(call.source_lang);
    }
    body
}

// --- Response shapes ---

#[derive(Deserialize)]
struct TranslateReply {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

#[derive(Deserialize)]
struct DetectReply {
    languages: Vec<DetectedLanguage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedLanguage {
    language_code: String,
}

/// `{"data": {"translations": [{"translatedText": ...}]}}` → texts in order.
pub fn parse_translations(reply: serde_json::Value) -> Result<Vec<String>, TranslateError> {
    let parsed: TranslateReply = serde_json::from_value(reply)
        .map_err(|e| TranslateError::UnexpectedResponseShape(e.to_string()))?;
    Ok(parsed
        .data
        .translations
        .into_iter()
        .map(|t| t.translated_text)
        .collect())
}

/// `{"languages": [{"languageCode": ...}, ...]}` → first (most probable) tag.
pub fn parse_detected_language(reply: serde_json::Value) -> Result<String, TranslateError> {
    let parsed: DetectReply = serde_json::from_value(reply)
        .map_err(|e| TranslateError::UnexpectedResponseShape(e.to_string()))?;
    parsed
        .languages
        .into_iter()
        .next()
        .map(|l| l.language_code)
        .ok_or_else(|| TranslateError::UnexpectedResponseShape("no languages detected".into()))
}
