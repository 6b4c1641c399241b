use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    build_http_client, parse_model_output, AnalysisPrompt, DocumentInput, KeyPool,
    ProviderError, VisionProvider,
};

pub struct OpenAiClient {
    client: reqwest::Client,
    keys: KeyPool,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(keys: KeyPool, model: String, base_url: String, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            keys,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_body(&self, document: &DocumentInput, prompt: &AnalysisPrompt) -> Value {
        let data_url = format!(
            "data:{};base64,{}",
            document.mime_type,
            BASE64.encode(&document.bytes)
        );

        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt.text() },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "response_format": { "type": "json_object" },
            "max_tokens": 1500
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiClient {
    fn id(&self) -> &str {
        "openai"
    }

    async fn analyze(
        &self,
        document: &DocumentInput,
        prompt: &AnalysisPrompt,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(document, prompt);

        debug!("[openai] analyzing {}", document.file_name);

        let response = self
            .keys
            .send_with_rotation(self.id(), |key| {
                self.client
                    .post(&url)
                    .bearer_auth(key)
                    .json(&body)
                    .send()
            })
            .await?;

        let result: Value = response.json().await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(parse_model_output(content))
    }
}
