use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    build_http_client, parse_model_output, AnalysisPrompt, DocumentInput, KeyPool,
    ProviderError, VisionProvider,
};

pub struct GeminiClient {
    client: reqwest::Client,
    keys: KeyPool,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(keys: KeyPool, model: String, base_url: String, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            keys,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_body(document: &DocumentInput, prompt: &AnalysisPrompt) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": prompt.text() },
                    {
                        "inline_data": {
                            "mime_type": document.mime_type,
                            "data": BASE64.encode(&document.bytes)
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": 0.1,
                "responseMimeType": "application/json"
            }
        })
    }
}

#[async_trait]
impl VisionProvider for GeminiClient {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn analyze(
        &self,
        document: &DocumentInput,
        prompt: &AnalysisPrompt,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::request_body(document, prompt);

        debug!(
            "[gemini] analyzing {} ({} bytes)",
            document.file_name,
            document.bytes.len()
        );

        let response = self
            .keys
            .send_with_rotation(self.id(), |key| {
                self.client
                    .post(&url)
                    .query(&[("key", key)])
                    .json(&body)
                    .send()
            })
            .await?;

        let result: Value = response.json().await?;
        let text = result["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(parse_model_output(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn document() -> DocumentInput {
        DocumentInput {
            file_name: "recibo.png".into(),
            mime_type: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG"),
        }
    }

    fn client(base_url: String, keys: &[&str]) -> GeminiClient {
        GeminiClient::new(
            KeyPool::new(
                keys.iter().map(|k| k.to_string()).collect(),
                Duration::from_secs(60),
            ),
            "gemini-test".into(),
            base_url,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_request_body_inlines_image() {
        let body = GeminiClient::request_body(&document(), &AnalysisPrompt::new("recibo"));
        let part = &body["contents"][0]["parts"][1]["inline_data"];
        assert_eq!(part["mime_type"], "image/png");
        assert_eq!(part["data"], BASE64.encode(b"\x89PNG"));
    }

    #[tokio::test]
    async fn test_analyze_parses_candidate_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "k1".into()))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "{\"valor_total\": \"150,00\"}"}]}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = client(server.url(), &["k1"])
            .analyze(&document(), &AnalysisPrompt::new("recibo"))
            .await
            .expect("analysis succeeds");

        assert_eq!(result, json!({"valor_total": "150,00"}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_analyze_without_candidates_is_empty_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates": []}"#)
            .create_async()
            .await;

        let result = client(server.url(), &["k1"])
            .analyze(&document(), &AnalysisPrompt::new("recibo"))
            .await;
        assert!(matches!(result, Err(ProviderError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_server_error_is_reported_with_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let result = client(server.url(), &["k1"])
            .analyze(&document(), &AnalysisPrompt::new("recibo"))
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Status { status: 500, ref body }) if body == "boom"
        ));
    }
}
