use crate::{ChatRequest, ChatResponse, EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Settings for any server speaking the OpenAI wire format
/// (OpenAI, DeepSeek, LM Studio, text-embeddings-inference, ...).
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into(),
            embedding_model: String::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.cfg.timeout);
        match &self.cfg.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

async fn ensure_success(resp: Response) -> Result<Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::RequestFailed(format!(
        "status {} body {}",
        status,
        String::from_utf8_lossy(&body)
    )))
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        if texts.is_empty() {
            return Ok(EmbedResponse { vectors: vec![] });
        }

        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
        };

        let resp = self
            .authorize(self.client.post(self.endpoint("embeddings")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = ensure_success(resp).await?;

        let mut parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        // Servers may return items out of order; `index` restores input order.
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        tracing::debug!(
            endpoint = %self.endpoint("chat/completions"),
            model = %request.model,
            "sending chat completion request"
        );
        let resp = self
            .authorize(self.client.post(self.endpoint("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = ensure_success(resp).await?;

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use httpmock::prelude::*;

    fn provider(server: &MockServer, key: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig {
            api_key: key.map(str::to_string),
            base_url: format!("{}/", server.base_url()),
            embedding_model: "mini".into(),
            timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn embed_restores_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer k")
                    .json_body(serde_json::json!({"model": "mini", "input": ["a", "b"]}));
                then.status(200).json_body(serde_json::json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0]},
                        {"index": 0, "embedding": [1.0, 0.0]}
                    ]
                }));
            })
            .await;

        let resp = provider(&server, Some("k"))
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(resp.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn chat_surfaces_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let err = provider(&server, None)
            .chat(ChatRequest {
                model: "m".into(),
                messages: vec![ChatMessage::user("hi")],
                max_tokens: 10,
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        match err {
            ProviderError::RequestFailed(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
