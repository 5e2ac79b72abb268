use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    cfg: QdrantConfig,
}

impl QdrantClient {
    pub fn new(cfg: QdrantConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.collection,
            suffix
        )
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let builder = match &self.cfg.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        };
        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(ProviderError::RequestFailed(format!(
                "status {} body {:?}",
                status, body
            )));
        }
        Ok(resp)
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<(), ProviderError> {
        if self.send(self.client.get(self.url(""))).await.is_ok() {
            return Ok(());
        }
        let body = serde_json::json!({
            "vectors": { "size": dimensions, "distance": "Cosine" }
        });
        self.send(self.client.put(self.url("")).json(&body)).await?;
        tracing::info!(collection = %self.cfg.collection, dimensions, "created qdrant collection");
        Ok(())
    }

    /// Vector size of the existing collection, or `None` when it does not
    /// exist yet.
    pub async fn collection_dimensions(&self) -> Result<Option<usize>, ProviderError> {
        #[derive(Deserialize)]
        struct Info {
            result: InfoResult,
        }
        #[derive(Deserialize)]
        struct InfoResult {
            config: InfoConfig,
        }
        #[derive(Deserialize)]
        struct InfoConfig {
            params: InfoParams,
        }
        #[derive(Deserialize)]
        struct InfoParams {
            vectors: InfoVectors,
        }
        #[derive(Deserialize)]
        struct InfoVectors {
            size: usize,
        }

        let Ok(resp) = self.send(self.client.get(self.url(""))).await else {
            return Ok(None);
        };
        let info: Info = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(Some(info.result.config.params.vectors.size))
    }

    pub async fn delete_collection(&self) -> Result<(), ProviderError> {
        self.send(self.client.delete(self.url(""))).await?;
        tracing::info!(collection = %self.cfg.collection, "deleted qdrant collection");
        Ok(())
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<serde_json::Value>,
    ) -> Result<QdrantSearchResponse, ProviderError> {
        #[derive(Serialize)]
        struct SearchRequest {
            vector: Vec<f32>,
            limit: u64,
            with_payload: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            filter: Option<serde_json::Value>,
        }
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            filter,
        };
        let resp = self
            .send(self.client.post(self.url("/points/search")).json(&body))
            .await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    pub async fn upsert(&self, points: Vec<QdrantPoint>) -> Result<(), ProviderError> {
        let req = QdrantUpsert { points };
        self.send(self.client.put(self.url("/points?wait=true")).json(&req))
            .await?;
        Ok(())
    }

    pub async fn delete_by_filter(&self, filter: serde_json::Value) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct DeletePoints {
            filter: serde_json::Value,
        }
        let body = DeletePoints { filter };
        self.send(
            self.client
                .post(self.url("/points/delete?wait=true"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, ProviderError> {
        #[derive(Deserialize)]
        struct CountResult {
            count: u64,
        }
        #[derive(Deserialize)]
        struct CountResponse {
            result: CountResult,
        }
        let resp = self
            .send(
                self.client
                    .post(self.url("/points/count"))
                    .json(&serde_json::json!({ "exact": true })),
            )
            .await?;
        let parsed: CountResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.result.count)
    }
}

/// Filter matching every point whose payload `key` equals `value`.
pub fn match_filter(key: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "must": [{ "key": key, "match": { "value": value } }]
    })
}

#[derive(Debug, Serialize)]
pub struct QdrantUpsert {
    pub points: Vec<QdrantPoint>,
}

#[derive(Debug, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct QdrantSearchResponse {
    pub result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: serde_json::Value,
    pub score: f32,
    pub payload: Option<serde_json::Value>,
}
