//! HTTP client wrapper implementing [`VectorIndex`] on top of Qdrant.

use crate::config::StoreSettings;
use crate::qdrant::payload::{build_payload, current_timestamp_rfc3339, parse_metadata, point_id};
use crate::qdrant::types::{FacetResponse, QdrantError, QueryResponse, QueryResponseResult};
use crate::store::{IndexError, IndexStats, Match, NamespaceKey, VectorIndex, VectorRecord};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Upper bound on distinct namespaces returned by one stats request.
const FACET_LIMIT: usize = 100_000;

/// Lightweight HTTP client for one Qdrant collection.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantIndex {
    /// Construct a client from store settings.
    pub fn new(settings: &StoreSettings) -> Result<Self, QdrantError> {
        let url = settings
            .qdrant_url
            .as_deref()
            .ok_or_else(|| QdrantError::InvalidUrl("QDRANT_URL is not set".into()))?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        let client = Client::builder().user_agent("sysreview/0.1").build()?;

        tracing::debug!(
            url = %base_url,
            collection = %settings.qdrant_collection_name,
            has_api_key = settings
                .qdrant_api_key
                .as_deref()
                .is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings.qdrant_api_key.clone(),
            collection: settings.qdrant_collection_name.clone(),
        })
    }

    /// Create the collection when missing and make sure the filter fields are indexed.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        self.create_collection_if_not_exists(vector_size).await?;
        self.ensure_payload_indexes().await
    }

    async fn create_collection_if_not_exists(&self, vector_size: u64) -> Result<(), QdrantError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::info!(collection = %self.collection, vector_size, "Creating collection");
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        for field in ["namespace", "paper_id", "section"] {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });

            let response = self
                .request(Method::PUT, &format!("collections/{}/index", self.collection))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = %self.collection, field, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, "Payload index already exists");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn upsert_points(
        &self,
        key: &NamespaceKey,
        records: Vec<VectorRecord>,
    ) -> Result<usize, QdrantError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id(key, &record.id).to_string(),
                    "vector": record.vector,
                    "payload": build_payload(key, record, &now),
                })
            })
            .collect();

        let count = points.len();
        let response = self
            .request(Method::PUT, &format!("collections/{}/points", self.collection))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(namespace = %key, points = count, "Points upserted");
        })
        .await?;

        Ok(count)
    }

    async fn query_points(
        &self,
        key: &NamespaceKey,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": top_k,
            "with_payload": true,
            "filter": namespace_filter(key),
        });

        let response = self
            .request(Method::POST, &format!("collections/{}/points/query", self.collection))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(namespace = %key, error = %error, "Qdrant query failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut matches = Vec::with_capacity(points.len());
        for point in points {
            let id = stringify_point_id(point.id);
            match point.payload.and_then(parse_metadata) {
                Some(metadata) => matches.push(Match {
                    id,
                    score: point.score,
                    metadata,
                }),
                None => {
                    tracing::warn!(namespace = %key, point_id = %id, "Skipping point with malformed payload");
                }
            }
        }
        Ok(matches)
    }

    async fn namespace_counts(&self) -> Result<IndexStats, QdrantError> {
        let body = json!({
            "key": "namespace",
            "limit": FACET_LIMIT,
            "exact": true,
        });

        let response = self
            .request(Method::POST, &format!("collections/{}/facet", self.collection))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Failed to count namespaces");
            return Err(error);
        }

        let FacetResponse { result } = response.json().await?;
        let mut namespaces = BTreeMap::new();
        for hit in result.hits {
            let Value::String(namespace) = hit.value else {
                continue;
            };
            match NamespaceKey::parse(&namespace) {
                Some(key) => {
                    *namespaces.entry(key).or_insert(0) += hit.count;
                }
                None => tracing::debug!(namespace = %namespace, "Ignoring foreign namespace"),
            }
        }
        Ok(IndexStats { namespaces })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, key: &NamespaceKey, records: Vec<VectorRecord>) -> Result<usize, IndexError> {
        Ok(self.upsert_points(key, records).await?)
    }

    async fn query(
        &self,
        key: &NamespaceKey,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        Ok(self.query_points(key, vector, top_k).await?)
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        Ok(self.namespace_counts().await?)
    }
}

fn namespace_filter(key: &NamespaceKey) -> Value {
    json!({
        "must": [
            {
                "key": "namespace",
                "match": { "value": key.to_namespace() }
            }
        ]
    })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
