//! Qdrant-backed vector index (gRPC).
//!
//! Points are keyed by the UUID-shaped vector key; the canonical hex
//! message id and the text ride in the payload so search hits and scans
//! report the same ids the graph store uses. The collection is created
//! idempotently with cosine distance and the configured vector size.

use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vectors_output::VectorsOptions,
    CreateCollectionBuilder, Distance, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::{debug, info};

use crate::config::VectorIndexConfig;
use crate::models::vector_key;

use super::{IndexedPoint, SearchHit, VectorIndex};

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    vector_size: usize,
}

impl QdrantIndex {
    pub fn connect(config: &VectorIndexConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .with_context(|| format!("failed to connect to Qdrant at {}", config.url))?;
        debug!(url = %config.url, collection = %config.collection_name, "connected to Qdrant");
        Ok(Self {
            client,
            collection: config.collection_name.clone(),
            vector_size: config.vector_size,
        })
    }
}

fn payload_str(payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn point_uuid(id: &Option<qdrant_client::qdrant::PointId>) -> String {
    match id.as_ref().and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!(collection = %self.collection, "collection already exists");
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.vector_size as u64, Distance::Cosine),
                ),
            )
            .await?;
        info!(
            collection = %self.collection,
            size = self.vector_size,
            "created Qdrant collection"
        );
        Ok(())
    }

    async fn insert_batch(&self, batch: &[IndexedPoint]) -> Result<()> {
        let mut points = Vec::with_capacity(batch.len());
        for point in batch {
            if point.embedding.len() != self.vector_size {
                anyhow::bail!(
                    "vector dimension mismatch for {}: expected {}, got {}",
                    point.id,
                    self.vector_size,
                    point.embedding.len()
                );
            }
            let key = vector_key(&point.id)?;
            let payload: Payload = json!({
                "id": point.id,
                "text": point.text,
            })
            .try_into()
            .map_err(|e| anyhow::anyhow!("failed to build payload: {}", e))?;
            points.push(PointStruct::new(key, point.embedding.clone(), payload));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = match payload_str(&point.payload, "id") {
                    s if s.is_empty() => point_uuid(&point.id),
                    s => s,
                };
                SearchHit {
                    id,
                    text: payload_str(&point.payload, "text"),
                    score: point.score,
                }
            })
            .collect())
    }

    async fn scan_all(&self) -> Result<Vec<IndexedPoint>> {
        let mut all = Vec::new();
        let mut offset: Option<qdrant_client::qdrant::PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(100)
                .with_payload(true)
                .with_vectors(true);
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await?;
            if response.result.is_empty() {
                break;
            }

            for point in &response.result {
                let embedding = point
                    .vectors
                    .as_ref()
                    .and_then(|v| v.vectors_options.as_ref())
                    .and_then(|opts| match opts {
                        VectorsOptions::Vector(v) => Some(v.data.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                if embedding.is_empty() {
                    debug!(id = %point_uuid(&point.id), "point has no vector, skipping");
                    continue;
                }
                let id = match payload_str(&point.payload, "id") {
                    s if s.is_empty() => point_uuid(&point.id),
                    s => s,
                };
                all.push(IndexedPoint {
                    id,
                    text: payload_str(&point.payload, "text"),
                    embedding,
                });
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(count = all.len(), "scanned all points");
        Ok(all)
    }
}
