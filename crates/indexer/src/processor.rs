//! Index loader
//!
//! Chunks documents, embeds the chunks in batches and upserts the
//! resulting records into the vector index.

use crate::chunker::{chunk_words, ChunkingConfig};
use crate::corpus::{CorpusKind, Document};
use dragongpt_common::embeddings::Embedder;
use dragongpt_common::index::{IndexRecord, VectorIndex};
use dragongpt_common::metrics;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Texts per embedding request
    pub embed_batch_size: usize,
    /// Records per upsert request
    pub upsert_batch_size: usize,
    pub chunking: ChunkingConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 100,
            upsert_batch_size: 200,
            chunking: ChunkingConfig::default(),
        }
    }
}

/// What one load did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub documents: usize,
    /// Documents with no text to embed
    pub skipped: usize,
    pub chunks: usize,
    pub upserted: usize,
}

struct PendingChunk {
    id: String,
    text: String,
    metadata: serde_json::Map<String, Value>,
}

pub struct IndexLoader {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: LoaderConfig,
}

impl IndexLoader {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: LoaderConfig) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Chunk, embed and upsert `documents`
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn load(
        &self,
        kind: CorpusKind,
        documents: &[Document],
    ) -> Result<LoadReport, IndexingError> {
        let (pending, skipped) = self.chunk_documents(documents);
        if skipped > 0 {
            warn!(skipped, "Skipped documents without text");
        }
        info!(corpus = %kind, chunks = pending.len(), "Embedding chunks");

        let records = self.embed(pending).await?;

        let mut upserted = 0;
        for batch in records.chunks(self.config.upsert_batch_size.max(1)) {
            let count = self
                .index
                .upsert(batch)
                .await
                .map_err(|e| IndexingError::UpsertFailed(e.to_string()))?;
            debug!(batch_size = batch.len(), upserted = count, "Upserted batch");
            upserted += count;
        }

        metrics::record_upsert(upserted, kind.as_str());
        info!(corpus = %kind, upserted, "Corpus loaded into index");

        Ok(LoadReport {
            documents: documents.len(),
            skipped,
            chunks: records.len(),
            upserted,
        })
    }

    fn chunk_documents(&self, documents: &[Document]) -> (Vec<PendingChunk>, usize) {
        let mut pending = Vec::new();
        let mut skipped = 0;

        for doc in documents {
            let chunks = chunk_words(&doc.text, &self.config.chunking);
            if chunks.is_empty() {
                skipped += 1;
                continue;
            }

            for chunk in chunks {
                let mut metadata = doc.metadata.clone();
                if doc.index_chunks {
                    metadata.insert("Chunk_Index".to_string(), Value::from(chunk.index));
                }
                metadata.insert(doc.chunk_field.to_string(), Value::String(chunk.content.clone()));

                pending.push(PendingChunk {
                    id: format!("{}_chunk_{}", doc.key, chunk.index),
                    text: chunk.content,
                    metadata,
                });
            }
        }

        (pending, skipped)
    }

    async fn embed(&self, pending: Vec<PendingChunk>) -> Result<Vec<IndexRecord>, IndexingError> {
        let mut records = Vec::with_capacity(pending.len());

        for batch in pending.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| IndexingError::EmbeddingFailed(e.to_string()))?;

            if vectors.len() != batch.len() {
                return Err(IndexingError::EmbeddingFailed(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            records.extend(batch.iter().zip(vectors).map(|(chunk, values)| IndexRecord {
                id: chunk.id.clone(),
                values,
                metadata: chunk.metadata.clone(),
            }));
        }

        Ok(records)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index upsert failed: {0}")]
    UpsertFailed(String),

    #[error("Corpus error: {0}")]
    Corpus(String),
}
