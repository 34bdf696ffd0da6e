#![allow(clippy::module_name_repetitions)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    Figure,
}

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    section_id: Option<String>,
    page_number: Option<u32>,
    chunk_type: ChunkType,
    content: String,
    embedding: Vec<f32>,
    raw_data: Option<serde_json::Value>
});

/// Vector search hit carrying the cosine similarity against the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: DocumentChunk,
    pub score: f32,
}

impl DocumentChunk {
    pub fn new(document_id: String, content: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            section_id: None,
            page_number: None,
            chunk_type: ChunkType::Text,
            content,
            embedding,
            raw_data: None,
        }
    }

    /// Cosine-similarity search restricted to the given documents. Results
    /// come back best-first with their similarity score.
    pub async fn vector_search_in_documents(
        take: usize,
        query_embedding: Vec<f32>,
        document_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[allow(clippy::missing_docs_in_private_items)]
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "crate::storage::types::record::deserialize_key")]
            id: String,
            #[serde(deserialize_with = "crate::storage::types::record::deserialize_datetime")]
            created_at: DateTime<Utc>,
            #[serde(deserialize_with = "crate::storage::types::record::deserialize_datetime")]
            updated_at: DateTime<Utc>,
            document_id: String,
            section_id: Option<String>,
            page_number: Option<u32>,
            chunk_type: ChunkType,
            content: String,
            embedding: Vec<f32>,
            raw_data: Option<serde_json::Value>,
            score: f32,
        }

        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT
                id,
                created_at,
                updated_at,
                document_id,
                section_id,
                page_number,
                chunk_type,
                content,
                embedding,
                raw_data,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {chunk_table}
            WHERE document_id IN $document_ids
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#,
            chunk_table = Self::table_name(),
            take = take
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("document_ids", document_ids))
            .await
            .map_err(|e| AppError::Internal(format!("Surreal query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: DocumentChunk {
                    id: r.id,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    document_id: r.document_id,
                    section_id: r.section_id,
                    page_number: r.page_number,
                    chunk_type: r.chunk_type,
                    content: r.content,
                    embedding: r.embedding,
                    raw_data: r.raw_data,
                },
                score: r.score,
            })
            .collect())
    }

    /// All chunks of one document, in page order.
    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<DocumentChunk> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) \
                 WHERE document_id = $document_id ORDER BY page_number ASC",
            )
            .bind(("table_name", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3, "idx_embedding_document_chunk")
            .await
            .expect("ensure initialized");
        db
    }

    fn chunk_with(document_id: &str, content: &str, embedding: Vec<f32>, page: u32) -> DocumentChunk {
        let mut chunk = DocumentChunk::new(document_id.to_string(), content.to_string(), embedding);
        chunk.page_number = Some(page);
        chunk
    }

    #[tokio::test]
    async fn test_vector_search_filters_by_document() {
        let db = memory_db().await;

        let inside = chunk_with("doc_snu", "컴퓨터공학부 모집인원 30명", vec![1.0, 0.0, 0.0], 3);
        let outside = chunk_with("doc_yonsei", "경영학과 모집인원 50명", vec![1.0, 0.0, 0.0], 5);

        db.store_item(inside.clone()).await.expect("store inside");
        db.store_item(outside).await.expect("store outside");

        let results = DocumentChunk::vector_search_in_documents(
            5,
            vec![1.0, 0.0, 0.0],
            vec!["doc_snu".to_string()],
            &db,
        )
        .await
        .expect("vector search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, inside.id);
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let db = memory_db().await;

        let close = chunk_with("doc", "close", vec![0.9, 0.1, 0.0], 1);
        let far = chunk_with("doc", "far", vec![0.0, 1.0, 0.0], 2);

        db.store_item(close.clone()).await.expect("store close");
        db.store_item(far.clone()).await.expect("store far");

        let results = DocumentChunk::vector_search_in_documents(
            2,
            vec![1.0, 0.0, 0.0],
            vec!["doc".to_string()],
            &db,
        )
        .await
        .expect("vector search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, close.id);
        assert_eq!(results[1].chunk.id, far.id);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_vector_search_empty_document_set_short_circuits() {
        let db = memory_db().await;

        let results =
            DocumentChunk::vector_search_in_documents(5, vec![1.0, 0.0, 0.0], Vec::new(), &db)
                .await
                .expect("vector search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_document_orders_by_page() {
        let db = memory_db().await;

        let late = chunk_with("doc", "page nine", vec![0.1, 0.1, 0.1], 9);
        let early = chunk_with("doc", "page two", vec![0.1, 0.1, 0.1], 2);

        db.store_item(late).await.expect("store late");
        db.store_item(early).await.expect("store early");

        let chunks = DocumentChunk::list_by_document("doc", &db)
            .await
            .expect("list by document");

        let pages: Vec<Option<u32>> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, vec![Some(2), Some(9)]);
    }
}
