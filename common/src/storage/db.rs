use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines every index the service relies on. The HNSW dimension and the
    /// vector index name come from configuration; the corpus must agree with
    /// the dimension or startup aborts (checked separately in the binary).
    pub async fn ensure_initialized(
        &self,
        embedding_dim: u32,
        vector_index_name: &str,
    ) -> Result<(), Error> {
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS {vector_index_name} ON document_chunk FIELDS embedding \
                 HNSW DIMENSION {embedding_dim} DIST COSINE TYPE F32 EFC 100 M 8"
            ))
            .await?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_school ON document FIELDS school_name")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_document ON document_chunk FIELDS document_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_message_session ON message FIELDS session_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_session_principal ON session FIELDS principal_kind, principal_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_usage_day ON usage_counter FIELDS day")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_api_key ON auth_user FIELDS api_key UNIQUE")
            .await?;

        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to retrieve all objects from a certain table
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to delete a single object by its ID
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Startup corpus check: every stored embedding must match the configured
/// dimension. Returns the offending dimension when the corpus disagrees.
pub async fn verify_corpus_dimension(
    db: &SurrealDbClient,
    expected: u32,
) -> Result<(), AppError> {
    #[derive(serde::Deserialize)]
    struct DimRow {
        dim: i64,
    }

    let expected = i64::from(expected);

    let mut response = db
        .client
        .query("SELECT array::len(embedding) AS dim FROM document_chunk LIMIT 1")
        .query("SELECT array::len(summary_embedding) AS dim FROM document LIMIT 1")
        .await?;

    let chunk_dim: Vec<DimRow> = response.take(0).unwrap_or_default();
    let summary_dim: Vec<DimRow> = response.take(1).unwrap_or_default();

    for row in chunk_dim.iter().chain(summary_dim.iter()) {
        if row.dim != expected {
            return Err(AppError::Validation(format!(
                "corpus embedding dimension {} does not match configured dimension {}",
                row.dim, expected
            )));
        }
    }

    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
