use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

stored_object!(DocumentMetadata, "document", {
    school_name: String,
    file_name: String,
    title: String,
    summary_text: String,
    summary_embedding: Vec<f32>,
    file_url: String,
    tags: Vec<String>
});

impl DocumentMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        school_name: String,
        file_name: String,
        title: String,
        summary_text: String,
        summary_embedding: Vec<f32>,
        file_url: String,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            school_name,
            file_name,
            title,
            summary_text,
            summary_embedding,
            file_url,
            tags,
        }
    }

    /// Every document uploaded for one school. The school name is a canonical
    /// Korean university name; unknown names simply match nothing.
    pub async fn list_by_school(
        school_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let documents: Vec<DocumentMetadata> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE school_name = $school_name",
            )
            .bind(("table_name", Self::table_name()))
            .bind(("school_name", school_name.to_string()))
            .await?
            .take(0)?;

        Ok(documents)
    }

    /// Distinct school names present in the corpus, for router prompting.
    pub async fn distinct_school_names(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            school_name: String,
        }

        let rows: Vec<Row> = db
            .client
            .query("SELECT school_name FROM type::table($table_name) GROUP BY school_name")
            .bind(("table_name", Self::table_name()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().map(|r| r.school_name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn document_for(school: &str, title: &str) -> DocumentMetadata {
        DocumentMetadata::new(
            school.to_string(),
            format!("{title}.pdf"),
            title.to_string(),
            format!("{title} 요약"),
            vec![0.1, 0.2, 0.3],
            format!("https://corpus.example/{title}.pdf"),
            vec!["정시".to_string()],
        )
    }

    #[tokio::test]
    async fn test_list_by_school_filters_documents() {
        let db = memory_db().await;

        let snu = document_for("서울대학교", "2026-snu-정시");
        let yonsei = document_for("연세대학교", "2026-yonsei-정시");

        db.store_item(snu.clone()).await.expect("store snu");
        db.store_item(yonsei).await.expect("store yonsei");

        let documents = DocumentMetadata::list_by_school("서울대학교", &db)
            .await
            .expect("list by school");

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, snu.id);

        let none = DocumentMetadata::list_by_school("없는대학교", &db)
            .await
            .expect("list unknown school");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_school_names() {
        let db = memory_db().await;

        for title in ["a", "b"] {
            db.store_item(document_for("서울대학교", title))
                .await
                .expect("store");
        }
        db.store_item(document_for("고려대학교", "c"))
            .await
            .expect("store");

        let mut names = DocumentMetadata::distinct_school_names(&db)
            .await
            .expect("distinct names");
        names.sort();

        assert_eq!(names, vec!["고려대학교", "서울대학교"]);
    }
}
