use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Bridge to the external identity provider: a verified token maps to one of
// these rows, and only the stable id leaves the auth layer.
stored_object!(AuthUser, "auth_user", {
    display_name: String,
    api_key: Option<String>
});

impl AuthUser {
    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<AuthUser> = db
            .client
            .query("SELECT * FROM auth_user WHERE api_key = $api_key LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_find_by_api_key() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            display_name: "수험생A".to_string(),
            api_key: Some("token-123".to_string()),
        };
        db.store_item(user.clone()).await.expect("store user");

        let found = AuthUser::find_by_api_key("token-123", &db)
            .await
            .expect("find by api key");
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let missing = AuthUser::find_by_api_key("unknown", &db)
            .await
            .expect("find missing");
        assert!(missing.is_none());
    }
}
