use chrono::{DateTime, Utc};
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{
    error::AppError,
    principal::Principal,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

use super::message::Message;

/// Longest title derived from a first user message.
const TITLE_MAX_CHARS: usize = 40;

stored_object!(Session, "session", {
    principal_kind: String,
    principal_id: String,
    title: String
});

impl Session {
    pub fn new(principal: &Principal, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            principal_kind: principal.kind().to_string(),
            principal_id: principal.id().to_string(),
            title,
        }
    }

    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        self.principal_kind == principal.kind() && self.principal_id == principal.id()
    }

    /// Derive a session title from the first user message.
    pub fn derive_title(first_message: &str) -> String {
        let trimmed = first_message.trim();
        if trimmed.is_empty() {
            return "새 상담".to_string();
        }
        let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        if trimmed.chars().count() > TITLE_MAX_CHARS {
            title.push('…');
        }
        title
    }

    /// Fetch a session and refuse access across principals.
    pub async fn get_owned(
        id: &str,
        principal: &Principal,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let session: Session = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if !session.is_owned_by(principal) {
            return Err(AppError::Auth(
                "You don't have access to this session".to_string(),
            ));
        }

        Ok(session)
    }

    pub async fn list_for_principal(
        principal: &Principal,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let sessions: Vec<Session> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) \
                 WHERE principal_kind = $kind AND principal_id = $id \
                 ORDER BY updated_at DESC",
            )
            .bind(("table_name", Self::table_name()))
            .bind(("kind", principal.kind().to_string()))
            .bind(("id", principal.id().to_string()))
            .await?
            .take(0)?;

        Ok(sessions)
    }

    pub async fn rename(
        id: &str,
        principal: &Principal,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        Self::get_owned(id, principal, db).await?;

        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", new_title.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    /// Bumps `updated_at` so session listings surface recent activity first.
    pub async fn touch(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::touch_at(id, Utc::now(), db).await
    }

    /// Sets `updated_at` to an explicit instant. The append path uses the
    /// message timestamp so a session is never older than its newest message.
    pub async fn touch_at(
        id: &str,
        at: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(at),
            ))
            .await?;
        Ok(())
    }

    /// Deletes the session and its messages in one transaction so a message
    /// can never outlive its session.
    pub async fn delete_cascade(
        id: &str,
        principal: &Principal,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        Self::get_owned(id, principal, db).await?;

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query("DELETE message WHERE session_id = $session_id;")
            .query("DELETE type::thing('session', $session_id);")
            .query("COMMIT TRANSACTION;")
            .bind(("session_id", id.to_string()))
            .await?;

        response.check()?;

        Ok(())
    }
}
