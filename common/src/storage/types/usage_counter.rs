#![allow(clippy::module_name_repetitions)]
use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

stored_object!(UsageCounter, "usage_counter", {
    principal_kind: String,
    principal_id: String,
    day: String,
    count: u32
});

impl UsageCounter {
    /// Record key encoding the `(kind, id, day)` triple. Record ids are
    /// unique by construction, which is the database-level uniqueness the
    /// quota algorithm relies on.
    pub fn record_key(kind: &str, id: &str, day: &str) -> String {
        format!("{kind}:{id}:{day}")
    }

    /// Atomic conditional increment. Returns the post-increment count when the
    /// caller was admitted, `None` when the pre-increment count had already
    /// reached `limit`. Runs as one transaction: concurrent callers can never
    /// push the counter past the limit.
    pub async fn try_increment(
        kind: &str,
        id: &str,
        day: &str,
        limit: u32,
        db: &SurrealDbClient,
    ) -> Result<Option<u32>, AppError> {
        let record_key = Self::record_key(kind, id, day);

        let mut response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "UPSERT type::thing('usage_counter', $record_key) SET \
                    principal_kind = $kind, \
                    principal_id = $id, \
                    day = $day, \
                    count = IF count = NONE THEN 0 ELSE count END, \
                    created_at = IF created_at = NONE THEN time::now() ELSE created_at END, \
                    updated_at = time::now();",
            )
            .query(
                "UPDATE type::thing('usage_counter', $record_key) \
                    SET count += 1, updated_at = time::now() \
                    WHERE count < $limit \
                    RETURN AFTER;",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("record_key", record_key))
            .bind(("kind", kind.to_string()))
            .bind(("id", id.to_string()))
            .bind(("day", day.to_string()))
            .bind(("limit", i64::from(limit)))
            .await?;

        let incremented: Vec<UsageCounter> = response.take(1)?;

        Ok(incremented.first().map(|counter| counter.count))
    }

    /// Current count for a principal/day, zero when no row exists yet.
    pub async fn current_count(
        kind: &str,
        id: &str,
        day: &str,
        db: &SurrealDbClient,
    ) -> Result<u32, AppError> {
        let record_key = Self::record_key(kind, id, day);
        let counter: Option<UsageCounter> = db.get_item(&record_key).await?;
        Ok(counter.map_or(0, |c| c.count))
    }

    /// Retention pass: drop counter rows older than the cutoff day. ISO day
    /// strings compare lexicographically, so string comparison suffices.
    pub async fn prune_before(cutoff_day: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table_name) WHERE day < $cutoff_day")
            .bind(("table_name", Self::table_name()))
            .bind(("cutoff_day", cutoff_day.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_increment_counts_up_to_limit() {
        let db = memory_db().await;

        for expected in 1..=3 {
            let count = UsageCounter::try_increment("ip", "abc", "2026-08-01", 3, &db)
                .await
                .expect("increment");
            assert_eq!(count, Some(expected));
        }

        let denied = UsageCounter::try_increment("ip", "abc", "2026-08-01", 3, &db)
            .await
            .expect("increment at limit");
        assert_eq!(denied, None);

        let count = UsageCounter::current_count("ip", "abc", "2026-08-01", &db)
            .await
            .expect("current count");
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_day_rollover_uses_a_fresh_row() {
        let db = memory_db().await;

        for _ in 0..2 {
            UsageCounter::try_increment("user", "u1", "2026-07-31", 2, &db)
                .await
                .expect("increment");
        }
        assert_eq!(
            UsageCounter::try_increment("user", "u1", "2026-07-31", 2, &db)
                .await
                .expect("increment"),
            None
        );

        // A new day starts a new counter row
        let fresh = UsageCounter::try_increment("user", "u1", "2026-08-01", 2, &db)
            .await
            .expect("increment new day");
        assert_eq!(fresh, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_overshoot() {
        let db = std::sync::Arc::new(memory_db().await);
        let limit = 5u32;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let db = std::sync::Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                UsageCounter::try_increment("ip", "racer", "2026-08-01", limit, &db).await
            }));
        }

        let mut admitted = 0u32;
        for handle in handles {
            if handle
                .await
                .expect("join")
                .expect("increment")
                .is_some()
            {
                admitted += 1;
            }
        }

        assert_eq!(admitted, limit);

        let count = UsageCounter::current_count("ip", "racer", "2026-08-01", &db)
            .await
            .expect("current count");
        assert_eq!(count, limit);
    }

    #[tokio::test]
    async fn test_prune_before_drops_only_old_rows() {
        let db = memory_db().await;

        UsageCounter::try_increment("ip", "old", "2026-07-01", 5, &db)
            .await
            .expect("increment old");
        UsageCounter::try_increment("ip", "new", "2026-08-01", 5, &db)
            .await
            .expect("increment new");

        UsageCounter::prune_before("2026-07-15", &db)
            .await
            .expect("prune");

        let old = UsageCounter::current_count("ip", "old", "2026-07-01", &db)
            .await
            .expect("count old");
        let new = UsageCounter::current_count("ip", "new", "2026-08-01", &db)
            .await
            .expect("count new");

        assert_eq!(old, 0);
        assert_eq!(new, 1);
    }
}
