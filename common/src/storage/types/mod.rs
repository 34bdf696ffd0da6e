use serde::{Deserialize, Serialize};
pub mod auth_user;
pub mod document;
pub mod document_chunk;
pub mod message;
pub mod session;
pub mod usage_counter;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Serde glue for rows that live in SurrealDB. A query that fetches a record
/// link hands back a full `Thing` where a plain select hands back the bare
/// key, and timestamps round-trip through SurrealDB's own datetime type. The
/// helpers here absorb both shapes so row structs stay plain Rust.
pub mod record {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use surrealdb::sql::Thing;

    /// The two ways a record key comes back from the database.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum KeyRepr {
        Bare(String),
        Linked(Thing),
    }

    pub fn deserialize_key<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match KeyRepr::deserialize(deserializer)? {
            KeyRepr::Bare(key) => key,
            KeyRepr::Linked(thing) => thing.id.to_raw(),
        })
    }

    pub fn serialize_datetime<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        surrealdb::sql::Datetime::from(*value).serialize(serializer)
    }

    pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let datetime = surrealdb::sql::Datetime::deserialize(deserializer)?;
        Ok(datetime.into())
    }
}

/// Declares a SurrealDB-backed row type. Every table in this service keys
/// rows by a string id and stamps creation/update times, so the macro adds
/// those three columns, wires the [`record`] serde glue for them, and
/// implements [`StoredObject`]. The serde paths are crate-relative: stored
/// types live in this crate's storage layer.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),*}) => {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            #[serde(deserialize_with = "crate::storage::types::record::deserialize_key")]
            pub id: String,
            #[serde(
                serialize_with = "crate::storage::types::record::serialize_datetime",
                deserialize_with = "crate::storage::types::record::deserialize_datetime",
                default
            )]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(
                serialize_with = "crate::storage::types::record::serialize_datetime",
                deserialize_with = "crate::storage::types::record::deserialize_datetime",
                default
            )]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::storage::types::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
