//! String metadata attached to stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One key/value metadata entry attached to an object.
///
/// The durable backend stores the map row by row; typed interpretation
/// happens in [`crate::models::stored::StoredMetadata`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    /// Metadata key (e.g., "expirationDate").
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
