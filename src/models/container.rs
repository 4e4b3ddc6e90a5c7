//! A container is a flat namespace for stored objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage container in the durable backend.
///
/// The service uses two: one for temporary chunks and one for finalized
/// ciphertext objects.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Container name (lowercase letters, digits and hyphens).
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
