pub mod blob;

pub use blob::Blob;

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub type SoundId = i64;

/// Logical partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundKind {
    Downloaded,
    Recorded,
}

impl SoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundKind::Downloaded => "downloaded",
            SoundKind::Recorded => "recorded",
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloaded" => Ok(SoundKind::Downloaded),
            "recorded" => Ok(SoundKind::Recorded),
            other => Err(Error::OperationFailed(format!("unknown sound type {:?}", other))),
        }
    }
}

/// A sound as handed to the store; `blob` is optional because that is what
/// can arrive over the worker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSound {
    #[serde(rename = "type")]
    pub kind: SoundKind,
    pub name: String,
    pub blob: Option<Blob>,
    pub created_at: DateTime<Utc>,
}

impl NewSound {
    pub fn new(kind: SoundKind, name: impl Into<String>, blob: Blob) -> Self {
        Self {
            kind,
            name: name.into(),
            blob: Some(blob),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundRecord {
    pub id: SoundId,
    #[serde(rename = "type")]
    pub kind: SoundKind,
    pub name: String,
    pub blob: Blob,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SoundRow {
    id: i64,
    kind: String,
    name: String,
    mime_type: String,
    data: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SoundRow> for SoundRecord {
    type Error = Error;

    fn try_from(row: SoundRow) -> Result<Self, Error> {
        Ok(SoundRecord {
            id: row.id,
            kind: row.kind.parse()?,
            name: row.name,
            blob: Blob::new(row.mime_type, row.data),
            created_at: row.created_at,
        })
    }
}

const SELECT_SOUND: &str = "SELECT id, kind, name, mime_type, data, created_at FROM sounds";

/// SQLite-backed sound storage. Owned by exactly one worker task.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(database_url: &str) -> Result<Self, Error> {
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if !path.starts_with(":memory:") {
                if let Some(parent) = Path::new(path).parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::StoreUnavailable(format!("cannot create {}: {}", parent.display(), e))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Opened sound store at {}", database_url);
        Ok(Self { pool })
    }

    pub async fn put(&self, sound: NewSound) -> Result<SoundId, Error> {
        let blob = match sound.blob {
            Some(blob) => {
                blob.validate()?;
                blob
            }
            None => return Err(Error::InvalidPayload("blob is missing".to_string())),
        };

        let result = sqlx::query(
            "INSERT INTO sounds (kind, name, mime_type, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(sound.kind.as_str())
        .bind(&sound.name)
        .bind(blob.mime_type())
        .bind(blob.as_bytes())
        .bind(sound.created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!("Stored {} sound {} ({} bytes)", sound.kind, id, blob.len());
        Ok(id)
    }

    pub async fn query_by_type(&self, kind: SoundKind) -> Result<Vec<SoundRecord>, Error> {
        let rows = sqlx::query_as::<_, SoundRow>(&format!("{} WHERE kind = ? ORDER BY id", SELECT_SOUND))
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SoundRecord::try_from).collect()
    }

    pub async fn get_by_id(&self, id: SoundId) -> Result<Option<SoundRecord>, Error> {
        let row = sqlx::query_as::<_, SoundRow>(&format!("{} WHERE id = ?", SELECT_SOUND))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SoundRecord::try_from).transpose()
    }

    /// Deleting an id that does not exist succeeds.
    pub async fn delete_by_id(&self, id: SoundId) -> Result<(), Error> {
        let result = sqlx::query("DELETE FROM sounds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("Delete of sound {} matched nothing", id);
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
