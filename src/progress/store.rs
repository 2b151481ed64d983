use std::sync::Arc;

use serde_json::{Map, Value};
use teloxide::dispatching::dialogue::{
    serializer::Json, ErasedStorage, InMemStorage, SqliteStorage, Storage,
};
use teloxide::types::{ChatId, UserId};

use super::{migrate, UserProgress};

type StorageError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(#[from] StorageError),
    #[error("stored progress is not a JSON object")]
    NotAnObject,
    #[error("could not encode or decode progress: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Durable per-user progress, one JSON record per user.
///
/// Records go through [`migrate::upgrade`] on every read, so whatever an
/// older version wrote comes back in the current shape. Writes replace the
/// whole record.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<ErasedStorage<Value>>,
}

impl ProgressStore {
    pub async fn open_sqlite(path: &str) -> Result<Self, StoreError> {
        let storage = SqliteStorage::open(path, Json)
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?
            .erase();
        Ok(Self { storage })
    }

    pub fn in_memory() -> Self {
        Self {
            storage: InMemStorage::<Value>::new().erase(),
        }
    }

    fn key(user: UserId) -> ChatId {
        // private chat id == user id
        ChatId(user.0 as i64)
    }

    pub async fn load(&self, user: UserId) -> Result<UserProgress, StoreError> {
        let Some(raw) = self.storage.clone().get_dialogue(Self::key(user)).await? else {
            let progress = UserProgress::default();
            self.save(user, &progress).await?;
            return Ok(progress);
        };

        let Value::Object(mut record) = raw else {
            return Err(StoreError::NotAnObject);
        };
        let migrated = migrate::upgrade(&mut record);
        let mut progress: UserProgress = serde_json::from_value(Value::Object(record))?;
        let repaired = progress.repair();

        if migrated || repaired {
            log::info!("Upgraded stored progress of user {}", user.0);
            self.save(user, &progress).await?;
        }
        Ok(progress)
    }

    pub async fn save(&self, user: UserId, progress: &UserProgress) -> Result<(), StoreError> {
        let record = serde_json::to_value(progress)?;
        self.storage
            .clone()
            .update_dialogue(Self::key(user), record)
            .await?;
        Ok(())
    }

    /// Stored JSON exactly as it sits in the backend, for diagnostics and tests.
    pub async fn raw(&self, user: UserId) -> Result<Option<Map<String, Value>>, StoreError> {
        match self.storage.clone().get_dialogue(Self::key(user)).await? {
            None => Ok(None),
            Some(Value::Object(record)) => Ok(Some(record)),
            Some(_) => Err(StoreError::NotAnObject),
        }
    }

    pub async fn put_raw(
        &self,
        user: UserId,
        record: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.storage
            .clone()
            .update_dialogue(Self::key(user), Value::Object(record))
            .await?;
        Ok(())
    }
}
