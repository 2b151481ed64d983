use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use teloxide::types::UserId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per user, so a user's read-modify-write cycles never
/// interleave while different users proceed in parallel.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user)
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
