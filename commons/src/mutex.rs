//! Keyed read/write mutex registry.
//!
//! A simple key/value store of arbitrary RW locks. It can be used to
//! serialize changes across arbitrary collaborators that share knowledge of
//! the keys they must serialize on; the storage engine keys on the fully
//! qualified repository reference.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        KeyedMutex::default()
    }

    /// Lock `key` for writing. The guard is held across await points.
    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        log::debug!("locking {:?}", key);
        let guard = self.entry(key).write_owned().await;
        log::debug!("locked {:?}", key);
        guard
    }

    /// Lock `key` for reading.
    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(key).read_owned().await
    }

    // Returns the lock for the given key, no guarantee of its lock status.
    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(Default::default)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn writers_are_serialized_per_key() {
        let mutex = Arc::new(KeyedMutex::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let mutex = mutex.clone();
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = mutex.write("repo:apk").await;
                let v = counter.load(Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                counter.store(v + 1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        // Lost updates would show up as a lower count.
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let mutex = KeyedMutex::new();
        let _a = mutex.write("a").await;
        // Must not block even though "a" is held.
        let _b = mutex.write("b").await;
    }

    #[tokio::test]
    async fn readers_share() {
        let mutex = KeyedMutex::new();
        let _r1 = mutex.read("a").await;
        let _r2 = mutex.read("a").await;
    }
}
