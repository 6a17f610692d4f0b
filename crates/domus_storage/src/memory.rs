use async_trait::async_trait;
use domus_core::Result;
use rustc_hash::FxHashMap;
use std::sync::{Mutex, PoisonError};

use crate::Storage;

/// In-process storage backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<FxHashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_get_clear() {
        let storage = MemoryStorage::new();
        assert_eq!(block_on(storage.get("a")).unwrap(), None);

        block_on(storage.set("a", "1".to_string())).unwrap();
        block_on(storage.set("a", "2".to_string())).unwrap();
        assert_eq!(block_on(storage.get("a")).unwrap(), Some("2".to_string()));
        assert_eq!(storage.len(), 1);

        block_on(storage.clear("a")).unwrap();
        assert_eq!(block_on(storage.get("a")).unwrap(), None);
        assert!(storage.is_empty());
    }
}
