//! User annotations keyed by transaction id

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::KeyValueStore;

const MEMO_PREFIX: &str = "memos/";

pub struct MemosManager {
    store: Arc<dyn KeyValueStore>,
    memos: RwLock<BTreeMap<String, String>>,
}

impl MemosManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            memos: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn load(&self) -> Result<()> {
        let mut loaded = BTreeMap::new();
        for key in self.store.keys(MEMO_PREFIX).await? {
            if let Some(memo) = self.store.read(&key).await? {
                let tx_id = key.trim_start_matches(MEMO_PREFIX).to_string();
                loaded.insert(tx_id, memo);
            }
        }
        *self.memos.write() = loaded;
        Ok(())
    }

    /// An empty memo removes the annotation
    pub async fn save_memo(&self, tx_id: &str, memo: &str) -> Result<()> {
        let key = format!("{}{}", MEMO_PREFIX, tx_id);
        if memo.trim().is_empty() {
            self.store.remove(&key).await?;
            self.memos.write().remove(tx_id);
        } else {
            self.store.write(&key, memo).await?;
            self.memos.write().insert(tx_id.to_string(), memo.to_string());
        }
        Ok(())
    }

    pub fn get_memos(&self) -> BTreeMap<String, String> {
        self.memos.read().clone()
    }

    pub fn get_memo(&self, tx_id: &str) -> Option<String> {
        self.memos.read().get(tx_id).cloned()
    }

    pub async fn clear(&self) -> Result<()> {
        for key in self.store.keys(MEMO_PREFIX).await? {
            self.store.remove(&key).await?;
        }
        self.memos.write().clear();
        Ok(())
    }
}
