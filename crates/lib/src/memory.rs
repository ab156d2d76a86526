//! In-process cache of loaded modules.
//!
//! Entries live as long as the owning [`crate::ModuleCache`]; nothing is
//! evicted or persisted.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::identity::ModuleKey;

#[derive(Debug)]
pub struct MemoryCache<H> {
  modules: RwLock<HashMap<ModuleKey, H>>,
}

impl<H> Default for MemoryCache<H> {
  fn default() -> Self {
    Self {
      modules: RwLock::new(HashMap::new()),
    }
  }
}

impl<H: Clone> MemoryCache<H> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &ModuleKey) -> Option<H> {
    let modules = self.modules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    let found = modules.get(key).cloned();
    if found.is_some() {
      debug!(key = ?key, "found module in memory cache");
    }
    found
  }

  /// Register `handle` under every key in `keys`.
  pub fn put(&self, keys: &[ModuleKey], handle: H) {
    let mut modules = self.modules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    for key in keys {
      debug!(key = ?key, "added module to memory cache");
      modules.insert(key.clone(), handle.clone());
    }
  }

  pub fn len(&self) -> usize {
    self.modules.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn put_registers_every_alias() {
    let cache = MemoryCache::new();
    let keys = vec![
      ModuleKey::Object("form#1".to_string()),
      ModuleKey::Text("sig".to_string()),
      ModuleKey::Text("modcache_module_abc".to_string()),
    ];

    cache.put(&keys, 42u32);

    for key in &keys {
      assert_eq!(cache.get(key), Some(42));
    }
    assert_eq!(cache.len(), 3);
  }

  #[test]
  fn object_and_text_keys_are_distinct() {
    let cache = MemoryCache::new();
    cache.put(&[ModuleKey::Object("same".to_string())], 1u32);

    assert_eq!(cache.get(&ModuleKey::Text("same".to_string())), None);
  }

  #[test]
  fn empty_cache_misses() {
    let cache: MemoryCache<u32> = MemoryCache::new();
    assert!(cache.is_empty());
    assert_eq!(cache.get(&ModuleKey::Text("x".to_string())), None);
  }
}
