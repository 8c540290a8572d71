//! Process-wide, TTL-bounded store of authorization verdicts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::{PrincipalId, RequirementKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct CacheEntry {
    allowed: bool,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Hit/miss counters since construction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Verdict cache keyed by principal, then by requirement set.
///
/// Entries are grouped per principal so invalidating one principal never
/// touches another's. An entry at or past its expiry is reported as absent.
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: RwLock<HashMap<PrincipalId, HashMap<RequirementKey, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached verdict when an unexpired entry exists.
    pub fn get(
        &self,
        principal: &PrincipalId,
        key: &RequirementKey,
        now: DateTime<Utc>,
    ) -> Option<bool> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let verdict = entries
            .get(principal)
            .and_then(|by_key| by_key.get(key))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.allowed);

        match verdict {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        verdict
    }

    pub fn insert(
        &self,
        principal: PrincipalId,
        key: RequirementKey,
        allowed: bool,
        expires_at: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(principal)
            .or_default()
            .insert(key, CacheEntry { allowed, expires_at });
    }

    /// Drops every entry for `principal`. Returns how many were removed.
    pub fn invalidate_principal(&self, principal: &PrincipalId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(principal).map_or(0, |by_key| by_key.len())
    }

    /// Drops everything. Returns how many entries were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.values().map(HashMap::len).sum();
        entries.clear();
        removed
    }

    /// Physically removes expired entries. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        entries.retain(|_, by_key| {
            let before = by_key.len();
            by_key.retain(|_, entry| entry.is_live(now));
            removed += before - by_key.len();
            !by_key.is_empty()
        });
        removed
    }

    /// Stored entries for `principal`, expired or not.
    pub fn entries_for(&self, principal: &PrincipalId) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(principal).map_or(0, HashMap::len)
    }

    /// Stored entries across all principals, expired or not.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{Permission, Role};

    fn key(role: &'static str) -> RequirementKey {
        RequirementKey::from_parts(&[Role::new(role)], &[])
    }

    fn perm_key(perm: &'static str) -> RequirementKey {
        RequirementKey::from_parts(&[], &[Permission::new(perm)])
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let cache = DecisionCache::new();
        let now = Utc::now();
        let u1 = PrincipalId::new("u1");

        cache.insert(u1.clone(), key("admin"), true, now + Duration::minutes(10));
        assert_eq!(cache.get(&u1, &key("admin"), now), Some(true));
        assert_eq!(
            cache.get(&u1, &key("admin"), now + Duration::minutes(10)),
            None
        );
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn invalidation_is_scoped_to_one_principal() {
        let cache = DecisionCache::new();
        let exp = Utc::now() + Duration::minutes(10);
        let u1 = PrincipalId::new("u1");
        let u2 = PrincipalId::new("u2");

        cache.insert(u1.clone(), key("admin"), true, exp);
        cache.insert(u1.clone(), perm_key("edit_users"), false, exp);
        cache.insert(u2.clone(), key("admin"), false, exp);

        assert_eq!(cache.invalidate_principal(&u1), 2);
        assert_eq!(cache.entries_for(&u1), 0);
        assert_eq!(cache.entries_for(&u2), 1);
        assert_eq!(cache.invalidate_principal(&u1), 0);
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = DecisionCache::new();
        let now = Utc::now();
        let u1 = PrincipalId::new("u1");
        let u2 = PrincipalId::new("u2");

        cache.insert(u1.clone(), key("admin"), true, now - Duration::seconds(1));
        cache.insert(u1.clone(), key("inspector"), true, now + Duration::minutes(1));
        cache.insert(u2.clone(), key("admin"), true, now - Duration::seconds(1));

        assert_eq!(cache.purge_expired(now), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries_for(&u2), 0);
    }

    #[test]
    fn clear_empties_everything() {
        let cache = DecisionCache::new();
        let exp = Utc::now() + Duration::minutes(1);
        cache.insert(PrincipalId::new("u1"), key("admin"), true, exp);
        cache.insert(PrincipalId::new("u2"), key("admin"), true, exp);

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}
