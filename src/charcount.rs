//! TTL cache of per-account character counts reported by game servers.
//!
//! Populated asynchronously by ReplyCharacters; read when composing the
//! server list. Expired entries read as absent.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u8,
    stamp: Instant,
}

/// account → server id → (count, timestamp), under one rw-lock.
pub struct CharacterCountCache {
    data: RwLock<HashMap<String, HashMap<i32, Entry>>>,
    ttl: Duration,
}

impl CharacterCountCache {
    pub fn new(ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl };
        Self {
            data: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn set(&self, account: &str, server_id: i32, count: u8) {
        let mut data = self.data.write().unwrap();
        data.entry(account.to_string()).or_default().insert(
            server_id,
            Entry {
                count,
                stamp: Instant::now(),
            },
        );
    }

    /// 0 when missing or expired.
    pub fn get(&self, account: &str, server_id: i32) -> u8 {
        let data = self.data.read().unwrap();
        let Some(entry) = data.get(account).and_then(|s| s.get(&server_id)) else {
            return 0;
        };
        if entry.stamp.elapsed() > self.ttl {
            return 0;
        }
        entry.count
    }

    /// All non-expired entries for the account, sorted by server id.
    pub fn get_all(&self, account: &str) -> Vec<(i32, u8)> {
        let data = self.data.read().unwrap();
        let Some(servers) = data.get(account) else {
            return Vec::new();
        };
        let mut counts: Vec<(i32, u8)> = servers
            .iter()
            .filter(|(_, e)| e.stamp.elapsed() <= self.ttl)
            .map(|(id, e)| (*id, e.count))
            .collect();
        counts.sort_by_key(|(id, _)| *id);
        counts
    }

    /// Drops every entry reported by a server, e.g. when it disconnects.
    pub fn clear_server(&self, server_id: i32) {
        let mut data = self.data.write().unwrap();
        for servers in data.values_mut() {
            servers.remove(&server_id);
        }
        data.retain(|_, servers| !servers.is_empty());
    }

    pub fn clear_account(&self, account: &str) {
        self.data.write().unwrap().remove(account);
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut data = self.data.write().unwrap();
        let mut dropped = 0;
        for servers in data.values_mut() {
            let before = servers.len();
            servers.retain(|_, e| e.stamp.elapsed() <= self.ttl);
            dropped += before - servers.len();
        }
        data.retain(|_, servers| !servers.is_empty());
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let cache = CharacterCountCache::new(DEFAULT_CACHE_TTL);
        cache.set("alice", 1, 3);
        cache.set("alice", 2, 7);
        assert_eq!(cache.get("alice", 1), 3);
        assert_eq!(cache.get("alice", 2), 7);
        assert_eq!(cache.get("alice", 3), 0);
        assert_eq!(cache.get("bob", 1), 0);
    }

    #[test]
    fn get_all_is_sorted() {
        let cache = CharacterCountCache::new(DEFAULT_CACHE_TTL);
        cache.set("alice", 2, 7);
        cache.set("alice", 1, 3);
        assert_eq!(cache.get_all("alice"), vec![(1, 3), (2, 7)]);
        assert!(cache.get_all("bob").is_empty());
    }

    #[test]
    fn entries_expire() {
        let cache = CharacterCountCache::new(Duration::from_millis(10));
        cache.set("alice", 1, 3);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("alice", 1), 0);
        assert!(cache.get_all("alice").is_empty());
    }

    #[test]
    fn upsert_refreshes() {
        let cache = CharacterCountCache::new(DEFAULT_CACHE_TTL);
        cache.set("alice", 1, 3);
        cache.set("alice", 1, 4);
        assert_eq!(cache.get("alice", 1), 4);
        assert_eq!(cache.get_all("alice").len(), 1);
    }

    #[test]
    fn clear_server_purges_across_accounts() {
        let cache = CharacterCountCache::new(DEFAULT_CACHE_TTL);
        cache.set("alice", 1, 3);
        cache.set("alice", 2, 1);
        cache.set("bob", 1, 5);
        cache.clear_server(1);
        assert_eq!(cache.get("alice", 1), 0);
        assert_eq!(cache.get("alice", 2), 1);
        assert_eq!(cache.get("bob", 1), 0);
    }

    #[test]
    fn clear_account_purges_subtree() {
        let cache = CharacterCountCache::new(DEFAULT_CACHE_TTL);
        cache.set("alice", 1, 3);
        cache.set("bob", 1, 5);
        cache.clear_account("alice");
        assert_eq!(cache.get("alice", 1), 0);
        assert_eq!(cache.get("bob", 1), 5);
    }

    #[test]
    fn cleanup_reports_dropped_entries() {
        let cache = CharacterCountCache::new(Duration::from_millis(10));
        cache.set("alice", 1, 3);
        cache.set("bob", 2, 5);
        std::thread::sleep(Duration::from_millis(30));
        cache.set("bob", 3, 6);
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.get("bob", 3), 6);
    }
}
