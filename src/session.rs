//! Session-key ledger for the login → game-server handoff.
//!
//! A key is minted when the client picks a server, presented back by that
//! game server, and consumed exactly once on successful validation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rand::{thread_rng, Rng};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// The 4-tuple handoff token. Equality is on the four halves only; account
/// and server are contextual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey {
    pub login_key1: u32,
    pub login_key2: u32,
    pub play_key1: u32,
    pub play_key2: u32,
}

struct LedgerEntry {
    key: SessionKey,
    server_id: i32,
    created_at: Instant,
}

impl LedgerEntry {
    fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }
}

/// Account → pending session key. Shared by all connection tasks; short
/// critical sections, no I/O under the lock.
pub struct SessionLedger {
    entries: RwLock<HashMap<String, LedgerEntry>>,
    max_age: Duration,
}

impl SessionLedger {
    pub fn new(max_age: Duration) -> Self {
        let max_age = if max_age.is_zero() {
            DEFAULT_SESSION_TTL
        } else {
            max_age
        };
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    /// Mints a key with fresh random play halves, replacing any prior entry
    /// for the account.
    pub fn mint(&self, account: &str, server_id: i32, login_key1: u32, login_key2: u32) -> SessionKey {
        let key = SessionKey {
            login_key1,
            login_key2,
            play_key1: thread_rng().gen(),
            play_key2: thread_rng().gen(),
        };

        let entry = LedgerEntry {
            key,
            server_id,
            created_at: Instant::now(),
        };

        let mut entries = self.entries.write().unwrap();
        if entries.insert(account.to_string(), entry).is_some() {
            tracing::debug!("[session] [replaced] account={}", account);
        }
        tracing::info!(
            "[session] [minted] account={} server_id={}",
            account,
            server_id
        );
        key
    }

    /// Validates a candidate against the stored key. Missing or expired
    /// entries fail (expired ones are dropped on the spot).
    pub fn validate(&self, account: &str, candidate: &SessionKey) -> bool {
        let mut entries = self.entries.write().unwrap();
        let Some(entry) = entries.get(account) else {
            tracing::warn!("[session] [validate_miss] account={}", account);
            return false;
        };
        if entry.is_expired(self.max_age) {
            tracing::warn!("[session] [validate_expired] account={}", account);
            entries.remove(account);
            return false;
        }
        if entry.key != *candidate {
            tracing::warn!("[session] [validate_mismatch] account={}", account);
            return false;
        }
        true
    }

    /// Drops the entry for the account. Idempotent.
    pub fn consume(&self, account: &str) {
        if self.entries.write().unwrap().remove(account).is_some() {
            tracing::info!("[session] [consumed] account={}", account);
        }
    }

    pub fn contains(&self, account: &str) -> bool {
        self.entries.read().unwrap().contains_key(account)
    }

    /// The server the key was minted for, if one is pending.
    pub fn server_for(&self, account: &str) -> Option<i32> {
        self.entries
            .read()
            .unwrap()
            .get(account)
            .map(|e| e.server_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Sweeps expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(self.max_age));
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::info!("[session] [swept] expired={}", dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_validate() {
        let ledger = SessionLedger::new(DEFAULT_SESSION_TTL);
        let key = ledger.mint("alice", 1, 0x11111111, 0x22222222);
        assert_eq!(key.login_key1, 0x11111111);
        assert_eq!(key.login_key2, 0x22222222);
        assert!(ledger.validate("alice", &key));
        assert_eq!(ledger.server_for("alice"), Some(1));
    }

    #[test]
    fn consume_once() {
        let ledger = SessionLedger::new(DEFAULT_SESSION_TTL);
        let key = ledger.mint("alice", 1, 1, 2);
        assert!(ledger.validate("alice", &key));
        ledger.consume("alice");
        assert!(!ledger.validate("alice", &key));
        // A second consume is harmless.
        ledger.consume("alice");
        assert!(ledger.is_empty());
    }

    #[test]
    fn mismatched_halves_fail() {
        let ledger = SessionLedger::new(DEFAULT_SESSION_TTL);
        let key = ledger.mint("alice", 1, 1, 2);
        let mut wrong = key;
        wrong.play_key2 ^= 1;
        assert!(!ledger.validate("alice", &wrong));
        // The stored key survives a failed validation.
        assert!(ledger.validate("alice", &key));
    }

    #[test]
    fn mint_replaces_prior_entry() {
        let ledger = SessionLedger::new(DEFAULT_SESSION_TTL);
        let old = ledger.mint("alice", 1, 1, 2);
        let new = ledger.mint("alice", 2, 1, 2);
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.validate("alice", &old) || old == new);
        assert!(ledger.validate("alice", &new));
        assert_eq!(ledger.server_for("alice"), Some(2));
    }

    #[test]
    fn expired_keys_fail_and_are_dropped() {
        let ledger = SessionLedger::new(Duration::from_millis(1));
        let key = ledger.mint("alice", 1, 1, 2);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!ledger.validate("alice", &key));
        assert!(!ledger.contains("alice"));
    }

    #[test]
    fn cleanup_sweeps_only_expired() {
        let ledger = SessionLedger::new(Duration::from_millis(20));
        ledger.mint("old", 1, 1, 2);
        std::thread::sleep(Duration::from_millis(40));
        ledger.mint("fresh", 1, 3, 4);
        assert_eq!(ledger.cleanup_expired(), 1);
        assert!(!ledger.contains("old"));
        assert!(ledger.contains("fresh"));
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let ledger = SessionLedger::new(Duration::ZERO);
        let key = ledger.mint("alice", 1, 1, 2);
        assert!(ledger.validate("alice", &key));
    }

    #[test]
    fn play_keys_differ_between_mints() {
        let ledger = SessionLedger::new(DEFAULT_SESSION_TTL);
        let a = ledger.mint("a", 1, 0, 0);
        let b = ledger.mint("b", 1, 0, 0);
        // Overwhelmingly likely for a CSPRNG; both halves colliding would
        // mean a broken generator.
        assert!(a.play_key1 != b.play_key1 || a.play_key2 != b.play_key2);
    }
}
