//! Account storage and the login decision.
//!
//! The wire handlers never talk to bcrypt or SQL directly: they fetch a row,
//! run [`evaluate_login`], and act on the decision. The Postgres store is
//! the production backend; the in-memory store backs tests and DSN-less
//! runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub const ACCESS_LEVEL_BANNED: i8 = -1;
pub const ACCESS_LEVEL_PLAYER: i8 = 0;

const BCRYPT_COST: u32 = 10;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i32,
    pub username: String,
    pub password: String,
    pub access_level: i8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of checking a password against a (possibly missing) account row.
#[derive(Debug)]
pub enum LoginDecision {
    Accept(Account),
    Banned,
    WrongPassword,
    /// Account unknown and auto-create enabled; the caller persists the row.
    CreateAccount { password_hash: String },
    Rejected,
}

/// Pure login decision: banned accounts short-circuit, passwords verify
/// against the stored bcrypt hash, unknown usernames become new accounts
/// when auto-create is on.
pub fn evaluate_login(existing: Option<Account>, password: &str, auto_create: bool) -> LoginDecision {
    match existing {
        Some(account) => {
            if account.access_level == ACCESS_LEVEL_BANNED {
                return LoginDecision::Banned;
            }
            match bcrypt::verify(password, &account.password) {
                Ok(true) => LoginDecision::Accept(account),
                Ok(false) => LoginDecision::WrongPassword,
                Err(_) => LoginDecision::Rejected,
            }
        }
        None if auto_create => match bcrypt::hash(password, BCRYPT_COST) {
            Ok(password_hash) => LoginDecision::CreateAccount { password_hash },
            Err(_) => LoginDecision::Rejected,
        },
        None => LoginDecision::Rejected,
    }
}

/// The account store behind the login flow. Postgres in production; the
/// in-memory variant keeps the same contract for tests and DSN-less runs.
pub enum AccountStore {
    Postgres(PgPool),
    Memory(MemoryAccounts),
}

impl AccountStore {
    pub async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        match self {
            AccountStore::Postgres(pool) => {
                let row: Option<(i32, String, String, i16, DateTime<Utc>, DateTime<Utc>)> =
                    sqlx::query_as(
                        "SELECT id, username, password, access_level, created_at, updated_at \
                         FROM accounts WHERE username = $1",
                    )
                    .bind(username)
                    .fetch_optional(pool)
                    .await
                    .context("account lookup failed")?;
                Ok(row.map(
                    |(id, username, password, access_level, created_at, updated_at)| Account {
                        id,
                        username,
                        password,
                        access_level: access_level as i8,
                        created_at,
                        updated_at,
                    },
                ))
            }
            AccountStore::Memory(store) => Ok(store.get(username)),
        }
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        access_level: i8,
    ) -> Result<Account> {
        match self {
            AccountStore::Postgres(pool) => {
                let now = Utc::now();
                let (id,): (i32,) = sqlx::query_as(
                    "INSERT INTO accounts (username, password, access_level, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING id",
                )
                .bind(username)
                .bind(password_hash)
                .bind(i16::from(access_level))
                .bind(now)
                .bind(now)
                .fetch_one(pool)
                .await
                .context("account insert failed")?;
                Ok(Account {
                    id,
                    username: username.to_string(),
                    password: password_hash.to_string(),
                    access_level,
                    created_at: now,
                    updated_at: now,
                })
            }
            AccountStore::Memory(store) => Ok(store.create(username, password_hash, access_level)),
        }
    }
}

/// Hash map account store guarded by a plain mutex.
#[derive(Default)]
pub struct MemoryAccounts {
    rows: Mutex<HashMap<String, Account>>,
    next_id: AtomicI32,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    fn get(&self, username: &str) -> Option<Account> {
        self.rows.lock().unwrap().get(username).cloned()
    }

    fn create(&self, username: &str, password_hash: &str, access_level: i8) -> Account {
        let now = Utc::now();
        let account = Account {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            username: username.to_string(),
            password: password_hash.to_string(),
            access_level,
            created_at: now,
            updated_at: now,
        };
        self.rows
            .lock()
            .unwrap()
            .insert(username.to_string(), account.clone());
        account
    }

    /// Seeds a row with a freshly hashed password. Test convenience.
    pub fn insert_with_password(&self, username: &str, password: &str, access_level: i8) {
        let hash = bcrypt::hash(password, 4).expect("bcrypt hash");
        self.create(username, &hash, access_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(password_hash: &str, access_level: i8) -> Account {
        let now = Utc::now();
        Account {
            id: 1,
            username: "alice".into(),
            password: password_hash.into(),
            access_level,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn accepts_matching_password() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let decision = evaluate_login(Some(account(&hash, 0)), "secret", false);
        assert!(matches!(decision, LoginDecision::Accept(a) if a.username == "alice"));
    }

    #[test]
    fn rejects_wrong_password() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let decision = evaluate_login(Some(account(&hash, 0)), "wrong", false);
        assert!(matches!(decision, LoginDecision::WrongPassword));
    }

    #[test]
    fn banned_wins_over_password_check() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let decision = evaluate_login(Some(account(&hash, ACCESS_LEVEL_BANNED)), "secret", true);
        assert!(matches!(decision, LoginDecision::Banned));
    }

    #[test]
    fn unknown_account_creates_when_enabled() {
        let decision = evaluate_login(None, "secret", true);
        match decision {
            LoginDecision::CreateAccount { password_hash } => {
                assert!(bcrypt::verify("secret", &password_hash).unwrap());
            }
            other => panic!("expected CreateAccount, got {:?}", other),
        }
    }

    #[test]
    fn unknown_account_rejected_when_disabled() {
        assert!(matches!(
            evaluate_login(None, "secret", false),
            LoginDecision::Rejected
        ));
    }

    #[test]
    fn garbage_hash_rejects() {
        let decision = evaluate_login(Some(account("not-a-bcrypt-hash", 0)), "secret", false);
        assert!(matches!(decision, LoginDecision::Rejected));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = AccountStore::Memory(MemoryAccounts::new());
        assert!(store.get_by_username("alice").await.unwrap().is_none());
        let created = store.create("alice", "hash", 0).await.unwrap();
        assert_eq!(created.id, 1);
        let found = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.password, "hash");
        let second = store.create("bob", "hash2", 1).await.unwrap();
        assert_eq!(second.id, 2);
    }
}
