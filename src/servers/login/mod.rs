//! The login server: shared state, the two accept loops, and periodic
//! maintenance sweeps.

pub mod client;
pub mod db;
pub mod gameserver;
pub mod gs_packet;
pub mod packet;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::charcount::CharacterCountCache;
use crate::config::ServerConfig;
use crate::registry::GameServerRegistry;
use crate::session::SessionLedger;
use db::{AccountStore, MemoryAccounts};
use gameserver::{GameServerBus, GameServerHub, SendPacket};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Process-wide state shared by every connection task.
pub struct LoginState {
    pub config: ServerConfig,
    pub accounts: AccountStore,
    pub ledger: SessionLedger,
    pub registry: GameServerRegistry,
    pub char_counts: CharacterCountCache,
    pub hub: GameServerHub,
}

impl LoginState {
    pub fn new(config: ServerConfig, pool: Option<PgPool>) -> Arc<Self> {
        let accounts = match pool {
            Some(pool) => AccountStore::Postgres(pool),
            None => AccountStore::Memory(MemoryAccounts::new()),
        };
        Arc::new(Self {
            ledger: SessionLedger::new(config.session_ttl()),
            char_counts: CharacterCountCache::new(config.character_cache_ttl()),
            registry: GameServerRegistry::new(),
            hub: GameServerHub::new(),
            accounts,
            config,
        })
    }

    /// In-memory state with default config, for tests.
    pub fn test_only() -> Arc<Self> {
        Self::new(ServerConfig::default(), None)
    }

    /// Fans RequestCharacters out to every online game server. Fire and
    /// forget; the replies populate the cache whenever they arrive.
    pub fn request_character_counts(&self, account: &str) {
        let body = gs_packet::build_request_characters(account);
        for server in self.registry.get_all() {
            if server.is_online() {
                self.hub.publish(SendPacket {
                    server_id: server.id,
                    data: body.clone(),
                });
                tracing::debug!(
                    "[login] [request_characters] account={} server_id={}",
                    account,
                    server.id
                );
            }
        }
    }
}

/// Binds both listeners from the config and serves until shutdown flips.
pub async fn bind_and_run(state: Arc<LoginState>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let client_addr = format!("{}:{}", state.config.listen_ip, state.config.client_port);
    let client_listener = TcpListener::bind(&client_addr)
        .await
        .with_context(|| format!("cannot bind client listener on {}", client_addr))?;

    let gs_addr = format!("{}:{}", state.config.listen_ip, state.config.gameserver_port);
    let gs_listener = TcpListener::bind(&gs_addr)
        .await
        .with_context(|| format!("cannot bind gameserver listener on {}", gs_addr))?;

    run(state, client_listener, gs_listener, shutdown).await
}

/// Accepts on both listeners, one task per connection, until shutdown.
pub async fn run(
    state: Arc<LoginState>,
    client_listener: TcpListener,
    gs_listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(
        "[login] [ready] clients={} gameservers={}",
        client_listener.local_addr()?,
        gs_listener.local_addr()?
    );

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("[login] [shutdown] closing listeners");
                return Ok(());
            }

            accepted = client_listener.accept() => {
                let (stream, peer) = accepted.context("client accept failed")?;
                tokio::spawn(client::handle_client(
                    Arc::clone(&state),
                    stream,
                    peer,
                    shutdown.clone(),
                ));
            }

            accepted = gs_listener.accept() => {
                let (stream, peer) = accepted.context("gameserver accept failed")?;
                tokio::spawn(gameserver::handle_gameserver(
                    Arc::clone(&state),
                    stream,
                    peer,
                    shutdown.clone(),
                ));
            }

            _ = sweep.tick() => {
                state.ledger.cleanup_expired();
                state.char_counts.cleanup_expired();
            }
        }
    }
}
