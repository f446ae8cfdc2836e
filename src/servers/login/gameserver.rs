//! Game-server-facing connection handling: the InitLS → BlowFishKey →
//! AuthRequest handshake, the steady-state opcode loop, and the packet hub
//! that lets the login flow push packets to registered game servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use rsa::RsaPrivateKey;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use super::gs_packet::{self, server_name};
use super::LoginState;
use crate::network::crypt::{self, rsa_decrypt_no_padding, STATIC_GAMESERVER_KEY};
use crate::network::{read_frame, write_frame, ConnError};
use crate::registry::GameServerInfo;

/// One packet bound for a registered game server.
#[derive(Debug, Clone)]
pub struct SendPacket {
    pub server_id: i32,
    pub data: Vec<u8>,
}

/// The dispatch seam between the login flow and the game-server transport.
/// Publication is fire and forget: packets for unknown or saturated peers
/// are dropped.
pub trait GameServerBus: Send + Sync {
    fn publish(&self, packet: SendPacket);
}

/// Routes published packets to the writer task of the matching connection.
#[derive(Default)]
pub struct GameServerHub {
    senders: RwLock<HashMap<i32, mpsc::Sender<Vec<u8>>>>,
}

impl GameServerHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, server_id: i32, tx: mpsc::Sender<Vec<u8>>) {
        self.senders.write().unwrap().insert(server_id, tx);
    }

    pub(crate) fn unregister(&self, server_id: i32) {
        self.senders.write().unwrap().remove(&server_id);
    }

    pub fn connected_ids(&self) -> Vec<i32> {
        self.senders.read().unwrap().keys().copied().collect()
    }
}

impl GameServerBus for GameServerHub {
    fn publish(&self, packet: SendPacket) {
        let tx = self
            .senders
            .read()
            .unwrap()
            .get(&packet.server_id)
            .cloned();
        match tx {
            Some(tx) => {
                if tx.try_send(packet.data).is_err() {
                    tracing::debug!("[gs] [publish_drop] server_id={} queue_full_or_closed", packet.server_id);
                }
            }
            None => {
                tracing::debug!("[gs] [publish_drop] server_id={} not_connected", packet.server_id);
            }
        }
    }
}

/// Pre-auth connection state: both socket halves plus the RSA keypair and
/// the Blowfish key in use (static until BlowFishKey lands).
pub struct GameServerConn {
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    rsa_key: RsaPrivateKey,
    dynamic_key: Option<Vec<u8>>,
}

impl GameServerConn {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let (read, write) = stream.into_split();
        let rsa_key = crypt::generate_rsa_keypair().context("rsa keypair generation failed")?;
        Ok(Self {
            read,
            write,
            rsa_key,
            dynamic_key: None,
        })
    }

    fn key(&self) -> &[u8] {
        self.dynamic_key
            .as_deref()
            .unwrap_or(&STATIC_GAMESERVER_KEY)
    }

    pub fn set_dynamic_key(&mut self, key: Vec<u8>) {
        self.dynamic_key = Some(key);
    }

    pub fn rsa_key(&self) -> &RsaPrivateKey {
        &self.rsa_key
    }

    pub async fn send_init_ls(&mut self) -> Result<(), ConnError> {
        let modulus = crypt::modulus_bytes(&self.rsa_key);
        let body = gs_packet::build_init_ls(&modulus);
        self.send(&body).await
    }

    pub async fn recv(&mut self) -> Result<(u8, Vec<u8>), ConnError> {
        let mut data = read_frame(&mut self.read).await?;
        if data.is_empty() || data.len() % 8 != 0 {
            return Err(ConnError::InvalidLength(data.len() + 2));
        }
        crypt::blowfish_decrypt(&mut data, self.key())?;
        if !crypt::verify_checksum(&data) {
            return Err(ConnError::Checksum);
        }
        let opcode = data[0];
        Ok((opcode, data.split_off(1)))
    }

    pub async fn send(&mut self, body: &[u8]) -> Result<(), ConnError> {
        let sealed = crypt::seal(body, self.key())?;
        write_frame(&mut self.write, &sealed).await
    }

    /// Splits the authenticated connection into a read loop half and a
    /// writer half that owns the outbound crypto state.
    fn split(self) -> (GameServerReader, GameServerWriter) {
        let key = self
            .dynamic_key
            .clone()
            .unwrap_or_else(|| STATIC_GAMESERVER_KEY.to_vec());
        (
            GameServerReader {
                read: self.read,
                key: key.clone(),
            },
            GameServerWriter {
                write: self.write,
                key,
            },
        )
    }
}

pub struct GameServerReader {
    read: OwnedReadHalf,
    key: Vec<u8>,
}

impl GameServerReader {
    pub async fn recv(&mut self) -> Result<(u8, Vec<u8>), ConnError> {
        let mut data = read_frame(&mut self.read).await?;
        if data.is_empty() || data.len() % 8 != 0 {
            return Err(ConnError::InvalidLength(data.len() + 2));
        }
        crypt::blowfish_decrypt(&mut data, &self.key)?;
        if !crypt::verify_checksum(&data) {
            return Err(ConnError::Checksum);
        }
        let opcode = data[0];
        Ok((opcode, data.split_off(1)))
    }
}

pub struct GameServerWriter {
    write: OwnedWriteHalf,
    key: Vec<u8>,
}

impl GameServerWriter {
    pub async fn send(&mut self, body: &[u8]) -> Result<(), ConnError> {
        let sealed = crypt::seal(body, &self.key)?;
        write_frame(&mut self.write, &sealed).await
    }
}

pub async fn handle_gameserver(
    state: Arc<LoginState>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!("[gs] [connect] peer={}", peer);
    match serve(state, stream, peer, shutdown).await {
        Ok(()) => tracing::info!("[gs] [disconnect] peer={}", peer),
        Err(err) => tracing::info!("[gs] [closed] peer={} reason={:#}", peer, err),
    }
}

async fn serve(
    state: Arc<LoginState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut conn = GameServerConn::new(stream)?;
    conn.send_init_ls().await?;

    // The only packet accepted on the static key is BlowFishKey.
    let (opcode, data) = conn.recv().await?;
    if opcode != 0x00 {
        bail!("expected BlowFishKey, got opcode {:#04X}", opcode);
    }
    let cipher = gs_packet::parse_blow_fish_key(&data)?;
    let decrypted = rsa_decrypt_no_padding(conn.rsa_key(), &cipher)?;
    let key = gs_packet::extract_blowfish_key(&decrypted)
        .context("blowfish key payload was all zeros")?;
    tracing::info!("[gs] [blowfish_key] peer={} key_len={}", peer, key.len());
    conn.set_dynamic_key(key);

    // Next must be AuthRequest.
    let (opcode, data) = conn.recv().await?;
    if opcode != 0x01 {
        bail!("expected AuthRequest, got opcode {:#04X}", opcode);
    }
    let request = gs_packet::parse_auth_request(&data)?;
    let server_id = i32::from(request.desired_id);
    let name = server_name(server_id);
    tracing::info!(
        "[gs] [auth_request] peer={} server_id={} port={} max_players={} hex_id={}",
        peer,
        server_id,
        request.port,
        request.max_players,
        hex::encode(&request.hex_id)
    );

    let mut info = GameServerInfo::new(server_id, name.clone(), request.port);
    info.max_players = request.max_players.min(u32::from(u16::MAX)) as u16;
    for pair in request.hosts.chunks_exact(2) {
        let (subnet, advertised_ip) = (&pair[0], &pair[1]);
        if info.add_address(subnet, advertised_ip) {
            tracing::debug!(
                "[gs] [address] server_id={} subnet={} ip={}",
                server_id,
                subnet,
                advertised_ip
            );
        } else {
            tracing::warn!(
                "[gs] [address_skipped] server_id={} subnet={} ip={}",
                server_id,
                subnet,
                advertised_ip
            );
        }
    }
    state.registry.register(info).context("gameserver registration failed")?;
    conn.send(&gs_packet::build_auth_response(server_id, &name)).await?;
    tracing::info!("[gs] [auth_ok] peer={} server_id={} name={}", peer, server_id, name);

    // Authenticated: hand the write half to its own task and route all
    // outbound traffic (responses included) through one channel.
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    state.hub.register(server_id, tx.clone());
    let (mut reader, mut writer) = conn.split();

    let writer_task = tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if let Err(err) = writer.send(&body).await {
                tracing::warn!("[gs] [writer_failed] err={}", err);
                break;
            }
        }
    });

    let result = read_loop(&state, &mut reader, server_id, &tx, &mut shutdown).await;

    state.hub.unregister(server_id);
    state
        .registry
        .update_status(server_id, crate::registry::ServerStatus::Down);
    state.char_counts.clear_server(server_id);
    writer_task.abort();
    tracing::info!(
        "[gs] [deregistered] server_id={} status={}",
        server_id,
        crate::registry::ServerStatus::Down
    );
    result
}

async fn read_loop(
    state: &Arc<LoginState>,
    reader: &mut GameServerReader,
    server_id: i32,
    tx: &mpsc::Sender<Vec<u8>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let (opcode, data) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = reader.recv() => match received {
                Ok(packet) => packet,
                Err(ConnError::Closed) => return Ok(()),
                Err(err) => return Err(err.into()),
            },
        };

        match opcode {
            // PlayerInGame: reserved for online-list tracking.
            0x02 => {
                let accounts = gs_packet::parse_player_in_game(&data)?;
                tracing::info!(
                    "[gs] [player_in_game] server_id={} count={} accounts={:?}",
                    server_id,
                    accounts.len(),
                    accounts
                );
            }

            0x03 => {
                let account = gs_packet::parse_player_logout(&data)?;
                tracing::info!("[gs] [player_logout] server_id={} account={}", server_id, account);
                // A lingering key means the player never completed the
                // handoff; drop it either way.
                state.ledger.consume(&account);
            }

            0x05 => {
                let request = gs_packet::parse_player_auth_request(&data)?;
                let valid = state.ledger.validate(&request.account, &request.key);
                if valid {
                    state.ledger.consume(&request.account);
                }
                tracing::info!(
                    "[gs] [player_auth] server_id={} account={} success={}",
                    server_id,
                    request.account,
                    valid
                );
                let response = gs_packet::build_player_auth_response(&request.account, valid);
                if tx.send(response).await.is_err() {
                    bail!("writer task gone");
                }
            }

            // ServerStatus payload layout is not pinned down; keep it opaque.
            0x06 => {
                tracing::info!(
                    "[gs] [server_status] server_id={} len={} data={}",
                    server_id,
                    data.len(),
                    hex::encode(&data[..data.len().min(16)])
                );
            }

            0x07 => {
                let tracert = gs_packet::parse_player_tracert(&data)?;
                tracing::info!(
                    "[gs] [player_tracert] server_id={} account={} pc_ip={} hops={:?}",
                    server_id,
                    tracert.account,
                    tracert.pc_ip,
                    tracert.hops
                );
            }

            0x08 => {
                let reply = gs_packet::parse_reply_characters(&data)?;
                if !reply.deletion_times.is_empty() {
                    tracing::debug!(
                        "[gs] [pending_deletions] account={} times={:?}",
                        reply.account,
                        reply.deletion_times
                    );
                }
                state
                    .char_counts
                    .set(&reply.account, server_id, reply.char_count);
                tracing::info!(
                    "[gs] [reply_characters] server_id={} account={} count={}",
                    server_id,
                    reply.account,
                    reply.char_count
                );
            }

            other => {
                bail!("unexpected opcode {:#04X} from authenticated gameserver", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_routes_to_registered_sender() {
        let hub = GameServerHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register(1, tx);

        hub.publish(SendPacket {
            server_id: 1,
            data: vec![0x05, 1, 2],
        });
        assert_eq!(rx.try_recv().unwrap(), vec![0x05, 1, 2]);
    }

    #[test]
    fn hub_drops_for_unknown_server() {
        let hub = GameServerHub::new();
        // Nothing registered; publish must not panic.
        hub.publish(SendPacket {
            server_id: 9,
            data: vec![1],
        });
        assert!(hub.connected_ids().is_empty());
    }

    #[test]
    fn hub_drops_when_queue_full() {
        let hub = GameServerHub::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.register(1, tx);
        hub.publish(SendPacket { server_id: 1, data: vec![1] });
        hub.publish(SendPacket { server_id: 1, data: vec![2] });
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn hub_unregister() {
        let hub = GameServerHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.register(3, tx);
        assert_eq!(hub.connected_ids(), vec![3]);
        hub.unregister(3);
        assert!(hub.connected_ids().is_empty());
    }
}
