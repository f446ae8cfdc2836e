//! Client-facing connection handling: framing with the per-connection
//! crypto state, and the Init → GameGuard → AuthLogin → ServerList /
//! ServerLogin state machine.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::{thread_rng, RngCore};
use rsa::RsaPrivateKey;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::db::{evaluate_login, Account, LoginDecision, ACCESS_LEVEL_PLAYER};
use super::packet::{self, REASON_ACCESS_FAILED, REASON_ACCOUNT_SUSPENDED_CALL, REASON_PASS_WRONG};
use super::LoginState;
use crate::network::crypt::{self, rsa_decrypt_no_padding};
use crate::network::{read_frame, write_frame, ConnError};

/// Per-client connection: socket plus the session id, RSA keypair, and
/// dynamic Blowfish key minted at accept time.
pub struct ClientConn {
    stream: TcpStream,
    peer: SocketAddr,
    session_id: [u8; 16],
    blowfish_key: [u8; 16],
    rsa_key: RsaPrivateKey,
}

impl ClientConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        let mut session_id = [0u8; 16];
        thread_rng().fill_bytes(&mut session_id);
        let mut blowfish_key = [0u8; 16];
        thread_rng().fill_bytes(&mut blowfish_key);
        let rsa_key = crypt::generate_rsa_keypair().context("rsa keypair generation failed")?;
        Ok(Self {
            stream,
            peer,
            session_id,
            blowfish_key,
            rsa_key,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session_id(&self) -> &[u8; 16] {
        &self.session_id
    }

    /// The 32-bit protocol session shown in Init and echoed by AuthGameGuard.
    pub fn session_u32(&self) -> u32 {
        u32::from_le_bytes([
            self.session_id[0],
            self.session_id[1],
            self.session_id[2],
            self.session_id[3],
        ])
    }

    /// The two login halves of the handoff token.
    pub fn login_ok_halves(&self) -> (u32, u32) {
        let id1 = u32::from_le_bytes([
            self.session_id[0],
            self.session_id[1],
            self.session_id[2],
            self.session_id[3],
        ]);
        let id2 = u32::from_le_bytes([
            self.session_id[4],
            self.session_id[5],
            self.session_id[6],
            self.session_id[7],
        ]);
        (id1, id2)
    }

    pub fn rsa_key(&self) -> &RsaPrivateKey {
        &self.rsa_key
    }

    /// Sends Init under the static key + XOR pass. The only packet on the
    /// static path; everything after uses the dynamic key.
    pub async fn send_init(&mut self) -> Result<()> {
        let modulus: [u8; 128] = crypt::modulus_bytes(&self.rsa_key)
            .try_into()
            .map_err(|_| anyhow::anyhow!("modulus is not 128 bytes"))?;
        let body = packet::build_init(&self.session_id, &modulus, &self.blowfish_key);
        let sealed = crypt::seal_static(&body)?;
        write_frame(&mut self.stream, &sealed).await?;
        Ok(())
    }

    /// Reads one packet: frame, dynamic-key Blowfish, then the checksum
    /// (standard layout first, client trailing-padding layout second).
    pub async fn recv(&mut self) -> Result<(u8, Vec<u8>), ConnError> {
        let mut data = read_frame(&mut self.stream).await?;
        if data.is_empty() || data.len() % 8 != 0 {
            return Err(ConnError::InvalidLength(data.len() + 2));
        }
        crypt::blowfish_decrypt(&mut data, &self.blowfish_key)?;
        if crypt::verify_checksum(&data) {
            tracing::trace!("[client] [checksum] variant=standard peer={}", self.peer);
        } else if crypt::verify_checksum_client(&data) {
            tracing::trace!("[client] [checksum] variant=padded peer={}", self.peer);
        } else {
            return Err(ConnError::Checksum);
        }
        let opcode = data[0];
        Ok((opcode, data.split_off(1)))
    }

    pub async fn send(&mut self, body: &[u8]) -> Result<(), ConnError> {
        let sealed = crypt::seal(body, &self.blowfish_key)?;
        write_frame(&mut self.stream, &sealed).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SentInit,
    GgAuthed,
    Authenticated,
    ServerChosen,
}

pub async fn handle_client(
    state: Arc<LoginState>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!("[client] [connect] peer={}", peer);
    match serve(state, stream, peer, shutdown).await {
        Ok(()) => tracing::info!("[client] [disconnect] peer={}", peer),
        Err(err) => tracing::info!("[client] [closed] peer={} reason={:#}", peer, err),
    }
}

async fn serve(
    state: Arc<LoginState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut conn = ClientConn::new(stream, peer)?;
    conn.send_init().await?;

    let mut phase = Phase::SentInit;
    let mut account: Option<Account> = None;
    let mut access_level: i8 = 0;
    let mut last_server: i32 = 0;

    loop {
        let (opcode, data) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = conn.recv() => match received {
                Ok(packet) => packet,
                Err(ConnError::Closed) => return Ok(()),
                Err(err) => return Err(err.into()),
            },
        };
        tracing::debug!(
            "[client] [packet_in] peer={} opcode={:#04X} len={}",
            peer,
            opcode,
            data.len()
        );

        match (phase, opcode) {
            (Phase::SentInit, 0x07) => {
                let gg = packet::parse_auth_game_guard(&data)?;
                if gg.session != conn.session_u32() {
                    tracing::warn!(
                        "[client] [gg_session_mismatch] peer={} expected={:#010X} got={:#010X}",
                        peer,
                        conn.session_u32(),
                        gg.session
                    );
                    conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
                    return Ok(());
                }
                conn.send(&packet::build_gg_auth(conn.session_u32())).await?;
                phase = Phase::GgAuthed;
            }

            (Phase::GgAuthed, 0x00) => {
                if let Some(logged_in) = handle_auth_login(&state, &mut conn, &data).await? {
                    access_level = logged_in.access_level;
                    account = Some(logged_in);
                    phase = Phase::Authenticated;
                }
            }

            (Phase::Authenticated | Phase::ServerChosen, 0x05) => {
                let request = packet::parse_request_server_list(&data)?;
                if request.session_id != conn.session_id()[..8] {
                    tracing::warn!("[client] [session_echo_mismatch] peer={}", peer);
                    conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
                    return Ok(());
                }
                let servers = state.registry.get_visible(access_level);
                let counts = match &account {
                    Some(account) => state.char_counts.get_all(&account.username),
                    None => Vec::new(),
                };
                tracing::info!(
                    "[client] [server_list] peer={} servers={} char_counts={}",
                    peer,
                    servers.len(),
                    counts.len()
                );
                let body = packet::build_server_list(
                    &servers,
                    last_server,
                    peer.ip(),
                    access_level,
                    &counts,
                );
                conn.send(&body).await?;
            }

            (Phase::Authenticated | Phase::ServerChosen, 0x02) => {
                let request = packet::parse_request_server_login(&data)?;
                let Some(account) = &account else {
                    conn.send(&packet::build_play_fail(packet::PLAY_REASON_ACCESS_FAILED))
                        .await?;
                    return Ok(());
                };
                let (login_key1, login_key2) = conn.login_ok_halves();
                let key = state.ledger.mint(
                    &account.username,
                    i32::from(request.server_id),
                    login_key1,
                    login_key2,
                );
                last_server = i32::from(request.server_id);
                tracing::info!(
                    "[client] [server_login] peer={} account={} server_id={}",
                    peer,
                    account.username,
                    request.server_id
                );
                conn.send(&packet::build_play_ok(key.play_key1, key.play_key2)).await?;
                phase = Phase::ServerChosen;
            }

            (_, opcode) => {
                tracing::warn!(
                    "[client] [packet_unexpected] peer={} opcode={:#04X} phase={:?}",
                    peer,
                    opcode,
                    phase
                );
                return Ok(());
            }
        }
    }
}

/// RSA-decrypts the credential block, runs the login decision, and answers
/// the client. `Some(account)` means the login went through.
async fn handle_auth_login(
    state: &Arc<LoginState>,
    conn: &mut ClientConn,
    data: &[u8],
) -> Result<Option<Account>> {
    if data.len() < 128 {
        anyhow::bail!("auth login block too short: {} bytes", data.len());
    }
    let decrypted = rsa_decrypt_no_padding(conn.rsa_key(), &data[..128])?;

    let creds = match packet::extract_credentials(&decrypted) {
        Ok(creds) => creds,
        Err(err) => {
            tracing::warn!("[client] [bad_credentials] peer={} reason={}", conn.peer(), err);
            conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
            return Ok(None);
        }
    };
    tracing::info!("[client] [login_attempt] peer={} account={}", conn.peer(), creds.username);

    let existing = match state.accounts.get_by_username(&creds.username).await {
        Ok(existing) => existing,
        Err(err) => {
            tracing::warn!("[client] [account_lookup_failed] account={} err={:#}", creds.username, err);
            conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
            return Ok(None);
        }
    };

    // bcrypt is deliberately slow; keep it off the reactor.
    let password = creds.password.clone();
    let auto_create = state.config.auto_create_accounts;
    let decision = tokio::task::spawn_blocking(move || evaluate_login(existing, &password, auto_create))
        .await
        .context("login decision task failed")?;

    let account = match decision {
        LoginDecision::Accept(account) => account,
        LoginDecision::Banned => {
            tracing::warn!("[client] [login_banned] account={}", creds.username);
            conn.send(&packet::build_login_fail(REASON_ACCOUNT_SUSPENDED_CALL)).await?;
            return Ok(None);
        }
        LoginDecision::WrongPassword => {
            tracing::info!("[client] [login_wrong_password] account={}", creds.username);
            conn.send(&packet::build_login_fail(REASON_PASS_WRONG)).await?;
            return Ok(None);
        }
        LoginDecision::CreateAccount { password_hash } => {
            match state
                .accounts
                .create(&creds.username, &password_hash, ACCESS_LEVEL_PLAYER)
                .await
            {
                Ok(account) => {
                    tracing::info!("[client] [account_created] account={}", creds.username);
                    account
                }
                Err(err) => {
                    tracing::warn!(
                        "[client] [account_create_failed] account={} err={:#}",
                        creds.username,
                        err
                    );
                    conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
                    return Ok(None);
                }
            }
        }
        LoginDecision::Rejected => {
            conn.send(&packet::build_login_fail(REASON_ACCESS_FAILED)).await?;
            return Ok(None);
        }
    };

    // Warm the character-count cache before the client asks for the list.
    // The replies race the upcoming RequestServerList on purpose.
    state.request_character_counts(&account.username);

    conn.send(&packet::build_login_ok(conn.session_id())).await?;
    tracing::info!("[client] [login_ok] peer={} account={}", conn.peer(), account.username);
    Ok(Some(account))
}
