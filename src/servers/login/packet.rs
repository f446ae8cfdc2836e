//! Client-facing packet builders and parsers.
//!
//! Layouts follow the historical protocol byte for byte; the constants in
//! the Init body (protocol revision, GameGuard words) are magic the client
//! checks verbatim.

use std::net::{IpAddr, Ipv4Addr};

use crate::network::codec::{CodecError, PacketReader, PacketWriter};
use crate::network::crypt::scramble_modulus;
use crate::registry::GameServerInfo;

// LoginFail reasons (opcode 0x01). Each maps to a distinct client dialog.
pub const REASON_SYSTEM_ERROR: u32 = 0x01;
pub const REASON_PASS_WRONG: u32 = 0x02;
pub const REASON_ACCESS_FAILED_TRY_LATER: u32 = 0x04;
pub const REASON_ACCOUNT_IN_USE: u32 = 0x07;
pub const REASON_SERVER_OVERLOADED: u32 = 0x0F;
pub const REASON_MAINTENANCE: u32 = 0x10;
pub const REASON_ACCESS_FAILED: u32 = 0x15;
pub const REASON_ACCOUNT_SUSPENDED_CALL: u32 = 0x28;

// PlayFail reasons (opcode 0x06).
pub const PLAY_REASON_ACCESS_FAILED: u32 = 0x04;
pub const PLAY_REASON_SERVER_OVERLOADED: u32 = 0x0F;
pub const PLAY_REASON_TEMP_BAN: u32 = 0x10;

/// Protocol revision advertised in Init.
const PROTOCOL_REVISION: u32 = 0x0000_c621;

/// GameGuard words the client echoes checks against, verbatim.
const GG_CONSTANTS: [u32; 4] = [0x29DD_954E, 0x77C3_9CFC, 0x97AD_B620, 0x07BD_E0F7];

/// Init (0x00): session word, protocol revision, scrambled RSA modulus,
/// GameGuard constants, the dynamic Blowfish key, and a null terminator.
pub fn build_init(session_id: &[u8; 16], modulus: &[u8; 128], blowfish_key: &[u8; 16]) -> Vec<u8> {
    let mut scrambled = *modulus;
    scramble_modulus(&mut scrambled);

    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_bytes(&session_id[..4]);
    w.write_u32(PROTOCOL_REVISION);
    w.write_bytes(&scrambled);
    for word in GG_CONSTANTS {
        w.write_u32(word);
    }
    w.write_bytes(blowfish_key);
    w.write_u8(0x00);
    w.into_vec()
}

/// LoginFail (0x01).
pub fn build_login_fail(reason: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x01);
    w.write_u32(reason);
    w.into_vec()
}

/// LoginOk (0x03): the two session halves plus a fixed tail the client
/// expects.
pub fn build_login_ok(session_id: &[u8; 16]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x03);
    w.write_bytes(&session_id[..4]);
    w.write_bytes(&session_id[4..8]);
    w.write_u32(0x00);
    w.write_u32(0x00);
    w.write_u32(0x0000_03ea);
    w.write_u32(0x00);
    w.write_u32(0x00);
    w.write_u32(0x00);
    w.write_bytes(&[0u8; 16]);
    w.into_vec()
}

/// PlayOk (0x07).
pub fn build_play_ok(play_key1: u32, play_key2: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x07);
    w.write_u32(play_key1);
    w.write_u32(play_key2);
    w.into_vec()
}

/// PlayFail (0x06).
pub fn build_play_fail(reason: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x06);
    w.write_u32(reason);
    w.into_vec()
}

/// GGAuth (0x0B): echoes the session word, then four zero words.
pub fn build_gg_auth(session: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x0B);
    w.write_u32(session);
    for _ in 0..4 {
        w.write_u32(0);
    }
    w.into_vec()
}

/// ServerList (0x04). The advertised IPv4 per server comes from the subnet
/// table; unresolvable entries fall back to loopback. The trailer carries
/// cached character counts for the listed servers.
pub fn build_server_list(
    servers: &[GameServerInfo],
    last_server: i32,
    client_ip: IpAddr,
    access_level: i8,
    char_counts: &[(i32, u8)],
) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x04);
    w.write_u8(servers.len() as u8);
    w.write_u8(last_server as u8);

    for server in servers {
        w.write_u8(server.id as u8);
        let ip = advertised_ipv4(server, client_ip);
        w.write_bytes(&ip.octets());
        w.write_u32(u32::from(server.port));
        w.write_u8(server.age_limit);
        w.write_u8(u8::from(server.pvp));
        w.write_u16(server.current_players);
        w.write_u16(server.max_players);
        w.write_u8(u8::from(server.is_online() && server.is_visible(access_level)));
        w.write_u32(server.server_type);
        w.write_u8(u8::from(server.show_brackets));
    }

    w.write_u16(0x0000);

    let listed: Vec<(i32, u8)> = servers
        .iter()
        .filter_map(|s| {
            char_counts
                .iter()
                .find(|(id, _)| *id == s.id)
                .map(|(_, count)| (s.id, *count))
        })
        .collect();
    w.write_u8(listed.len() as u8);
    for (id, count) in listed {
        w.write_u8(id as u8);
        w.write_u8(count);
    }

    w.into_vec()
}

fn advertised_ipv4(server: &GameServerInfo, client_ip: IpAddr) -> Ipv4Addr {
    server
        .resolve_address(client_ip)
        .and_then(|ip| ip.parse().ok())
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

/// AuthGameGuard (0x07 in): the session word plus four opaque words.
#[derive(Debug)]
pub struct AuthGameGuard {
    pub session: u32,
    pub data: [u32; 4],
}

pub fn parse_auth_game_guard(data: &[u8]) -> Result<AuthGameGuard, CodecError> {
    let mut r = PacketReader::new(data);
    let session = r.read_u32()?;
    let mut words = [0u32; 4];
    for word in &mut words {
        *word = r.read_u32()?;
    }
    Ok(AuthGameGuard {
        session,
        data: words,
    })
}

/// RequestServerList (0x05 in): the 8-byte session echo.
#[derive(Debug)]
pub struct RequestServerList {
    pub session_id: [u8; 8],
}

pub fn parse_request_server_list(data: &[u8]) -> Result<RequestServerList, CodecError> {
    let mut r = PacketReader::new(data);
    let mut session_id = [0u8; 8];
    session_id.copy_from_slice(r.read_bytes(8)?);
    Ok(RequestServerList { session_id })
}

/// RequestServerLogin (0x02 in): session echo plus the chosen server.
#[derive(Debug)]
pub struct RequestServerLogin {
    pub session_id: [u8; 8],
    pub server_id: u8,
}

pub fn parse_request_server_login(data: &[u8]) -> Result<RequestServerLogin, CodecError> {
    let mut r = PacketReader::new(data);
    let mut session_id = [0u8; 8];
    session_id.copy_from_slice(r.read_bytes(8)?);
    let server_id = r.read_u8()?;
    Ok(RequestServerLogin {
        session_id,
        server_id,
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("decrypted block too short")]
    BlockTooShort,

    #[error("username not plausible")]
    BadUsername,

    #[error("password not plausible")]
    BadPassword,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Pulls the credentials out of the 128-byte RSA plaintext: username at
/// 0x5E (14 bytes), password at 0x6C (16 bytes), both trimmed of NUL and
/// whitespace. The username is lowercased.
pub fn extract_credentials(block: &[u8]) -> Result<Credentials, CredentialError> {
    if block.len() < 128 {
        return Err(CredentialError::BlockTooShort);
    }
    let username = trim_ascii(&block[0x5E..0x5E + 14]).to_ascii_lowercase();
    let password = trim_ascii(&block[0x6C..0x6C + 16]);

    if !is_plausible_username(&username) {
        return Err(CredentialError::BadUsername);
    }
    if !is_plausible_password(&password) {
        return Err(CredentialError::BadPassword);
    }
    Ok(Credentials { username, password })
}

fn trim_ascii(raw: &[u8]) -> String {
    let trimmed: Vec<u8> = raw
        .iter()
        .copied()
        .skip_while(|b| matches!(b, 0 | b' ' | b'\t' | b'\r' | b'\n'))
        .collect();
    let end = trimmed
        .iter()
        .rposition(|b| !matches!(b, 0 | b' ' | b'\t' | b'\r' | b'\n'))
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&trimmed[..end]).into_owned()
}

pub fn is_plausible_username(s: &str) -> bool {
    if s.is_empty() || s.len() > 14 {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn is_plausible_password(s: &str) -> bool {
    if s.len() < 3 || s.len() > 16 {
        return false;
    }
    s.chars().all(|c| ('\x20'..'\x7f').contains(&c))
}
