//! Game-server-facing packet builders and parsers.

use crate::network::codec::{CodecError, PacketReader, PacketWriter};
use crate::session::SessionKey;

/// InitLS (0x00 out): length-prefixed RSA public modulus. A leading zero is
/// added when the high bit is set so peers parsing it as a signed big
/// integer keep it positive.
pub fn build_init_ls(modulus: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(modulus.len() + 1);
    if modulus.first().is_some_and(|b| b & 0x80 != 0) {
        key.push(0x00);
    }
    key.extend_from_slice(modulus);

    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_u32(key.len() as u32);
    w.write_bytes(&key);
    w.into_vec()
}

/// AuthResponse (0x02 out): the id the server was granted plus its name.
pub fn build_auth_response(server_id: i32, name: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_u8(server_id as u8);
    w.write_string(name);
    w.into_vec()
}

/// PlayerAuthResponse (0x03 out).
pub fn build_player_auth_response(account: &str, success: bool) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x03);
    w.write_string(account);
    w.write_u8(u8::from(success));
    w.into_vec()
}

/// RequestCharacters (0x05 out): asks a game server for an account's
/// character count.
pub fn build_request_characters(account: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x05);
    w.write_string(account);
    w.into_vec()
}

/// BlowFishKey (0x00 in): length-prefixed RSA ciphertext carrying the
/// session's dynamic key.
pub fn parse_blow_fish_key(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut r = PacketReader::new(data);
    let size = r.read_u32()? as usize;
    Ok(r.read_bytes(size)?.to_vec())
}

/// Extracts the dynamic Blowfish key from the RSA plaintext: skip the
/// leading zeros, then take 40 bytes, falling back to 22, falling back to
/// whatever remains. The 40/22 split mirrors the key lengths historical
/// game servers generate.
pub fn extract_blowfish_key(decrypted: &[u8]) -> Option<Vec<u8>> {
    let start = decrypted.iter().position(|&b| b != 0)?;
    let tail = &decrypted[start..];
    if tail.len() >= 40 {
        return Some(tail[..40].to_vec());
    }
    if tail.len() >= 22 {
        return Some(tail[..22].to_vec());
    }
    Some(tail.to_vec())
}

/// AuthRequest (0x01 in). `hosts` holds (subnet, advertised ip) pairs
/// flattened in order.
#[derive(Debug)]
pub struct AuthRequest {
    pub version: u8,
    pub desired_id: u8,
    pub accept_alternate: bool,
    pub reserve_host: bool,
    pub port: u16,
    pub max_players: u32,
    pub hex_id: Vec<u8>,
    pub hosts: Vec<String>,
}

pub fn parse_auth_request(data: &[u8]) -> Result<AuthRequest, CodecError> {
    let mut r = PacketReader::new(data);
    let version = r.read_u8()?;
    let desired_id = r.read_u8()?;
    let accept_alternate = r.read_u8()? != 0;
    let reserve_host = r.read_u8()? != 0;
    let port = r.read_u16()?;
    let max_players = r.read_u32()?;
    let hex_id_len = r.read_u32()? as usize;
    let hex_id = r.read_bytes(hex_id_len)?.to_vec();
    let host_count = r.read_u32()? as usize;
    let mut hosts = Vec::with_capacity(host_count.min(64));
    for _ in 0..host_count {
        hosts.push(r.read_string()?);
    }
    Ok(AuthRequest {
        version,
        desired_id,
        accept_alternate,
        reserve_host,
        port,
        max_players,
        hex_id,
        hosts,
    })
}

/// PlayerInGame (0x02 in): u16 count followed by that many account names.
pub fn parse_player_in_game(data: &[u8]) -> Result<Vec<String>, CodecError> {
    let mut r = PacketReader::new(data);
    let count = r.read_u16()? as usize;
    let mut accounts = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        accounts.push(r.read_string()?);
    }
    Ok(accounts)
}

/// PlayerLogout (0x03 in): the account name.
pub fn parse_player_logout(data: &[u8]) -> Result<String, CodecError> {
    PacketReader::new(data).read_string()
}

/// PlayerAuthRequest (0x05 in): account plus the candidate 4-tuple. Play
/// halves come first on the wire.
#[derive(Debug)]
pub struct PlayerAuthRequest {
    pub account: String,
    pub key: SessionKey,
}

pub fn parse_player_auth_request(data: &[u8]) -> Result<PlayerAuthRequest, CodecError> {
    let mut r = PacketReader::new(data);
    let account = r.read_string()?;
    let play_key1 = r.read_u32()?;
    let play_key2 = r.read_u32()?;
    let login_key1 = r.read_u32()?;
    let login_key2 = r.read_u32()?;
    Ok(PlayerAuthRequest {
        account,
        key: SessionKey {
            login_key1,
            login_key2,
            play_key1,
            play_key2,
        },
    })
}

/// PlayerTracert (0x07 in): account, client IP, four hops.
#[derive(Debug)]
pub struct PlayerTracert {
    pub account: String,
    pub pc_ip: String,
    pub hops: [String; 4],
}

pub fn parse_player_tracert(data: &[u8]) -> Result<PlayerTracert, CodecError> {
    let mut r = PacketReader::new(data);
    let account = r.read_string()?;
    let pc_ip = r.read_string()?;
    let hops = [
        r.read_string()?,
        r.read_string()?,
        r.read_string()?,
        r.read_string()?,
    ];
    Ok(PlayerTracert {
        account,
        pc_ip,
        hops,
    })
}

/// ReplyCharacters (0x08 in): account, character count, and timestamps of
/// characters pending deletion.
#[derive(Debug)]
pub struct ReplyCharacters {
    pub account: String,
    pub char_count: u8,
    pub deletion_times: Vec<i64>,
}

pub fn parse_reply_characters(data: &[u8]) -> Result<ReplyCharacters, CodecError> {
    let mut r = PacketReader::new(data);
    let account = r.read_string()?;
    let char_count = r.read_u8()?;
    let deletion_count = r.read_u8()? as usize;
    let mut deletion_times = Vec::with_capacity(deletion_count.min(16));
    for _ in 0..deletion_count {
        deletion_times.push(r.read_u64()? as i64);
    }
    Ok(ReplyCharacters {
        account,
        char_count,
        deletion_times,
    })
}

/// Canonical server names keyed by id; unknown ids fall back to
/// `Server_<id>`.
pub fn server_name(id: i32) -> String {
    match id {
        1 => "Bartz",
        2 => "Sieghardt",
        3 => "Kain",
        4 => "Lionna",
        5 => "Erica",
        6 => "Gustin",
        7 => "Devianne",
        8 => "Hindemith",
        9 => "Teon (EURO)",
        10 => "Franz (EURO)",
        11 => "Luna (EURO)",
        12 => "Sayha",
        13 => "Aria",
        14 => "Phoenix",
        15 => "Chronos",
        16 => "Naia (EURO)",
        17 => "Elhwynna",
        _ => return format!("Server_{}", id),
    }
    .to_string()
}
