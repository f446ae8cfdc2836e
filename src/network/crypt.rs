//! Wire-level cryptography for both login protocols.
//!
//! Implements the historical scheme as-is: XOR-fold checksums, Blowfish-ECB
//! framing, the XOR pass layered under the first client packet, the RSA
//! modulus scramble, and raw (no-padding) RSA decryption. None of this is
//! meant to be hardened.

use blowfish::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::Blowfish;
use rand::{thread_rng, Rng};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

/// Static Blowfish key for the first outbound client packet (Init).
pub const STATIC_CLIENT_KEY: [u8; 16] = [
    0x6b, 0x60, 0xcb, 0x5b, 0x82, 0xce, 0x90, 0xb1, //
    0xcc, 0x2b, 0x6c, 0x55, 0x6c, 0x6c, 0x6c, 0x6c,
];

/// Static Blowfish key for game-server traffic until BlowFishKey completes.
/// ASCII `_;v.]05-31!|+-%xT!^[$\0`.
pub const STATIC_GAMESERVER_KEY: [u8; 22] = [
    0x5f, 0x3b, 0x76, 0x2e, 0x5d, 0x30, 0x35, 0x2d, //
    0x33, 0x31, 0x21, 0x7c, 0x2b, 0x2d, 0x25, 0x78, //
    0x54, 0x21, 0x5e, 0x5b, 0x24, 0x00,
];

#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error("invalid blowfish key length: {0} bytes")]
    InvalidKey(usize),

    #[error("data length {0} is not a multiple of the blowfish block size")]
    BlockAlignment(usize),

    #[error("rsa cipher length {got} does not match key size {expected}")]
    RsaSize { got: usize, expected: usize },
}

fn read_u32le(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn write_u32le(data: &mut [u8], pos: usize, value: u32) {
    data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

/// XOR-folds every 32-bit word except the last and stores the result in the
/// last word. The buffer must be a multiple of 4 and longer than 4 bytes.
pub fn append_checksum(data: &mut [u8]) {
    debug_assert!(data.len() % 4 == 0 && data.len() > 4);
    let count = data.len() - 4;
    let mut chksum = 0u32;
    let mut pos = 0;
    while pos < count {
        chksum ^= read_u32le(data, pos);
        pos += 4;
    }
    write_u32le(data, count, chksum);
}

/// Verifies the XOR-fold checksum in the last word of the buffer.
pub fn verify_checksum(data: &[u8]) -> bool {
    let size = data.len();
    if (size & 3) != 0 || size <= 4 {
        return false;
    }
    let count = size - 4;
    let mut chksum = 0u32;
    let mut pos = 0;
    while pos < count {
        chksum ^= read_u32le(data, pos);
        pos += 4;
    }
    read_u32le(data, count) == chksum
}

/// Client-origin packets end in `[checksum(4) || padding(12)]`: the checksum
/// covers the prefix and sits 16 bytes before the end.
pub fn verify_checksum_client(data: &[u8]) -> bool {
    let size = data.len();
    if (size & 3) != 0 || size < 16 {
        return false;
    }
    let count = size - 16;
    let mut chksum = 0u32;
    let mut pos = 0;
    while pos < count {
        chksum ^= read_u32le(data, pos);
        pos += 4;
    }
    read_u32le(data, count) == chksum
}

fn blowfish_cipher(key: &[u8]) -> Result<Blowfish, CryptError> {
    Blowfish::new_from_slice(key).map_err(|_| CryptError::InvalidKey(key.len()))
}

/// Blowfish-ECB encrypt in place. Data must be block aligned.
pub fn blowfish_encrypt(data: &mut [u8], key: &[u8]) -> Result<(), CryptError> {
    if data.len() % 8 != 0 {
        return Err(CryptError::BlockAlignment(data.len()));
    }
    let cipher = blowfish_cipher(key)?;
    for chunk in data.chunks_exact_mut(8) {
        cipher.encrypt_block(Block::<Blowfish>::from_mut_slice(chunk));
    }
    Ok(())
}

/// Blowfish-ECB decrypt in place. Data must be block aligned.
pub fn blowfish_decrypt(data: &mut [u8], key: &[u8]) -> Result<(), CryptError> {
    if data.len() % 8 != 0 {
        return Err(CryptError::BlockAlignment(data.len()));
    }
    let cipher = blowfish_cipher(key)?;
    for chunk in data.chunks_exact_mut(8) {
        cipher.decrypt_block(Block::<Blowfish>::from_mut_slice(chunk));
    }
    Ok(())
}

/// Additive XOR stream applied to the first client packet before the static
/// Blowfish layer. Words from offset 4 up to 8 bytes before the end are
/// folded with a running key; the final key lands in the 4 bytes before the
/// last word.
pub fn enc_xor_pass(data: &mut [u8], key: u32) {
    debug_assert!(data.len() >= 16 && data.len() % 4 == 0);
    let stop = data.len() - 8;
    let mut pos = 4;
    let mut ecx = key;
    while pos < stop {
        let mut edx = read_u32le(data, pos);
        ecx = ecx.wrapping_add(edx);
        edx ^= ecx;
        write_u32le(data, pos, edx);
        pos += 4;
    }
    write_u32le(data, pos, ecx);
}

/// Reverses [`enc_xor_pass`] using the key stored in the buffer, then zeroes
/// the key slot.
pub fn dec_xor_pass(data: &mut [u8]) {
    if data.len() <= 8 {
        return;
    }
    let stop = data.len() - 8;
    let mut key = read_u32le(data, stop);
    let mut pos = stop;
    while pos > 4 {
        pos -= 4;
        let plain = read_u32le(data, pos) ^ key;
        key = key.wrapping_sub(plain);
        write_u32le(data, pos, plain);
    }
    write_u32le(data, stop, 0);
}

/// Seals a packet body for the regular path: checksum slot, zero padding to
/// the block size, checksum, Blowfish with the connection key.
pub fn seal(body: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptError> {
    let mut data = body.to_vec();
    data.extend_from_slice(&[0u8; 4]);
    while data.len() % 8 != 0 {
        data.push(0);
    }
    append_checksum(&mut data);
    blowfish_encrypt(&mut data, key)?;
    Ok(data)
}

/// Seals the Init packet: checksum and XOR-key slots, padding, checksum,
/// XOR pass with a fresh random key, then the static client Blowfish key.
pub fn seal_static(body: &[u8]) -> Result<Vec<u8>, CryptError> {
    let mut data = body.to_vec();
    data.extend_from_slice(&[0u8; 8]);
    while data.len() % 8 != 0 {
        data.push(0);
    }
    append_checksum(&mut data);
    enc_xor_pass(&mut data, thread_rng().gen());
    blowfish_encrypt(&mut data, &STATIC_CLIENT_KEY)?;
    Ok(data)
}

/// The scramble applied to the 128-byte public modulus before it goes on the
/// wire inside Init. Four self-inverse steps; [`unscramble_modulus`] runs
/// them in reverse order.
pub fn scramble_modulus(modulus: &mut [u8; 128]) {
    for i in 0..4 {
        modulus.swap(i, 0x4d + i);
    }
    for i in 0..0x40 {
        modulus[i] ^= modulus[0x40 + i];
    }
    for i in 0..4 {
        modulus[0x0d + i] ^= modulus[0x34 + i];
    }
    for i in 0..0x40 {
        modulus[0x40 + i] ^= modulus[i];
    }
}

pub fn unscramble_modulus(modulus: &mut [u8; 128]) {
    for i in 0..0x40 {
        modulus[0x40 + i] ^= modulus[i];
    }
    for i in 0..4 {
        modulus[0x0d + i] ^= modulus[0x34 + i];
    }
    for i in 0..0x40 {
        modulus[i] ^= modulus[0x40 + i];
    }
    for i in 0..4 {
        modulus.swap(i, 0x4d + i);
    }
}

/// Raw RSA decryption without OAEP/PKCS1 framing: `m = c^d mod n`, left
/// padded with zeros to the key size. The cipher must be exactly key-sized.
pub fn rsa_decrypt_no_padding(key: &RsaPrivateKey, cipher: &[u8]) -> Result<Vec<u8>, CryptError> {
    let k = key.size();
    if cipher.len() != k {
        return Err(CryptError::RsaSize {
            got: cipher.len(),
            expected: k,
        });
    }
    let c = BigUint::from_bytes_be(cipher);
    let m = c.modpow(key.d(), key.n());
    let out = m.to_bytes_be();
    if out.len() < k {
        let mut padded = vec![0u8; k - out.len()];
        padded.extend_from_slice(&out);
        return Ok(padded);
    }
    Ok(out)
}

/// Generates the per-connection 1024-bit keypair with the usual exponent.
pub fn generate_rsa_keypair() -> rsa::Result<RsaPrivateKey> {
    RsaPrivateKey::new_with_exp(&mut thread_rng(), 1024, &BigUint::from(65537u32))
}

/// Big-endian modulus bytes, exactly 128 for a 1024-bit key.
pub fn modulus_bytes(key: &RsaPrivateKey) -> Vec<u8> {
    key.n().to_bytes_be()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_round_trip() {
        for size in [8usize, 16, 32, 64] {
            let mut data: Vec<u8> = (0..size as u8).collect();
            let tail = size - 4;
            data[tail..].fill(0);
            append_checksum(&mut data);
            assert!(verify_checksum(&data), "size {}", size);
        }
    }

    #[test]
    fn checksum_rejects_corruption() {
        let mut data = vec![0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00];
        append_checksum(&mut data);
        data[0] ^= 0x01;
        assert!(!verify_checksum(&data));
    }

    #[test]
    fn checksum_rejects_bad_sizes() {
        assert!(!verify_checksum(&[0x01, 0x02]));
        assert!(!verify_checksum(&[0x01, 0x02, 0x03, 0x04, 0x05]));
        assert!(!verify_checksum(&[0x01, 0x02, 0x03, 0x04]));
    }

    #[test]
    fn client_checksum_with_trailing_padding() {
        // [data(16)][checksum(4)][padding(12)]
        let mut data = vec![0u8; 32];
        for (i, b) in data.iter_mut().take(16).enumerate() {
            *b = i as u8;
        }
        let mut chksum = 0u32;
        for chunk in data[..16].chunks_exact(4) {
            chksum ^= u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        data[16..20].copy_from_slice(&chksum.to_le_bytes());
        assert!(verify_checksum_client(&data));
        assert!(!verify_checksum_client(&data[..8]));
    }

    #[test]
    fn blowfish_round_trip() {
        let key = STATIC_CLIENT_KEY;
        let original: Vec<u8> = (0..64).collect();
        let mut data = original.clone();
        blowfish_encrypt(&mut data, &key).unwrap();
        assert_ne!(data, original);
        blowfish_decrypt(&mut data, &key).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn blowfish_gameserver_key_round_trip() {
        let original: Vec<u8> = (0..32).map(|i| i * 3).collect();
        let mut data = original.clone();
        blowfish_encrypt(&mut data, &STATIC_GAMESERVER_KEY).unwrap();
        blowfish_decrypt(&mut data, &STATIC_GAMESERVER_KEY).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn blowfish_rejects_unaligned_data() {
        let mut data = vec![0u8; 10];
        assert!(matches!(
            blowfish_encrypt(&mut data, &STATIC_CLIENT_KEY),
            Err(CryptError::BlockAlignment(10))
        ));
    }

    #[test]
    fn xor_pass_round_trip() {
        // Zero key slot before the pass, as the send path reserves it.
        let mut data: Vec<u8> = (0..40).collect();
        data[32..36].fill(0);
        let original = data.clone();
        enc_xor_pass(&mut data, 0xDEAD_BEEF);
        assert_ne!(data, original);
        dec_xor_pass(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn xor_pass_stores_key_before_last_word() {
        let mut data = vec![0u8; 16];
        enc_xor_pass(&mut data, 0x12345678);
        // Word at len-8 is the final running key; last word untouched.
        assert_eq!(&data[12..16], &[0, 0, 0, 0]);
        assert_ne!(&data[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn modulus_scramble_is_an_involution_pair() {
        let mut modulus = [0u8; 128];
        for (i, b) in modulus.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7).wrapping_add(13);
        }
        let original = modulus;
        scramble_modulus(&mut modulus);
        assert_ne!(modulus, original);
        unscramble_modulus(&mut modulus);
        assert_eq!(modulus, original);

        // The other direction holds too.
        unscramble_modulus(&mut modulus);
        scramble_modulus(&mut modulus);
        assert_eq!(modulus, original);
    }

    #[test]
    fn seal_static_survives_the_reverse_pipeline() {
        let body: Vec<u8> = (0..170).map(|i| (i % 251) as u8).collect();
        let mut data = seal_static(&body).unwrap();
        blowfish_decrypt(&mut data, &STATIC_CLIENT_KEY).unwrap();
        dec_xor_pass(&mut data);
        assert!(verify_checksum(&data));
        assert_eq!(&data[..body.len()], &body[..]);
    }

    #[test]
    fn seal_applies_checksum_and_padding() {
        let body = [0x03u8, 0xAA, 0xBB, 0xCC, 0xDD];
        let mut data = seal(&body, &STATIC_CLIENT_KEY).unwrap();
        assert_eq!(data.len() % 8, 0);
        blowfish_decrypt(&mut data, &STATIC_CLIENT_KEY).unwrap();
        assert!(verify_checksum(&data));
        assert_eq!(&data[..body.len()], &body[..]);
    }

    #[test]
    fn rsa_no_padding_round_trip() {
        let key = generate_rsa_keypair().unwrap();
        let n = BigUint::from_bytes_be(&modulus_bytes(&key));
        let e = BigUint::from(65537u32);

        let mut plain = vec![0u8; 128];
        plain[100..].copy_from_slice(&[7u8; 28]);
        let c = BigUint::from_bytes_be(&plain).modpow(&e, &n);
        let mut cipher = c.to_bytes_be();
        while cipher.len() < 128 {
            cipher.insert(0, 0);
        }

        let decrypted = rsa_decrypt_no_padding(&key, &cipher).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn rsa_rejects_wrong_cipher_size() {
        let key = generate_rsa_keypair().unwrap();
        assert!(matches!(
            rsa_decrypt_no_padding(&key, &[0u8; 64]),
            Err(CryptError::RsaSize {
                got: 64,
                expected: 128
            })
        ));
    }
}
