//! DES/3DES, used only around login: the password field sent to the gate is
//! the chap string encrypted with the md5 password hash, and the gate's
//! login result carries the session key encrypted the same way.

use crate::support::{ErrorKind, RelayError, RelayResult};

use des::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use des::{Des, TdesEde2, TdesEde3};

const BLOCK: usize = 8;

/// Zero-pad to the next 8-byte boundary; input already on a boundary grows
/// by a full block.
pub fn pad_iso1(data: &[u8]) -> Vec<u8> {
    let padded_len = data.len() + BLOCK - data.len() % BLOCK;
    let mut out = data.to_vec();
    out.resize(padded_len, 0);
    out
}

enum Keyed {
    Single(Des),
    Double(TdesEde2),
    Triple(TdesEde3),
}

// One DES key per full 8 key bytes, capped at three.
fn keyed(key: &[u8]) -> RelayResult<Keyed> {
    let cipher = match (key.len() / BLOCK).min(3) {
        0 => return Err(RelayError::Fatal(ErrorKind::KeyLength)),
        1 => Keyed::Single(
            Des::new_from_slice(&key[..8]).map_err(|_| RelayError::Fatal(ErrorKind::KeyLength))?,
        ),
        2 => Keyed::Double(
            TdesEde2::new_from_slice(&key[..16])
                .map_err(|_| RelayError::Fatal(ErrorKind::KeyLength))?,
        ),
        _ => Keyed::Triple(
            TdesEde3::new_from_slice(&key[..24])
                .map_err(|_| RelayError::Fatal(ErrorKind::KeyLength))?,
        ),
    };
    Ok(cipher)
}

/// ECB encrypt every full 8-byte block; a trailing partial block is ignored,
/// so callers pad first.
pub fn encrypt(data: &[u8], key: &[u8]) -> RelayResult<Vec<u8>> {
    let cipher = keyed(key)?;
    let mut out = Vec::with_capacity(data.len() / BLOCK * BLOCK);

    for chunk in data.chunks_exact(BLOCK) {
        let mut block = GenericArray::clone_from_slice(chunk);
        match &cipher {
            Keyed::Single(c) => c.encrypt_block(&mut block),
            Keyed::Double(c) => c.encrypt_block(&mut block),
            Keyed::Triple(c) => c.encrypt_block(&mut block),
        }
        out.extend_from_slice(&block);
    }

    Ok(out)
}

/// ECB decrypt every full 8-byte block. No unpadding; callers slice out
/// what they need.
pub fn decrypt(data: &[u8], key: &[u8]) -> RelayResult<Vec<u8>> {
    let cipher = keyed(key)?;
    let mut out = Vec::with_capacity(data.len() / BLOCK * BLOCK);

    for chunk in data.chunks_exact(BLOCK) {
        let mut block = GenericArray::clone_from_slice(chunk);
        match &cipher {
            Keyed::Single(c) => c.decrypt_block(&mut block),
            Keyed::Double(c) => c.decrypt_block(&mut block),
            Keyed::Triple(c) => c.decrypt_block(&mut block),
        }
        out.extend_from_slice(&block);
    }

    Ok(out)
}

/// Length of the session key inside the decrypted login-result blob.
pub const SESSION_KEY_LEN: usize = 6;

/// The gate returns the session key 3DES-encrypted with the password hash;
/// only the first 6 decrypted bytes are the key.
pub fn derive_session_key(encrypted: &[u8], password_md5: &str) -> RelayResult<[u8; SESSION_KEY_LEN]> {
    let plain = decrypt(encrypted, password_md5.as_bytes())?;

    if plain.len() < SESSION_KEY_LEN {
        return Err(RelayError::Fatal(ErrorKind::KeyLength));
    }

    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&plain[..SESSION_KEY_LEN]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789ABCDEF0123456789ABCDEF";

    #[test]
    fn pad_always_grows_to_a_block_boundary() {
        for len in 0..=24usize {
            let data = vec![0xAB; len];
            let padded = pad_iso1(&data);

            assert_eq!(padded.len() % 8, 0);
            assert!(padded.len() > len);
            assert!(padded.len() - len <= 8);
            assert_eq!(&padded[..len], &data[..]);
            assert!(padded[len..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn encrypt_decrypt_inverse() {
        let data = pad_iso1(b"chapstring-material");
        let encrypted = encrypt(&data, KEY.as_bytes()).unwrap();

        assert_eq!(encrypted.len(), data.len());
        assert_ne!(encrypted, data);

        let decrypted = decrypt(&encrypted, KEY.as_bytes()).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn short_key_is_rejected() {
        assert_eq!(
            encrypt(&[0u8; 8], b"short"),
            Err(RelayError::Fatal(ErrorKind::KeyLength))
        );
    }

    #[test]
    fn trailing_partial_block_is_ignored() {
        let encrypted = encrypt(&[0u8; 11], KEY.as_bytes()).unwrap();
        assert_eq!(encrypted.len(), 8);
    }

    #[test]
    fn session_key_is_first_six_bytes() {
        let mut blob = pad_iso1(&[9u8, 8, 7, 6, 5, 4]);
        blob = encrypt(&blob, KEY.as_bytes()).unwrap();

        let key = derive_session_key(&blob, KEY).unwrap();
        assert_eq!(key, [9, 8, 7, 6, 5, 4]);
    }

    #[test]
    fn single_des_key() {
        let data = pad_iso1(b"x");
        let encrypted = encrypt(&data, b"8bytekey").unwrap();
        let decrypted = decrypt(&encrypted, b"8bytekey").unwrap();
        assert_eq!(decrypted, data);
    }
}
