//! Keyed XOR + bit-rotation substitution cipher applied to the command and
//! body region of every encrypted frame, keyed by the 6-byte session key.

/// Rotation amount for the byte at `index`: the key byte modulo the key
/// length, plus one.
#[inline]
fn rotation(key: &[u8], index: usize) -> u32 {
    (key[index % key.len()] as usize % key.len() + 1) as u32 % 8
}

pub fn encrypt(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }

    for i in 0..data.len() {
        data[i] ^= key[i % key.len()];
        data[i] = data[i].rotate_left(rotation(key, i));
    }
}

pub fn decrypt(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }

    for i in 0..data.len() {
        data[i] = data[i].rotate_right(rotation(key, i));
        data[i] ^= key[i % key.len()];
    }
}
