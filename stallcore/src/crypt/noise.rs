//! Self-updating 4-byte XOR stream cipher ("noise"). Each frame advances the
//! key by a feedback function of the ciphertext, so both ends of a stream
//! must transform exactly the same frames in the same order. A bridge tracks
//! four independent key states, one per direction per endpoint.

use byteorder::{ByteOrder, LittleEndian};

/// At most 8 blocks of 4 bytes are transformed per frame.
const MAX_BLOCKS: usize = 8;

/// Seed value derived at login: a function of the protocol version and the
/// trailing 4 bytes of the chap string. Returns `None` when the chap string
/// is too short to carry the seed material.
pub fn seed(version: u16, chapstring: &[u8]) -> Option<i32> {
    if chapstring.len() < 4 {
        return None;
    }

    let tail = LittleEndian::read_i32(&chapstring[chapstring.len() - 4..]);
    let version = version as i32;

    Some(
        version
            .wrapping_mul(version)
            .wrapping_mul(0x0123_2222)
            .wrapping_mul(tail),
    )
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct NoiseKey {
    key: [u8; 4],
}

impl NoiseKey {
    pub fn new(noise: i32) -> NoiseKey {
        NoiseKey {
            key: [
                (noise & 0x01) as u8,
                (noise & 0x02) as u8,
                (noise & 0x04) as u8,
                (noise & 0x08) as u8,
            ],
        }
    }

    #[inline]
    fn xor(&self, data: &mut [u8]) {
        let blocks = (data.len() >> 2).min(MAX_BLOCKS);

        for block in 0..blocks {
            let base = block * 4;
            data[base] ^= self.key[3];
            data[base + 1] ^= self.key[2];
            data[base + 2] ^= self.key[1];
            data[base + 3] ^= self.key[0];
        }
    }

    // The next key is always a function of the first 8 CIPHERTEXT bytes.
    #[inline]
    fn feedback(data: &[u8]) -> [u8; 4] {
        [
            data[7] ^ (data[3] ^ 1),
            data[6] ^ (data[2] ^ 2),
            data[5] ^ (data[1] ^ 3),
            data[4] ^ (data[0] ^ 4),
        ]
    }

    /// Transform plaintext in place; the key advances when the region holds
    /// at least 8 bytes.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.xor(data);

        if data.len() >= 8 {
            self.key = Self::feedback(data);
        }
    }

    /// Transform ciphertext in place. The feedback must be captured before
    /// the XOR overwrites the ciphertext bytes.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        let next = if data.len() >= 8 {
            Some(Self::feedback(data))
        } else {
            None
        };

        self.xor(data);

        if let Some(next) = next {
            self.key = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn seed_needs_four_tail_bytes() {
        assert!(seed(136, b"abc").is_none());
        assert!(seed(136, b"abcd").is_some());
    }

    #[test]
    fn seed_uses_little_endian_tail() {
        let a = seed(136, b"prefix\x01\x02\x03\x04").unwrap();
        let b = seed(136, b"other!\x01\x02\x03\x04").unwrap();
        let c = seed(136, b"prefix\x04\x03\x02\x01").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn roundtrip_across_frame_lengths() {
        for len in [0usize, 4, 8, 32, 33] {
            let mut enc = NoiseKey::new(0x55AA55);
            let mut dec = NoiseKey::new(0x55AA55);

            let data: Vec<u8> = (0..len as u8).collect();
            let mut work = data.clone();

            enc.encrypt(&mut work);
            dec.decrypt(&mut work);
            assert_eq!(work, data, "length {}", len);
        }
    }

    #[test]
    fn key_state_stays_synchronized_over_a_stream() {
        let mut rng = rand::thread_rng();
        let mut enc = NoiseKey::new(-77_000_111);
        let mut dec = NoiseKey::new(-77_000_111);

        for _ in 0..50 {
            let len = rng.gen_range(0..64);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut work = data.clone();

            enc.encrypt(&mut work);
            dec.decrypt(&mut work);
            assert_eq!(work, data);
            assert_eq!(enc, dec);
        }
    }

    #[test]
    fn only_first_32_bytes_are_touched() {
        let mut key = NoiseKey::new(0x0F0F0F);
        let data: Vec<u8> = (0..40).collect();
        let mut work = data.clone();

        key.encrypt(&mut work);
        assert_eq!(&work[32..], &data[32..]);
    }

    #[test]
    fn short_frames_do_not_advance_the_key() {
        let mut key = NoiseKey::new(0x1234);
        let before = key;

        let mut data = [1u8, 2, 3, 4];
        key.encrypt(&mut data);
        assert_eq!(key, before);

        let mut data = [0u8; 8];
        key.encrypt(&mut data);
        assert_ne!(key, before);
    }
}
