use crate::support::{ErrorKind, RelayError, RelayResult};
use byteorder::{ByteOrder, NetworkEndian};

/// Default ring capacity, matching the maximum frame size.
pub const DEFAULT_CAPACITY: usize = 4 * 1024;

/// Longest string field accepted on the wire, terminator included.
pub const MAX_STRING: usize = 512;

/// Fixed-capacity circular byte buffer with deferred consumption. Reads
/// advance a cursor that only becomes permanent on `commit`; `rollback`
/// rewinds to the last committed position so a partially received frame can
/// be re-parsed once more bytes arrive.
pub struct ByteRing {
    // Backing store is one byte larger than the capacity so a full buffer
    // is distinguishable from an empty one.
    size: usize,
    write_pos: usize,
    read_pos: usize,
    data_pos: usize,
    data: Box<[u8]>,
}

impl ByteRing {
    pub fn new(capacity: usize) -> ByteRing {
        ByteRing {
            size: capacity + 1,
            write_pos: 0,
            read_pos: 0,
            data_pos: 0,
            data: vec![0u8; capacity + 1].into_boxed_slice(),
        }
    }

    /// Usable capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn writable_len(&self) -> usize {
        if self.write_pos >= self.data_pos {
            self.size - self.write_pos + self.data_pos - 1
        } else {
            self.data_pos - self.write_pos - 1
        }
    }

    /// Number of bytes available to the read cursor.
    #[inline]
    pub fn readable_len(&self) -> usize {
        if self.write_pos < self.read_pos {
            self.size - self.read_pos + self.write_pos
        } else {
            self.write_pos - self.read_pos
        }
    }

    #[inline]
    pub fn can_write(&self, count: usize) -> bool {
        count <= self.writable_len()
    }

    #[inline]
    pub fn can_read(&self, count: usize) -> bool {
        count <= self.readable_len()
    }

    /// Number of bytes occupied, including read-but-uncommitted bytes.
    #[inline]
    pub fn used_len(&self) -> usize {
        self.size - self.writable_len() - 1
    }

    pub fn write(&mut self, data: &[u8]) -> RelayResult<()> {
        if !self.can_write(data.len()) {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        let mut data = data;
        let till_end = self.size - self.write_pos;

        if till_end < data.len() {
            self.data[self.write_pos..self.size].copy_from_slice(&data[..till_end]);
            self.write_pos = 0;
            data = &data[till_end..];
        }

        self.data[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
        if self.write_pos == self.size {
            self.write_pos = 0;
        }
        Ok(())
    }

    pub fn read(&mut self, dst: &mut [u8]) -> RelayResult<()> {
        if !self.can_read(dst.len()) {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        let mut dst = dst;
        let till_end = self.size - self.read_pos;

        if till_end < dst.len() {
            dst[..till_end].copy_from_slice(&self.data[self.read_pos..self.size]);
            self.read_pos = 0;
            dst = &mut dst[till_end..];
        }

        let len = dst.len();
        dst.copy_from_slice(&self.data[self.read_pos..self.read_pos + len]);
        self.read_pos += len;
        if self.read_pos == self.size {
            self.read_pos = 0;
        }
        Ok(())
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> RelayResult<()> {
        self.write(&[value])
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> RelayResult<()> {
        let mut raw = [0u8; 2];
        NetworkEndian::write_u16(&mut raw, value);
        self.write(&raw)
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> RelayResult<()> {
        let mut raw = [0u8; 4];
        NetworkEndian::write_u32(&mut raw, value);
        self.write(&raw)
    }

    /// Strings travel as a u16 length (terminator included) followed by the
    /// raw bytes and a NUL.
    pub fn write_string(&mut self, value: &str) -> RelayResult<()> {
        let len = value.len() + 1;

        if len > MAX_STRING {
            return Err(RelayError::Fatal(ErrorKind::StringLength));
        }

        self.write_u16(len as u16)?;
        self.write(value.as_bytes())?;
        self.write_u8(0)
    }

    #[inline]
    pub fn read_u8(&mut self) -> RelayResult<u8> {
        let mut raw = [0u8; 1];
        self.read(&mut raw)?;
        Ok(raw[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> RelayResult<u16> {
        let mut raw = [0u8; 2];
        self.read(&mut raw)?;
        Ok(NetworkEndian::read_u16(&raw))
    }

    #[inline]
    pub fn read_u32(&mut self) -> RelayResult<u32> {
        let mut raw = [0u8; 4];
        self.read(&mut raw)?;
        Ok(NetworkEndian::read_u32(&raw))
    }

    pub fn read_string(&mut self) -> RelayResult<String> {
        let len = self.read_u16()? as usize;

        if len < 1 || len > MAX_STRING {
            return Err(RelayError::Fatal(ErrorKind::StringLength));
        }

        let mut raw = vec![0u8; len];
        self.read(&mut raw)?;

        // Drop the terminator.
        raw.pop();
        String::from_utf8(raw).map_err(|_| RelayError::Fatal(ErrorKind::StringLength))
    }

    /// Make everything read since the last commit permanent, freeing its
    /// space for new writes.
    #[inline]
    pub fn commit(&mut self) {
        self.data_pos = self.read_pos;
    }

    /// Rewind the read cursor to the last committed position.
    #[inline]
    pub fn rollback(&mut self) {
        self.read_pos = self.data_pos;
    }

    pub fn skip(&mut self, count: usize) -> RelayResult<()> {
        if !self.can_read(count) {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        self.read_pos += count;
        if self.read_pos >= self.size {
            self.read_pos -= self.size;
        }
        Ok(())
    }

    #[inline]
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.data_pos = 0;
    }
}

impl Default for ByteRing {
    fn default() -> ByteRing {
        ByteRing::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn roundtrip_simple() {
        let mut ring = ByteRing::new(16);
        ring.write(&[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        ring.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn exact_capacity() {
        let mut ring = ByteRing::new(8);
        assert_eq!(ring.writable_len(), 8);
        ring.write(&[0u8; 8]).unwrap();
        assert_eq!(ring.writable_len(), 0);
        assert_eq!(
            ring.write(&[0u8; 1]),
            Err(RelayError::Fatal(ErrorKind::BufferOverrun))
        );
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let mut ring = ByteRing::new(8);
        let mut rng = rand::thread_rng();

        // Push the cursors close to the wrap point, then stream random
        // chunks through the boundary many times.
        ring.write(&[0u8; 6]).unwrap();
        let mut sink = [0u8; 6];
        ring.read(&mut sink).unwrap();
        ring.commit();

        for _ in 0..64 {
            let chunk: [u8; 5] = rng.gen();
            ring.write(&chunk).unwrap();

            let mut out = [0u8; 5];
            ring.read(&mut out).unwrap();
            ring.commit();
            assert_eq!(chunk, out);
        }
    }

    #[test]
    fn rollback_restores_committed_position() {
        let mut ring = ByteRing::new(16);
        ring.write_u16(0x0102).unwrap();
        ring.write_u16(0x0304).unwrap();

        assert_eq!(ring.read_u16().unwrap(), 0x0102);
        ring.rollback();
        assert_eq!(ring.read_u16().unwrap(), 0x0102);

        ring.commit();
        ring.rollback();
        assert_eq!(ring.read_u16().unwrap(), 0x0304);
    }

    #[test]
    fn commit_frees_space() {
        let mut ring = ByteRing::new(4);
        ring.write(&[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        ring.read(&mut out).unwrap();
        assert!(!ring.can_write(4));

        ring.commit();
        assert!(ring.can_write(4));
    }

    #[test]
    fn typed_values_use_network_order() {
        let mut ring = ByteRing::new(16);
        ring.write_u32(0xA1B2_C3D4).unwrap();

        let mut raw = [0u8; 4];
        ring.read(&mut raw).unwrap();
        assert_eq!(raw, [0xA1, 0xB2, 0xC3, 0xD4]);
    }

    #[test]
    fn string_roundtrip() {
        let mut ring = ByteRing::new(32);
        ring.write_string("abc").unwrap();
        assert_eq!(ring.readable_len(), 2 + 4);
        assert_eq!(ring.read_string().unwrap(), "abc");
    }
}
