use crate::support::{ErrorKind, RelayError, RelayResult};
use byteorder::{ByteOrder, NetworkEndian};

use super::ring::MAX_STRING;

/// Cursor anchor for `seek_read`/`seek_write`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Anchor {
    Begin,
    Current,
    End,
}

/// Linear buffer reused once per frame: a frame is copied in whole, decoded
/// with typed reads, transformed in place for crypto and copied back out.
pub struct ScratchBuffer {
    write_pos: usize,
    read_pos: usize,
    data: Box<[u8]>,
}

impl ScratchBuffer {
    pub fn new(capacity: usize) -> ScratchBuffer {
        ScratchBuffer {
            write_pos: 0,
            read_pos: 0,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn written(&self) -> usize {
        self.write_pos
    }

    /// Number of bytes left for the read cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.write_pos.saturating_sub(self.read_pos)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    #[inline]
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }

    pub fn write(&mut self, data: &[u8]) -> RelayResult<()> {
        if self.write_pos + data.len() > self.data.len() {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        self.data[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
        Ok(())
    }

    pub fn read(&mut self, dst: &mut [u8]) -> RelayResult<()> {
        if self.remaining() < dst.len() {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        dst.copy_from_slice(&self.data[self.read_pos..self.read_pos + dst.len()]);
        self.read_pos += dst.len();
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

    pub fn write_string(&mut self, value: &str) -> RelayResult<()> {
        let len = value.len() + 1;

        if len > MAX_STRING {
            return Err(RelayError::Fatal(ErrorKind::StringLength));
        }

        self.write_u16(len as u16)?;
        self.write(value.as_bytes())?;
        self.write_u8(0)
    }

    /// Byte arrays travel as a u16 length followed by the raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> RelayResult<()> {
        self.write_u16(value.len() as u16)?;
        self.write(value)
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
        raw.pop();
        String::from_utf8(raw).map_err(|_| RelayError::Fatal(ErrorKind::StringLength))
    }

    /// Read seeks never leave the written region; field lengths come off the
    /// wire, so an out-of-range target is a malformed frame, not a panic.
    pub fn seek_read(&mut self, offset: isize, anchor: Anchor) -> RelayResult<()> {
        self.read_pos = self.resolve(self.read_pos, offset, anchor, self.write_pos)?;
        Ok(())
    }

    pub fn seek_write(&mut self, offset: isize, anchor: Anchor) -> RelayResult<()> {
        self.write_pos = self.resolve(self.write_pos, offset, anchor, self.data.len())?;
        Ok(())
    }

    fn resolve(
        &self,
        current: usize,
        offset: isize,
        anchor: Anchor,
        limit: usize,
    ) -> RelayResult<usize> {
        let base = match anchor {
            Anchor::Begin => 0isize,
            Anchor::Current => current as isize,
            Anchor::End => self.write_pos as isize,
        };

        let target = base + offset;
        if target < 0 || target as usize > limit {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }
        Ok(target as usize)
    }

    /// Run an in-place transform over the byte range `[begin, end)`. The
    /// crypto layer uses this to rewrite the command-and-body region of a
    /// frame while leaving the length and session fields untouched.
    pub fn apply<F>(&mut self, begin: usize, end: usize, transform: F) -> RelayResult<()>
    where
        F: FnOnce(&mut [u8]),
    {
        if begin > end || end > self.data.len() {
            return Err(RelayError::Fatal(ErrorKind::BufferOverrun));
        }

        transform(&mut self.data[begin..end]);
        Ok(())
    }
}

impl Default for ScratchBuffer {
    fn default() -> ScratchBuffer {
        ScratchBuffer::new(super::ring::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let mut buf = ScratchBuffer::new(64);
        buf.write_u16(0x0102).unwrap();
        buf.write_u32(0xA1B2_C3D4).unwrap();
        buf.write_string("map1").unwrap();

        assert_eq!(buf.read_u16().unwrap(), 0x0102);
        assert_eq!(buf.read_u32().unwrap(), 0xA1B2_C3D4);
        assert_eq!(buf.read_string().unwrap(), "map1");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn seek_anchors() {
        let mut buf = ScratchBuffer::new(32);
        buf.write(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();

        buf.seek_read(6, Anchor::Begin).unwrap();
        assert_eq!(buf.read_u8().unwrap(), 6);

        buf.seek_read(-2, Anchor::Current).unwrap();
        assert_eq!(buf.read_u8().unwrap(), 5);

        buf.seek_read(-8, Anchor::End).unwrap();
        assert_eq!(buf.read_u8().unwrap(), 0);

        assert!(buf.seek_read(-1, Anchor::Begin).is_err());
    }

    #[test]
    fn apply_transforms_region_in_place() {
        let mut buf = ScratchBuffer::new(32);
        buf.write(&[0xFF; 10]).unwrap();

        buf.apply(6, 10, |region| {
            for byte in region.iter_mut() {
                *byte ^= 0x0F;
            }
        })
        .unwrap();

        assert_eq!(&buf.as_slice()[..6], &[0xFF; 6]);
        assert_eq!(&buf.as_slice()[6..], &[0xF0; 4]);
    }

    #[test]
    fn read_seek_is_bounded_by_the_written_region() {
        let mut buf = ScratchBuffer::new(32);
        buf.write(&[0u8; 8]).unwrap();

        assert!(buf.seek_read(8, Anchor::Begin).is_ok());
        assert_eq!(
            buf.seek_read(9, Anchor::Begin),
            Err(RelayError::Fatal(ErrorKind::BufferOverrun))
        );
        assert_eq!(
            buf.seek_read(1, Anchor::End),
            Err(RelayError::Fatal(ErrorKind::BufferOverrun))
        );

        buf.seek_read(0, Anchor::End).unwrap();
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn overrun_is_rejected() {
        let mut buf = ScratchBuffer::new(4);
        assert!(buf.write(&[0u8; 4]).is_ok());
        assert_eq!(
            buf.write(&[0u8; 1]),
            Err(RelayError::Fatal(ErrorKind::BufferOverrun))
        );

        let mut out = [0u8; 5];
        assert_eq!(
            buf.read(&mut out),
            Err(RelayError::Fatal(ErrorKind::BufferOverrun))
        );
    }
}
