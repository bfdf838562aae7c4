use std::io;
use std::net;

pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced by buffer, codec and socket operations. `Wait` means the
/// operation should be retried once the socket is ready again; `Fatal` tears
/// the owning connection down.
#[derive(Debug, Eq, PartialEq)]
pub enum RelayError {
    Wait,
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    BufferOverrun,
    StringLength,
    MalformedFrame,
    BadSession,
    BadCommand,
    BadPacket,
    DuplicateHandler,
    KeyLength,
    PoolExhausted,
    Closed,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for RelayError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => RelayError::Wait,
            kind => RelayError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for RelayError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        RelayError::Fatal(ErrorKind::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for RelayResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(RelayError::Wait) => false,
            _ => true,
        }
    }
}

/// Account names and map names are compared case-insensitively throughout.
#[inline]
pub fn lower_case(value: &str) -> String {
    value.to_ascii_lowercase()
}

/// MAC addresses on the wire look like `00-1A-2B-3C-4D-5E-6F-70` (23 chars,
/// every third character a hyphen, the rest `0-9`/`A-F`).
pub fn check_mac_address(mac: &str) -> bool {
    if mac.len() != 23 {
        return false;
    }

    mac.bytes().enumerate().all(|(i, c)| {
        if (i + 1) % 3 == 0 {
            c == b'-'
        } else {
            c.is_ascii_digit() || (b'A'..=b'F').contains(&c)
        }
    })
}

/// 32 uppercase hex characters.
pub fn check_md5_hash(hash: &str) -> bool {
    hash.len() == 32
        && hash
            .bytes()
            .all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn would_block_maps_to_wait() {
        let error: RelayError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(error, RelayError::Wait);

        let error: RelayError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert_eq!(error, RelayError::Fatal(ErrorKind::Io(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn wait_is_not_a_failure() {
        let wait: RelayResult<()> = Err(RelayError::Wait);
        let fatal: RelayResult<()> = Err(RelayError::Fatal(ErrorKind::Closed));

        assert!(!wait.has_failed());
        assert!(fatal.has_failed());
        assert!(!(Ok(()) as RelayResult<()>).has_failed());
    }

    #[test]
    fn mac_address_format() {
        assert!(check_mac_address("00-1A-2B-3C-4D-5E-6F-70"));
        assert!(!check_mac_address("00-1a-2b-3c-4d-5e-6f-70"));
        assert!(!check_mac_address("001A-2B-3C-4D-5E-6F-70"));
        assert!(!check_mac_address("00-1A-2B"));
    }

    #[test]
    fn md5_hash_format() {
        assert!(check_md5_hash("0123456789ABCDEF0123456789ABCDEF"));
        assert!(!check_md5_hash("0123456789abcdef0123456789abcdef"));
        assert!(!check_md5_hash("0123"));
    }
}
