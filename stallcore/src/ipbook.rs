use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

struct IpEntry {
    connections: usize,
    last_accept: Instant,
}

/// Per-address accounting used by the accept path to enforce the connection
/// cap and the minimum interval between connection attempts.
pub struct IpAddressBook {
    entries: Mutex<HashMap<IpAddr, IpEntry>>,
}

impl IpAddressBook {
    pub fn new() -> IpAddressBook {
        IpAddressBook {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<IpAddr, IpEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record an accepted connection, refreshing the last-accept stamp.
    pub fn register(&self, ip: IpAddr) {
        let mut entries = self.guard();
        let now = Instant::now();

        let entry = entries.entry(ip).or_insert(IpEntry {
            connections: 0,
            last_accept: now,
        });
        entry.connections += 1;
        entry.last_accept = now;
    }

    /// Drop one connection; the entry disappears with its last connection so
    /// the interval check does not outlive the address.
    pub fn unregister(&self, ip: IpAddr) {
        let mut entries = self.guard();

        if let Some(entry) = entries.get_mut(&ip) {
            entry.connections -= 1;
            if entry.connections == 0 {
                entries.remove(&ip);
            }
        }
    }

    pub fn count(&self, ip: IpAddr) -> usize {
        self.guard().get(&ip).map_or(0, |entry| entry.connections)
    }

    /// True once `interval` has passed since the address last connected, or
    /// when the address is unknown.
    pub fn interval_elapsed(&self, ip: IpAddr, interval: Duration) -> bool {
        self.guard()
            .get(&ip)
            .map_or(true, |entry| entry.last_accept.elapsed() >= interval)
    }
}

impl Default for IpAddressBook {
    fn default() -> IpAddressBook {
        IpAddressBook::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn counts_per_address() {
        let book = IpAddressBook::new();

        book.register(ip(1));
        book.register(ip(1));
        book.register(ip(2));

        assert_eq!(book.count(ip(1)), 2);
        assert_eq!(book.count(ip(2)), 1);
        assert_eq!(book.count(ip(3)), 0);
    }

    #[test]
    fn entry_is_dropped_with_last_connection() {
        let book = IpAddressBook::new();

        book.register(ip(1));
        book.register(ip(1));
        book.unregister(ip(1));
        assert_eq!(book.count(ip(1)), 1);

        book.unregister(ip(1));
        assert_eq!(book.count(ip(1)), 0);
        assert!(book.interval_elapsed(ip(1), Duration::from_secs(3600)));
    }

    #[test]
    fn interval_gates_reconnects() {
        let book = IpAddressBook::new();

        assert!(book.interval_elapsed(ip(7), Duration::from_secs(5)));
        book.register(ip(7));
        assert!(!book.interval_elapsed(ip(7), Duration::from_secs(5)));
        assert!(book.interval_elapsed(ip(7), Duration::from_secs(0)));
    }
}
