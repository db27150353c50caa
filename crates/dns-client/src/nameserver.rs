use std::net::SocketAddr;
use std::time::Duration;

/// One nameserver a task knows about.
#[derive(Debug, Clone)]
pub struct NameserverEntry {
    pub address: SocketAddr,

    /// Whether this entry came from the resolver configuration rather
    /// than from NS records learned along the way.
    pub is_default: bool,

    /// How many query messages this task has sent here; drives the
    /// retry backoff.
    pub messages_sent: u32,
}

impl NameserverEntry {
    /// How long to wait for this server before retrying, based on how
    /// many times it has already been asked.
    pub fn backoff(&self) -> Duration {
        Duration::from_secs((1u64 << self.messages_sent.min(6)) + 3)
    }
}

/// The ordered nameserver list one task works through.
///
/// New servers learned from referrals go on the front; the head is
/// always the next server to prefer.  Querying a server rotates it to
/// the tail, so repeated rounds spread across the list
/// least-recently-used first.
#[derive(Debug, Clone, Default)]
pub struct NameserverList {
    entries: Vec<NameserverEntry>,
}

impl NameserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NameserverEntry] {
        &self.entries
    }

    /// Ensure an entry exists for `address`; new entries go on the
    /// front of the list.
    pub fn find_or_add(&mut self, address: SocketAddr) {
        if self.entries.iter().any(|e| e.address == address) {
            return;
        }
        self.entries.insert(
            0,
            NameserverEntry {
                address,
                is_default: false,
                messages_sent: 0,
            },
        );
    }

    /// Append the configured servers, marked as defaults, skipping any
    /// address already present.
    pub fn append_defaults(&mut self, addresses: &[SocketAddr]) {
        for &address in addresses {
            if self.entries.iter().any(|e| e.address == address) {
                continue;
            }
            self.entries.push(NameserverEntry {
                address,
                is_default: true,
                messages_sent: 0,
            });
        }
    }

    /// The first default-configured server in the list.
    pub fn first_default(&self) -> Option<SocketAddr> {
        self.entries
            .iter()
            .find(|e| e.is_default)
            .map(|e| e.address)
    }

    /// Record that a query is going to `address`: bump its counter and
    /// rotate it to the tail.  Returns the backoff to wait on it,
    /// computed before the bump.
    pub fn note_query(&mut self, address: SocketAddr) -> Duration {
        let Some(position) = self.entries.iter().position(|e| e.address == address) else {
            // not listed: treat as a first attempt
            return Duration::from_secs(4);
        };

        let backoff = self.entries[position].backoff();
        let mut entry = self.entries.remove(position);
        entry.messages_sent += 1;
        self.entries.push(entry);
        backoff
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;

    fn addr(last_octet: u8) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(192, 0, 2, last_octet),
            53,
        ))
    }

    #[test]
    fn find_or_add_prepends_once() {
        let mut list = NameserverList::new();
        list.find_or_add(addr(1));
        list.find_or_add(addr(2));
        list.find_or_add(addr(1));

        let addresses: Vec<_> = list.entries().iter().map(|e| e.address).collect();
        assert_eq!(vec![addr(2), addr(1)], addresses);
    }

    #[test]
    fn append_defaults_goes_to_tail() {
        let mut list = NameserverList::new();
        list.find_or_add(addr(1));
        list.append_defaults(&[addr(9), addr(1)]);

        let addresses: Vec<_> = list.entries().iter().map(|e| e.address).collect();
        assert_eq!(vec![addr(1), addr(9)], addresses);
        assert_eq!(Some(addr(9)), list.first_default());
    }

    #[test]
    fn note_query_rotates_to_tail() {
        let mut list = NameserverList::new();
        list.find_or_add(addr(2));
        list.find_or_add(addr(1));

        list.note_query(addr(1));

        let addresses: Vec<_> = list.entries().iter().map(|e| e.address).collect();
        assert_eq!(vec![addr(2), addr(1)], addresses);
        assert_eq!(1, list.entries()[1].messages_sent);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let entry = |sent| NameserverEntry {
            address: addr(1),
            is_default: false,
            messages_sent: sent,
        };

        assert_eq!(Duration::from_secs(4), entry(0).backoff());
        assert_eq!(Duration::from_secs(5), entry(1).backoff());
        assert_eq!(Duration::from_secs(7), entry(2).backoff());
        assert_eq!(Duration::from_secs(67), entry(6).backoff());
        assert_eq!(Duration::from_secs(67), entry(100).backoff());
    }
}
