//! Feeding host-system configuration into a [`Client`]: resolv.conf
//! nameservers and search domains, and hosts-file records seeded into
//! the cache.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Instant;

use dns_wire::types::*;

use crate::client::Client;
use crate::DNS_PORT;

/// TTL for records seeded from a hosts file.  Hosts entries do not
/// change underneath a running process, so this is long.
pub const HOSTS_TTL: u32 = 86_400;

/// Apply one resolv.conf line.
///
/// Recognised fields: `nameserver <ip>`, `search <domain>...`, and
/// `domain <name>` (accepted and ignored, like `sortlist`).  Comments
/// and blank lines are fine.  Returns whether the line parsed.
pub fn apply_resolv_conf_line(client: &mut Client, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return true;
    }

    let mut words = line.split_whitespace();
    match words.next() {
        Some("nameserver") => {
            let Some(address) = words.next().and_then(|w| IpAddr::from_str(w).ok()) else {
                return false;
            };
            client.add_nameserver(SocketAddr::from((address, DNS_PORT)));
            true
        }
        Some("search") => {
            let mut any = false;
            for word in words {
                let Ok(domain) = DomainName::from_str(word) else {
                    return false;
                };
                client.add_search_domain(domain);
                any = true;
            }
            any
        }
        Some("domain") => true,
        _ => false,
    }
}

/// Apply a whole resolv.conf.  Unparseable lines are logged and
/// skipped; returns whether every line parsed.
pub fn apply_resolv_conf(client: &mut Client, text: &str) -> bool {
    let mut ok = true;
    for (index, line) in text.lines().enumerate() {
        if !apply_resolv_conf_line(client, line) {
            tracing::warn!(line = index + 1, "could not parse resolv.conf line");
            ok = false;
        }
    }
    ok
}

/// Seed hosts-file records into the cache, as authoritative records
/// with a long TTL.
///
/// Each line is an address followed by one or more names; `#` starts a
/// comment.  Unparseable lines are logged and skipped; returns whether
/// every line parsed.
pub fn seed_hosts(client: &mut Client, text: &str, now: Instant) -> bool {
    let mut ok = true;

    for (index, line) in text.lines().enumerate() {
        let line = match line.find('#') {
            Some(comment) => &line[..comment],
            None => line,
        };

        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };

        let Ok(address) = IpAddr::from_str(first) else {
            tracing::warn!(line = index + 1, "could not parse hosts line");
            ok = false;
            continue;
        };

        let mut any_name = false;
        for word in words {
            let Ok(name) = DomainName::from_str(word) else {
                tracing::warn!(line = index + 1, name = word, "could not parse hosts name");
                ok = false;
                continue;
            };
            any_name = true;

            let rdata = match address {
                IpAddr::V4(v4) => Rdata::A { address: v4 },
                IpAddr::V6(v6) => Rdata::AAAA { address: v6 },
            };
            client.cache_mut().insert(
                &ResourceRecord {
                    name,
                    rdata,
                    rclass: RecordClass::IN,
                    ttl: HOSTS_TTL,
                },
                true,
                now,
            );
        }

        if !any_name {
            tracing::warn!(line = index + 1, "hosts line has no names");
            ok = false;
        }
    }

    ok
}

/// Pull in `/etc/resolv.conf` and `/etc/hosts`.  A missing file is not
/// an error.
pub fn apply_system_files(client: &mut Client, now: Instant) -> bool {
    let mut ok = true;
    match std::fs::read_to_string("/etc/resolv.conf") {
        Ok(text) => ok &= apply_resolv_conf(client, &text),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => (),
        Err(error) => {
            tracing::warn!(?error, "could not read /etc/resolv.conf");
            ok = false;
        }
    }
    match std::fs::read_to_string("/etc/hosts") {
        Ok(text) => ok &= seed_hosts(client, &text, now),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => (),
        Err(error) => {
            tracing::warn!(?error, "could not read /etc/hosts");
            ok = false;
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_wire::types::test_util::domain;

    use super::*;

    #[test]
    fn resolv_conf_nameserver_and_search() {
        let mut client = Client::new();
        let parsed = apply_resolv_conf(
            &mut client,
            "# local config\n\
             nameserver 192.0.2.53\n\
             nameserver 192.0.2.54\n\
             search example.com example.net\n\
             domain example.com\n",
        );

        assert!(parsed);
        assert_eq!(
            &[
                SocketAddr::from((Ipv4Addr::new(192, 0, 2, 53), DNS_PORT)),
                SocketAddr::from((Ipv4Addr::new(192, 0, 2, 54), DNS_PORT)),
            ],
            client.nameservers()
        );
        assert_eq!(
            &[domain("example.com."), domain("example.net.")],
            client.search_domains()
        );
    }

    #[test]
    fn resolv_conf_rejects_junk() {
        let mut client = Client::new();
        assert!(!apply_resolv_conf_line(&mut client, "nameserver not-an-ip"));
        assert!(!apply_resolv_conf_line(&mut client, "frobnicate on"));
        assert!(apply_resolv_conf_line(&mut client, "; comment"));
        assert!(client.nameservers().is_empty());
    }

    #[test]
    fn hosts_lines_seed_authoritative_records() {
        let mut client = Client::new();
        let now = Instant::now();
        let parsed = seed_hosts(
            &mut client,
            "127.0.0.1 localhost\n\
             192.0.2.7 box box.example.com # the workshop machine\n\
             ::1 localhost\n",
            now,
        );

        assert!(parsed);
        let handle = client
            .cache()
            .lookup_one(
                &domain("box.example.com."),
                RecordType::A,
                RecordClass::IN,
                now,
            )
            .unwrap();
        let record = client.cache().get(handle).unwrap();
        assert_eq!(
            Rdata::A {
                address: Ipv4Addr::new(192, 0, 2, 7)
            },
            record.rdata
        );
        assert_eq!(HOSTS_TTL, record.ttl);

        assert!(client
            .cache()
            .lookup_one(
                &domain("localhost."),
                RecordType::AAAA,
                RecordClass::IN,
                now
            )
            .is_some());
    }

    #[test]
    fn hosts_bad_lines_are_skipped() {
        let mut client = Client::new();
        let now = Instant::now();
        assert!(!seed_hosts(&mut client, "not-an-address host\n", now));
        assert_eq!(0, client.cache().record_count());
    }
}
