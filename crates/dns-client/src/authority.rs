use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use dns_wire::types::DomainName;

/// How much of the namespace a grant covers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum GrantScope {
    /// Only the granted name itself.
    ExactName,
    /// The granted name and everything below it.
    NameAndSuffix,
}

/// Time-bounded permissions for nameservers the resolver was referred
/// to: which peer address may assert records about which owner names.
///
/// This table is what keeps a random responder from poisoning the
/// cache.  Configured nameservers are trusted without consulting it;
/// everyone else needs a grant covering the record's owner.
#[derive(Debug)]
pub struct AuthorityTable {
    grants: HashMap<SocketAddr, Vec<Grant>>,

    /// Grants ordered by expiry, soonest first, so flushing stale
    /// entries does not scan the whole table.
    ///
    /// INVARIANT: the keys in here are exactly the grants in `grants`.
    expiry_order: PriorityQueue<GrantKey, Reverse<Instant>>,

    /// Flush expired grants on every `grant`/`check`.  Left on; turn
    /// off only if flushing ever shows up in a profile, and flush on a
    /// schedule instead.
    autoflush: bool,
}

type GrantKey = (SocketAddr, DomainName, GrantScope);

#[derive(Debug)]
struct Grant {
    owner: DomainName,
    scope: GrantScope,
    expires: Instant,
}

impl Default for AuthorityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityTable {
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
            expiry_order: PriorityQueue::new(),
            autoflush: true,
        }
    }

    /// Permit `address` to assert records about `owner` (and its
    /// subtree, for `NameAndSuffix`) until `expires`.
    ///
    /// An equivalent existing grant is extended rather than
    /// duplicated; extension only ever moves the expiry later.
    pub fn grant(
        &mut self,
        address: SocketAddr,
        scope: GrantScope,
        owner: &DomainName,
        expires: Instant,
        now: Instant,
    ) {
        if self.autoflush {
            self.expire(now);
        }

        let grants = self.grants.entry(address).or_default();
        for grant in grants.iter_mut() {
            if grant.owner == *owner && grant.scope == scope {
                if expires > grant.expires {
                    grant.expires = expires;
                    self.expiry_order
                        .change_priority(&(address, owner.clone(), scope), Reverse(expires));
                }
                return;
            }
        }

        grants.push(Grant {
            owner: owner.clone(),
            scope,
            expires,
        });
        self.expiry_order
            .push((address, owner.clone(), scope), Reverse(expires));
    }

    /// Whether `address` currently holds a grant covering `owner`.
    pub fn check(&mut self, address: SocketAddr, owner: &DomainName, now: Instant) -> bool {
        if self.autoflush {
            self.expire(now);
        }

        let Some(grants) = self.grants.get(&address) else {
            return false;
        };

        grants.iter().any(|grant| {
            grant.expires >= now
                && match grant.scope {
                    GrantScope::ExactName => *owner == grant.owner,
                    GrantScope::NameAndSuffix => owner.is_subdomain_of(&grant.owner),
                }
        })
    }

    /// Remove every grant that expired strictly before `now`.
    pub fn expire(&mut self, now: Instant) {
        while let Some((_, &Reverse(expires))) = self.expiry_order.peek() {
            if expires >= now {
                break;
            }

            let ((address, owner, scope), _) = self.expiry_order.pop().unwrap();
            if let Some(grants) = self.grants.get_mut(&address) {
                grants.retain(|grant| !(grant.owner == owner && grant.scope == scope));
                if grants.is_empty() {
                    self.grants.remove(&address);
                }
            }
        }
    }

    #[cfg(test)]
    fn grant_count(&self) -> usize {
        self.grants.values().map(Vec::len).sum()
    }
}
