//! The query engine: what happens between a question arriving and its
//! answer (or error) going back out.
//!
//! Each task loops through the same state machine: answer what the
//! cache can, follow CNAMEs, work out which nameserver to ask about
//! the rest, send coalesced queries, and go back to sleep until a
//! response or the retry timer wakes it.  Responses feed the cache
//! (subject to the authority table) and re-enter the loop.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dns_wire::types::*;

use crate::authority::GrantScope;
use crate::client::{Client, TaskHandle};
use crate::task::Task;
use crate::types::{ResolveError, ServerDetail};
use crate::DNS_PORT;

/// How long a nameserver picked out of the cache keeps authority over
/// the zone it was picked for.
const NS_REFERRAL_WINDOW: Duration = Duration::from_secs(90);

/// How long a grant minted from a response record (an NS hostname, a
/// CNAME target's parent) lasts: enough for the follow-up round trip,
/// no more.
const RESPONSE_GRANT_WINDOW: Duration = Duration::from_secs(1);

/// Negative-answer lifetime when the response carries no SOA to take
/// one from.
const DEFAULT_NEGATIVE_TTL: u32 = 60;

/// Where one round of queries for a question should go.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Target {
    /// The task's default-configured nameservers.
    Configured,
    /// A specific server learned from the cache.
    Addr(SocketAddr),
}

enum DriveOutcome {
    Pending,
    Succeeded,
    Failed(ResolveError),
}

enum Incorporation {
    /// Nothing in the message concerned this task; leave it be.
    Useless,
    /// The cache picked something up; re-enter the drive loop.
    Progressed,
    Failed(ResolveError),
}

impl Client {
    /// Feed one packet from the transport into the client.
    ///
    /// Decode failures and stray responses are logged and ignored; a
    /// bad packet never fails a task.
    pub fn handle_packet(&mut self, octets: &[u8], peer: SocketAddr, now: Instant) {
        let message = match Message::from_octets(octets) {
            Ok(message) => message,
            Err(error) => {
                self.metrics.decode_failures += 1;
                tracing::warn!(%peer, ?error, "ignoring undecodable packet");
                return;
            }
        };

        if message.header.is_query {
            tracing::debug!(%peer, "ignoring query on client transport");
            return;
        }

        let Some(handles) = self.dispatch.get(&message.header.id) else {
            tracing::debug!(%peer, id = message.header.id, "response with no matching task");
            return;
        };

        // every task chained on this id sees the packet independently
        for handle in handles.clone() {
            self.deliver(handle, &message, peer, now);
        }
    }

    fn deliver(&mut self, handle: TaskHandle, message: &Message, peer: SocketAddr, now: Instant) {
        let Some(mut task) = self.tasks.remove(&handle) else {
            return;
        };

        match self.incorporate(&mut task, message, peer, now) {
            Incorporation::Useless => {
                self.tasks.insert(handle, task);
            }
            Incorporation::Progressed => {
                self.tasks.insert(handle, task);
                self.drive(handle, now);
            }
            Incorporation::Failed(error) => {
                self.unregister(handle, task.message_id);
                task.fail(&mut self.cache, error);
            }
        }
    }

    /// Run the drive loop for a task until it settles: terminated, or
    /// waiting on the network.
    pub(crate) fn drive(&mut self, handle: TaskHandle, now: Instant) {
        let Some(mut task) = self.tasks.remove(&handle) else {
            return;
        };

        match self.drive_task(&mut task, now) {
            DriveOutcome::Pending => {
                self.tasks.insert(handle, task);
            }
            DriveOutcome::Succeeded => {
                self.unregister(handle, task.message_id);
                task.succeed(&mut self.cache);
            }
            DriveOutcome::Failed(error) => {
                tracing::debug!(id = task.message_id, %error, "task failed");
                self.unregister(handle, task.message_id);
                task.fail(&mut self.cache, error);
            }
        }
    }

    fn drive_task(&mut self, task: &mut Task, now: Instant) -> DriveOutcome {
        // one message per target, shared by all its questions
        let mut batches: Vec<(Target, Vec<Question>)> = Vec::new();
        let mut still_pending = Vec::new();

        'questions: for question in std::mem::take(&mut task.pending) {
            let rclass = match question.qclass {
                QueryClass::Record(rclass) => rclass,
                QueryClass::Wildcard => RecordClass::IN,
            };

            // the name being chased right now; CNAME following moves
            // it along the chain, the question keeps the original
            let mut name = question.name.clone();
            let mut visited: Vec<DomainName> = Vec::new();

            loop {
                let hits: Vec<_> = match question.qtype {
                    QueryType::Wildcard => self.cache.lookup_wildcard(&name, rclass, now),
                    QueryType::Record(rtype) => self
                        .cache
                        .lookup_one(&name, rtype, rclass, now)
                        .into_iter()
                        .collect(),
                };
                if !hits.is_empty() {
                    for hit in hits {
                        task.pin(&mut self.cache, hit);
                    }
                    self.metrics.cache_hits += 1;
                    task.answered.push(question);
                    continue 'questions;
                }

                if let QueryType::Record(rtype) = question.qtype {
                    if self.cache.is_negative(&name, rtype, rclass, now) {
                        self.metrics.negative_hits += 1;
                        task.negatives.push(question.clone());
                        task.answered.push(question);
                        continue 'questions;
                    }
                }

                if question.qtype == QueryType::Record(RecordType::CNAME)
                    || question.qtype == QueryType::Wildcard
                {
                    break;
                }
                let Some(cname_hit) =
                    self.cache
                        .lookup_one(&name, RecordType::CNAME, rclass, now)
                else {
                    break;
                };
                let Some(ResourceRecord {
                    rdata: Rdata::CNAME { canonical },
                    ..
                }) = self.cache.get(cname_hit)
                else {
                    break;
                };
                let canonical = canonical.clone();

                if canonical == name || visited.contains(&canonical) {
                    return DriveOutcome::Failed(ResolveError::CircularCname { name });
                }

                task.pin(&mut self.cache, cname_hit);
                visited.push(name);
                name = canonical;
            }

            // the cache is out of ideas; this question needs a server
            if task.iterations >= task.max_iterations {
                return DriveOutcome::Failed(ResolveError::TooManyRetries {
                    iterations: task.iterations,
                });
            }

            if !task.recursive {
                // cache-only task: leave the question unresolved
                still_pending.push(question);
                continue;
            }

            let outgoing = Question {
                name: name.clone(),
                qtype: question.qtype,
                qclass: question.qclass,
            };

            if task.stub {
                push_batch(&mut batches, Target::Configured, outgoing);
                still_pending.push(question);
                continue;
            }

            // walk the name from most to least specific looking for a
            // zone whose nameserver we can actually address
            let mut target = Target::Configured;
            for i in 0..name.labels.len() {
                let Some(zone) = DomainName::from_labels(name.labels[i..].to_vec()) else {
                    continue;
                };
                if let Some((ns_host, address)) = self.cache.get_ns_addr(&zone, now) {
                    let server = SocketAddr::from((address, DNS_PORT));
                    tracing::trace!(%zone, ns = %ns_host, %server, "using cached nameserver");
                    self.authority.grant(
                        server,
                        GrantScope::NameAndSuffix,
                        &zone,
                        now + NS_REFERRAL_WINDOW,
                        now,
                    );
                    target = Target::Addr(server);
                    break;
                }
            }

            push_batch(&mut batches, target, outgoing);
            still_pending.push(question);
        }

        task.pending = still_pending;

        if batches.is_empty() {
            // everything answered from the cache; for a cache-only
            // task this may be partial data
            return DriveOutcome::Succeeded;
        }

        let mut soonest_retry: Option<Duration> = None;
        for (target, questions) in batches {
            let server = match target {
                Target::Addr(address) => {
                    task.nameservers.find_or_add(address);
                    address
                }
                Target::Configured => {
                    if !task.used_default_servers {
                        task.used_default_servers = true;
                        task.nameservers.append_defaults(&self.nameservers);
                    }
                    match task.nameservers.first_default() {
                        Some(address) => address,
                        None => return DriveOutcome::Failed(ResolveError::NoNameServers),
                    }
                }
            };

            let backoff = task.nameservers.note_query(server);
            soonest_retry = Some(match soonest_retry {
                Some(current) if current < backoff => current,
                _ => backoff,
            });

            let mut message = Message::query(task.message_id, questions);
            message.header.recursion_desired = task.stub;

            match message.to_octets() {
                Ok(octets) => {
                    tracing::debug!(id = task.message_id, %server, "sending query");
                    self.metrics.queries_sent += 1;
                    self.outbound.push_back((octets.freeze(), server));
                }
                Err(error) => {
                    tracing::warn!(id = task.message_id, ?error, "could not serialise query");
                }
            }
        }

        task.iterations += 1;
        if task.deadline.is_none() {
            if let Some(wait) = soonest_retry {
                task.deadline = Some(now + wait);
            }
        }

        DriveOutcome::Pending
    }

    /// Work a response into the cache and the task.
    fn incorporate(
        &mut self,
        task: &mut Task,
        message: &Message,
        peer: SocketAddr,
        now: Instant,
    ) -> Incorporation {
        let mut any_relevant = false;
        let mut soa_minimum: Option<u32> = None;

        for section in [&message.answers, &message.authority, &message.additional] {
            for record in section {
                if !self.peer_may_assert(peer, &record.name, now) {
                    self.metrics.untrusted_drops += 1;
                    tracing::warn!(
                        %peer,
                        owner = %record.name,
                        "peer has no authority over record owner, dropping"
                    );
                    continue;
                }

                let Some(handle) =
                    self.cache
                        .insert(record, message.header.is_authoritative, now)
                else {
                    continue;
                };

                if let Rdata::SOA { minimum, .. } = &record.rdata {
                    soa_minimum = Some((*minimum).min(record.ttl));
                }

                if !self.relevant_to_task(task, record, now) {
                    continue;
                }
                task.pin(&mut self.cache, handle);
                any_relevant = true;

                match &record.rdata {
                    // let the peer follow up with the address of the
                    // nameserver it just named
                    Rdata::NS { nsdname } => {
                        self.authority.grant(
                            peer,
                            GrantScope::ExactName,
                            nsdname,
                            now + RESPONSE_GRANT_WINDOW,
                            now,
                        );
                    }
                    // let the peer say more about the zone it aliased
                    // us into
                    Rdata::CNAME { canonical } => {
                        if let Some(zone) = canonical.parent() {
                            self.authority.grant(
                                peer,
                                GrantScope::NameAndSuffix,
                                &zone,
                                now + RESPONSE_GRANT_WINDOW,
                                now,
                            );
                        }
                    }
                    _ => (),
                }
            }
        }

        match message.header.rcode {
            Rcode::NoError => (),
            Rcode::FormatError => {
                return Incorporation::Failed(ResolveError::FormatError { peer });
            }
            Rcode::NameError => {
                let question = message
                    .questions
                    .first()
                    .or_else(|| task.pending.first())
                    .cloned();
                let Some(question) = question else {
                    return Incorporation::Failed(ResolveError::ServerProblem {
                        peer,
                        detail: ServerDetail::UnexpectedRcode,
                    });
                };

                if let (QueryType::Record(rtype), QueryClass::Record(rclass)) =
                    (question.qtype, question.qclass)
                {
                    let ttl = soa_minimum.unwrap_or(DEFAULT_NEGATIVE_TTL);
                    self.cache.insert_negative(
                        &question.name,
                        rtype,
                        rclass,
                        now + Duration::from_secs(u64::from(ttl)),
                    );
                }

                return Incorporation::Failed(ResolveError::NotFound { question });
            }
            Rcode::ServerFailure => {
                return Incorporation::Failed(ResolveError::ServerProblem {
                    peer,
                    detail: ServerDetail::Failure,
                });
            }
            Rcode::NotImplemented => {
                return Incorporation::Failed(ResolveError::ServerProblem {
                    peer,
                    detail: ServerDetail::NotImplemented,
                });
            }
            Rcode::Refused => {
                return Incorporation::Failed(ResolveError::ServerProblem {
                    peer,
                    detail: ServerDetail::Refused,
                });
            }
            Rcode::Reserved(_) => {
                return Incorporation::Failed(ResolveError::ServerProblem {
                    peer,
                    detail: ServerDetail::UnexpectedRcode,
                });
            }
        }

        if !any_relevant && !self.names_pending_zone(task, message) {
            // stray or duplicate response; possibly an id collision
            // with another task's traffic
            self.metrics.useless_responses += 1;
            tracing::debug!(
                %peer,
                id = message.header.id,
                "response with matching id but nothing relevant, ignoring"
            );
            return Incorporation::Useless;
        }

        // hold onto the authority and additional sections for the
        // next round: referral NS records and their glue
        for section in [&message.authority, &message.additional] {
            for record in section {
                if !self.peer_may_assert(peer, &record.name, now) {
                    continue;
                }
                if let Some(handle) =
                    self.cache
                        .insert(record, message.header.is_authoritative, now)
                {
                    task.pin(&mut self.cache, handle);
                }
            }
        }

        Incorporation::Progressed
    }

    /// Configured nameservers are trusted outright; everyone else
    /// needs a live grant covering the owner name.
    fn peer_may_assert(&mut self, peer: SocketAddr, owner: &DomainName, now: Instant) -> bool {
        self.nameservers.contains(&peer) || self.authority.check(peer, owner, now)
    }

    fn relevant_to_task(&self, task: &Task, record: &ResourceRecord, now: Instant) -> bool {
        task.pending
            .iter()
            .any(|question| self.answers_question(record, question, now))
    }

    /// Whether a record speaks to a question: a direct answer (modulo
    /// the CNAME chain the cache knows about), an NS for a zone
    /// enclosing the chain, or the address of a nameserver already on
    /// file for the chain.
    fn answers_question(
        &self,
        record: &ResourceRecord,
        question: &Question,
        now: Instant,
    ) -> bool {
        let chain = self.cname_chain(&question.name, now);

        if record.rtype() == RecordType::NS
            && chain.iter().any(|name| name.is_subdomain_of(&record.name))
        {
            return true;
        }

        // glue: mostly seen in the additional section
        if matches!(record.rtype(), RecordType::A | RecordType::AAAA)
            && self.names_known_ns_host(&chain, &record.name, now)
        {
            return true;
        }

        let type_matches = match question.qtype {
            QueryType::Wildcard => true,
            QueryType::Record(rtype) => {
                rtype == record.rtype() || record.rtype() == RecordType::CNAME
            }
        };
        type_matches && chain.contains(&record.name)
    }

    /// The question's name plus every CNAME target the cache chains it
    /// to, cycle-safe.
    fn cname_chain(&self, start: &DomainName, now: Instant) -> Vec<DomainName> {
        let mut chain = vec![start.clone()];
        let mut current = start.clone();

        while let Some(handle) =
            self.cache
                .lookup_one(&current, RecordType::CNAME, RecordClass::IN, now)
        {
            let Some(ResourceRecord {
                rdata: Rdata::CNAME { canonical },
                ..
            }) = self.cache.get(handle)
            else {
                break;
            };
            if chain.contains(canonical) {
                break;
            }
            chain.push(canonical.clone());
            current = canonical.clone();
        }

        chain
    }

    /// Whether `host` is a nameserver host named by the NS records of
    /// the nearest enclosing zone of any name in the chain.
    fn names_known_ns_host(&self, chain: &[DomainName], host: &DomainName, now: Instant) -> bool {
        for name in chain {
            let mut zone = Some(name.clone());
            while let Some(z) = zone {
                let ns_handles = self.cache.lookup_list(&z, RecordType::NS, RecordClass::IN);
                if !ns_handles.is_empty() {
                    for handle in ns_handles {
                        if !self.cache.is_live(handle, now) {
                            continue;
                        }
                        if let Some(ResourceRecord {
                            rdata: Rdata::NS { nsdname },
                            ..
                        }) = self.cache.get(handle)
                        {
                            if nsdname == host {
                                return true;
                            }
                        }
                    }
                    break;
                }
                zone = z.parent();
            }
        }
        false
    }

    /// Whether any NS record in the message names a zone enclosing a
    /// pending question.  Keeps referral-only responses from being
    /// mistaken for strays.
    fn names_pending_zone(&self, task: &Task, message: &Message) -> bool {
        [&message.answers, &message.authority, &message.additional]
            .iter()
            .any(|section| {
                section.iter().any(|record| {
                    record.rtype() == RecordType::NS
                        && task
                            .pending
                            .iter()
                            .any(|question| question.name.is_subdomain_of(&record.name))
                })
            })
    }
}

fn push_batch(batches: &mut Vec<(Target, Vec<Question>)>, target: Target, question: Question) {
    if let Some((_, questions)) = batches.iter_mut().find(|(t, _)| *t == target) {
        questions.push(question);
    } else {
        batches.push((target, vec![question]));
    }
}
