use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use dns_wire::types::*;

use crate::authority::AuthorityTable;
use crate::cache::RrCache;
use crate::metrics::Metrics;
use crate::task::Task;
use crate::types::{OnDrop, OnFailure, OnSuccess, ResolveError};

/// Query rounds allowed when the upstream resolves recursively for us:
/// a recursive nameserver should not take many retries.
pub const DEFAULT_MAX_ITERATIONS_RECURSIVE: u16 = 5;

/// Query rounds allowed when walking the zone hierarchy ourselves.
pub const DEFAULT_MAX_ITERATIONS_ITERATIVE: u16 = 10;

/// An opaque reference to a submitted task, usable only for
/// cancellation.  Stale handles (the task already terminated) are
/// ignored.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TaskHandle(u64);

/// The resolver client: cache, trust table, task table, and the
/// queues binding them to one shared packet transport.
///
/// This is a plain single-threaded state machine.  All entry points
/// take the current time explicitly and return quickly; nothing in
/// here blocks or spawns.  Wire it to a socket with
/// [`crate::net::drive_udp`], or feed it packets and clock readings
/// directly (the tests do).
pub struct Client {
    /// Configured nameservers, trusted unconditionally.
    pub(crate) nameservers: Vec<SocketAddr>,
    pub(crate) search_domains: Vec<DomainName>,
    pub(crate) stub_resolver: bool,

    pub(crate) cache: RrCache,
    pub(crate) authority: AuthorityTable,

    pub(crate) tasks: HashMap<TaskHandle, Task>,

    /// Message id to the tasks listening on it.  16-bit ids collide
    /// under load, so this chains.
    pub(crate) dispatch: HashMap<u16, Vec<TaskHandle>>,

    /// Encoded queries waiting for the transport, oldest first.
    pub(crate) outbound: VecDeque<(Bytes, SocketAddr)>,

    pub(crate) metrics: Metrics,

    next_message_id: u16,
    next_task_id: u64,
    max_iterations_recursive: u16,
    max_iterations_iterative: u16,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// A client with a default-sized cache.
    pub fn new() -> Self {
        Self::with_cache(RrCache::new())
    }

    /// A client using the given cache, pre-seeded or specially sized.
    pub fn with_cache(cache: RrCache) -> Self {
        Self {
            nameservers: Vec::new(),
            search_domains: Vec::new(),
            stub_resolver: false,
            cache,
            authority: AuthorityTable::new(),
            tasks: HashMap::new(),
            dispatch: HashMap::new(),
            outbound: VecDeque::new(),
            metrics: Metrics::new(),
            next_message_id: rand::random(),
            next_task_id: 0,
            max_iterations_recursive: DEFAULT_MAX_ITERATIONS_RECURSIVE,
            max_iterations_iterative: DEFAULT_MAX_ITERATIONS_ITERATIVE,
        }
    }

    /// Add a configured nameserver.  Duplicates are ignored.
    pub fn add_nameserver(&mut self, address: SocketAddr) {
        if !self.nameservers.contains(&address) {
            self.nameservers.push(address);
        }
    }

    pub fn nameservers(&self) -> &[SocketAddr] {
        &self.nameservers
    }

    /// Add a domain to try postfixing to relative lookups.  Stored in
    /// order for lookup wrappers; the query engine itself does not
    /// consult it.
    pub fn add_search_domain(&mut self, domain: DomainName) {
        self.search_domains.push(domain);
    }

    pub fn search_domains(&self) -> &[DomainName] {
        &self.search_domains
    }

    /// In stub mode every query goes to the configured nameservers
    /// with recursion-desired set, and the zone hierarchy is never
    /// walked locally.  See RFC 1034 section 5.3.1.
    pub fn set_stub_resolver(&mut self, stub: bool) {
        self.stub_resolver = stub;
    }

    pub fn is_stub_resolver(&self) -> bool {
        self.stub_resolver
    }

    pub fn cache(&self) -> &RrCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RrCache {
        &mut self.cache
    }

    /// Swap in a different cache.  Records pinned by outstanding tasks
    /// go with the old cache, so this is best done while idle.
    pub fn set_cache(&mut self, cache: RrCache) {
        self.cache = cache;
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// How many tasks are still outstanding.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Submit questions for resolution.
    ///
    /// The callbacks run synchronously inside a later `handle_packet`
    /// / `handle_timeouts` call (or inside this one, on a cache hit),
    /// so they must not block; hand results out through a channel.
    ///
    /// With `recursive` unset the questions are answered from the
    /// cache only, and whatever could not be answered is silently left
    /// out of the (still successful) result.
    pub fn resolve(
        &mut self,
        now: Instant,
        recursive: bool,
        questions: Vec<Question>,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) -> TaskHandle {
        self.resolve_with_drop_hook(now, recursive, questions, on_success, on_failure, None)
    }

    /// Like [`Client::resolve`], with a hook invoked exactly once when
    /// the task is torn down, however it ends.
    pub fn resolve_with_drop_hook(
        &mut self,
        now: Instant,
        recursive: bool,
        questions: Vec<Question>,
        on_success: OnSuccess,
        on_failure: OnFailure,
        on_drop: Option<OnDrop>,
    ) -> TaskHandle {
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let handle = TaskHandle(self.next_task_id);
        self.next_task_id += 1;

        let max_iterations = if recursive {
            self.max_iterations_recursive
        } else {
            self.max_iterations_iterative
        };

        let task = Task::new(
            message_id,
            questions,
            recursive,
            self.stub_resolver,
            max_iterations,
            on_success,
            on_failure,
            on_drop,
        );

        self.dispatch.entry(message_id).or_default().push(handle);
        self.tasks.insert(handle, task);
        self.drive(handle, now);

        handle
    }

    /// Cancel a task.  After this returns its callbacks will not run;
    /// the drop hook fires now.
    pub fn cancel(&mut self, handle: TaskHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            self.unregister(handle, task.message_id);
            task.cancel(&mut self.cache);
        }
    }

    /// Fire the retry timer for every task whose deadline has passed.
    pub fn handle_timeouts(&mut self, now: Instant) {
        let due: Vec<TaskHandle> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(&handle, _)| handle)
            .collect();

        for handle in due {
            if let Some(task) = self.tasks.get_mut(&handle) {
                task.deadline = None;
            }
            self.metrics.retries += 1;
            self.drive(handle, now);
        }
    }

    /// The soonest retry deadline across all tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.values().filter_map(|task| task.deadline).min()
    }

    /// The oldest queued outbound packet, if any.
    pub fn next_outbound(&mut self) -> Option<(Bytes, SocketAddr)> {
        self.outbound.pop_front()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Fail every outstanding task.  Called when the transport shuts
    /// down: message ids can no longer be matched to responses, so no
    /// task can ever complete.
    pub fn fail_all(&mut self) {
        let handles: Vec<TaskHandle> = self.tasks.keys().copied().collect();
        for handle in handles {
            if let Some(task) = self.tasks.remove(&handle) {
                self.unregister(handle, task.message_id);
                task.fail(&mut self.cache, ResolveError::TransportClosed);
            }
        }
    }

    /// Drop a terminated task's dispatch entry.
    pub(crate) fn unregister(&mut self, handle: TaskHandle, message_id: u16) {
        if let Some(handles) = self.dispatch.get_mut(&message_id) {
            handles.retain(|&h| h != handle);
            if handles.is_empty() {
                self.dispatch.remove(&message_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::mpsc;

    use dns_wire::types::test_util::*;

    use super::*;

    fn server() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 53), 53))
    }

    fn submit(client: &mut Client, now: Instant, name: &str) -> mpsc::Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        let failure_tx = tx.clone();
        client.resolve(
            now,
            true,
            vec![a_question(name)],
            Box::new(move |_| {
                tx.send(true).unwrap();
            }),
            Box::new(move |_| {
                failure_tx.send(false).unwrap();
            }),
        );
        rx
    }

    #[test]
    fn message_ids_advance_and_wrap() {
        let now = Instant::now();
        let mut client = Client::new();
        client.add_nameserver(server());
        client.next_message_id = u16::MAX;

        submit(&mut client, now, "a.test.");
        submit(&mut client, now, "b.test.");

        let (first, _) = client.next_outbound().unwrap();
        let (second, _) = client.next_outbound().unwrap();
        assert_eq!(u16::MAX, Message::from_octets(&first).unwrap().header.id);
        assert_eq!(0, Message::from_octets(&second).unwrap().header.id);
    }

    #[test]
    fn colliding_ids_chain_and_both_tasks_see_the_packet() {
        let now = Instant::now();
        let mut client = Client::new();
        client.add_nameserver(server());

        client.next_message_id = 400;
        let first = submit(&mut client, now, "a.test.");
        client.next_message_id = 400;
        let second = submit(&mut client, now, "b.test.");

        assert_eq!(2, client.dispatch.get(&400).map_or(0, Vec::len));

        // answers a.test only: the first task completes, the second
        // treats the packet as a stray and keeps waiting
        let mut response = Message::query(400, vec![a_question("a.test.")]).response();
        response.answers = vec![a_record("a.test.", Ipv4Addr::new(203, 0, 113, 1))];
        client.handle_packet(&response.to_octets().unwrap(), server(), now);

        assert!(first.try_recv().unwrap());
        assert!(second.try_recv().is_err());
        assert_eq!(1, client.outstanding());
        assert_eq!(1, client.dispatch.get(&400).map_or(0, Vec::len));
    }

    #[test]
    fn add_nameserver_ignores_duplicates() {
        let mut client = Client::new();
        client.add_nameserver(server());
        client.add_nameserver(server());
        assert_eq!(1, client.nameservers().len());
    }
}
