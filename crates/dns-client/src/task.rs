use std::time::Instant;

use dns_wire::types::*;

use crate::cache::{RecordHandle, RrCache};
use crate::nameserver::NameserverList;
use crate::types::{Answer, OnDrop, OnFailure, OnSuccess, ResolveError};

/// One outstanding resolution job.
///
/// A task is owned by the client's task table and terminates exactly
/// once: success, failure, or cancellation.  Records it picks up along
/// the way are locked in the cache and released at termination; the
/// drop hook runs exactly once, whichever way the task ends.
pub(crate) struct Task {
    /// The 16-bit id stamped on every message this task sends.
    pub message_id: u16,

    /// Questions not yet answered.
    pub pending: Vec<Question>,

    /// Questions answered, positively or negatively.
    pub answered: Vec<Question>,

    /// The subset of answered questions whose answer was "does not
    /// exist".
    pub negatives: Vec<Question>,

    /// Cache records pinned for this task, in pin order.
    pub locked: Vec<RecordHandle>,

    /// The nameservers this task is working through.
    pub nameservers: NameserverList,

    /// Completed query rounds.
    pub iterations: u16,
    pub max_iterations: u16,

    /// When the retry timer fires, if armed.
    pub deadline: Option<Instant>,

    pub stub: bool,
    pub recursive: bool,

    /// Whether the configured servers have been appended to the
    /// nameserver list yet; that fallback happens at most once.
    pub used_default_servers: bool,

    on_success: Option<OnSuccess>,
    on_failure: Option<OnFailure>,
    on_drop: Option<OnDrop>,
}

impl Task {
    pub fn new(
        message_id: u16,
        questions: Vec<Question>,
        recursive: bool,
        stub: bool,
        max_iterations: u16,
        on_success: OnSuccess,
        on_failure: OnFailure,
        on_drop: Option<OnDrop>,
    ) -> Self {
        Self {
            message_id,
            pending: questions,
            answered: Vec::new(),
            negatives: Vec::new(),
            locked: Vec::new(),
            nameservers: NameserverList::new(),
            iterations: 0,
            max_iterations,
            deadline: None,
            stub,
            recursive,
            used_default_servers: false,
            on_success: Some(on_success),
            on_failure: Some(on_failure),
            on_drop,
        }
    }

    /// Pin a cache record to this task.  Each record is locked at most
    /// once per task, however many times it turns up.
    pub fn pin(&mut self, cache: &mut RrCache, handle: RecordHandle) {
        if !self.locked.contains(&handle) {
            cache.lock(handle);
            self.locked.push(handle);
        }
    }

    /// Terminate with success: categorise the pinned records, run the
    /// callback, release the locks.
    pub fn succeed(mut self, cache: &mut RrCache) {
        let answer = self.categorise(cache);
        if let Some(callback) = self.on_success.take() {
            callback(answer);
        }
        self.release_locks(cache);
    }

    /// Terminate with failure.
    pub fn fail(mut self, cache: &mut RrCache, error: ResolveError) {
        if let Some(callback) = self.on_failure.take() {
            callback(error);
        }
        self.release_locks(cache);
    }

    /// Terminate without invoking either result callback.  The drop
    /// hook still runs.
    pub fn cancel(mut self, cache: &mut RrCache) {
        self.on_success = None;
        self.on_failure = None;
        self.release_locks(cache);
    }

    fn release_locks(&mut self, cache: &mut RrCache) {
        for handle in self.locked.drain(..) {
            cache.unlock(handle);
        }
    }

    /// Sort the pinned records into the answer sections: a record that
    /// directly answers an answered question goes in `answers`, other
    /// NS records in `authority`, and everything else (glue, mostly)
    /// in `additional`.
    fn categorise(&self, cache: &RrCache) -> Answer {
        let mut answer = Answer {
            negatives: self.negatives.clone(),
            ..Answer::default()
        };

        for &handle in &self.locked {
            let Some(record) = cache.get(handle) else {
                continue;
            };

            let answers_a_question = self.answered.iter().any(|question| {
                question.name == record.name
                    && match question.qtype {
                        QueryType::Wildcard => true,
                        QueryType::Record(rtype) => {
                            rtype == record.rtype() || record.rtype() == RecordType::CNAME
                        }
                    }
            });

            if answers_a_question {
                answer.answers.push(record.clone());
            } else if record.rtype() == RecordType::NS {
                answer.authority.push(record.clone());
            } else {
                answer.additional.push(record.clone());
            }
        }

        answer
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}
