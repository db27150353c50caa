/// Counters kept by the client as it works.  The client updates this
/// structure rather than talking to any metrics system directly; hosts
/// read a snapshot whenever they like.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Questions answered from the cache without a network round trip.
    pub cache_hits: u64,
    /// Questions answered from the negative-answer memo.
    pub negative_hits: u64,
    /// Query messages handed to the transport.
    pub queries_sent: u64,
    /// Query rounds triggered by the retry timer.
    pub retries: u64,
    /// Records dropped because the sending peer had no authority over
    /// the owner name.
    pub untrusted_drops: u64,
    /// Responses with a matching id but nothing relevant in them.
    pub useless_responses: u64,
    /// Inbound packets that did not decode as DNS messages.
    pub decode_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}
