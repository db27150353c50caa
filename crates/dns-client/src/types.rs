use std::fmt;
use std::net::SocketAddr;

use dns_wire::types::*;

/// What a successful task hands to its callback: the locked records
/// sorted into sections, plus the questions answered negatively.
///
/// The record lists are owned copies; they stay valid after the
/// callback returns.
#[derive(Debug, Clone, Default)]
pub struct Answer {
    /// Records directly answering an answered question.
    pub answers: Vec<ResourceRecord>,

    /// Nameserver records picked up along the way.
    pub authority: Vec<ResourceRecord>,

    /// Everything else the task held onto, glue addresses mostly.
    pub additional: Vec<ResourceRecord>,

    /// Questions with a fresh negative answer: the name/type/class is
    /// known not to exist.
    pub negatives: Vec<Question>,
}

/// Invoked with the collected records when every question has been
/// answered (positively or negatively).
pub type OnSuccess = Box<dyn FnOnce(Answer) + Send>;

/// Invoked when the task fails.
pub type OnFailure = Box<dyn FnOnce(ResolveError) + Send>;

/// Invoked exactly once when the task is torn down, whether it
/// succeeded, failed, or was cancelled.
pub type OnDrop = Box<dyn FnOnce() + Send>;

/// An error that ends a resolution task.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResolveError {
    /// The nameserver said the name does not exist.
    NotFound { question: Question },
    /// The nameserver could not interpret our query.
    FormatError { peer: SocketAddr },
    /// The nameserver answered with a server-side error code.
    ServerProblem { peer: SocketAddr, detail: ServerDetail },
    /// There is nowhere to send a query: no nameserver was learned and
    /// none is configured.
    NoNameServers,
    /// The task sent its full allowance of query rounds without
    /// getting an answer.
    TooManyRetries { iterations: u16 },
    /// A CNAME chain came back around to a name already visited.
    CircularCname { name: DomainName },
    /// The shared transport shut down with queries outstanding, so
    /// responses can no longer be matched up.
    TransportClosed,
}

/// Which server-side error code a `ServerProblem` reflects.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ServerDetail {
    Failure,
    NotImplemented,
    Refused,
    UnexpectedRcode,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolveError::NotFound { question } => {
                write!(f, "name '{}' not found", question.name)
            }
            ResolveError::FormatError { peer } => {
                write!(f, "nameserver {peer} reported a format error in our query")
            }
            ResolveError::ServerProblem { peer, detail } => match detail {
                ServerDetail::Failure => write!(f, "nameserver {peer}: server failure"),
                ServerDetail::NotImplemented => {
                    write!(f, "nameserver {peer}: query not implemented")
                }
                ServerDetail::Refused => write!(f, "nameserver {peer}: query refused"),
                ServerDetail::UnexpectedRcode => {
                    write!(f, "nameserver {peer}: unexpected response code")
                }
            },
            ResolveError::NoNameServers => write!(f, "no nameservers to ask"),
            ResolveError::TooManyRetries { iterations } => {
                write!(f, "gave up after {iterations} query rounds")
            }
            ResolveError::CircularCname { name } => {
                write!(f, "circular reference in CNAMEs for '{name}'")
            }
            ResolveError::TransportClosed => {
                write!(f, "transport closed with queries outstanding")
            }
        }
    }
}

impl std::error::Error for ResolveError {}
