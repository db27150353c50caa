#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

//! A recursive DNS resolver client.
//!
//! The [`Client`] drives any number of concurrent resolution tasks over
//! one shared UDP transport: it answers questions from its record cache
//! where it can, walks the zone hierarchy (or leans on the configured
//! nameservers in stub mode) where it cannot, follows CNAME chains,
//! retries with exponential backoff, and refuses to cache any record
//! from a peer that has not been granted authority over the record's
//! owner name.
//!
//! The client itself is a plain state machine: feed it packets and
//! clock readings, drain its outbound queue.  [`net::drive_udp`] binds
//! it to a real socket.

pub mod authority;
pub mod cache;
pub mod client;
mod engine;
pub mod metrics;
pub mod nameserver;
pub mod net;
pub mod system;
mod task;
pub mod types;

pub use self::client::{Client, TaskHandle};
pub use self::types::{Answer, ResolveError};

/// The well-known DNS port.
pub const DNS_PORT: u16 = 53;
