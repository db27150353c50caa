//! Binding a [`Client`] to a real UDP socket.
//!
//! The client itself never touches the network; this module is the
//! event loop around it.  One socket is shared by every task: inbound
//! packets are handed to the client, the outbound queue is drained
//! whenever the socket will take it, and the retry timer is the only
//! other thing that can wake the loop.

use std::io;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::sleep_until;

use crate::client::Client;

/// UDP DNS messages fit in 512 octets.
const MAX_UDP_MESSAGE: usize = 512;

/// How long the loop sleeps when no task has a retry pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Drive the client over a UDP socket until no tasks remain
/// outstanding.
///
/// Socket errors fail every outstanding task with `TransportClosed`
/// before the error is returned, because message ids cannot be
/// re-synchronised on a fresh socket.
pub async fn drive_udp(client: &mut Client, socket: &UdpSocket) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_UDP_MESSAGE];

    loop {
        while let Some((octets, server)) = client.next_outbound() {
            if let Err(error) = socket.send_to(&octets, server).await {
                tracing::error!(%server, ?error, "UDP send error, failing all tasks");
                client.fail_all();
                return Err(error);
            }
        }

        if client.outstanding() == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let deadline = client
            .next_deadline()
            .unwrap_or_else(|| now + IDLE_WAIT)
            .max(now);

        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((size, peer)) => client.handle_packet(&buf[..size], peer, Instant::now()),
                Err(error) => {
                    tracing::error!(?error, "UDP receive error, failing all tasks");
                    client.fail_all();
                    return Err(error);
                }
            },
            () = sleep_until(tokio::time::Instant::from_std(deadline)) => {
                client.handle_timeouts(Instant::now());
            }
        }
    }
}
