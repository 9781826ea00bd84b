//! Tally state management and UDP endpoints for the UMDv5 protocol defined in
//! the `umd_proto` crate.
//!
//! ## Scope
//!
//! - [`Tally`] and [`Screen`]: long-lived state, updated either locally or by
//!   received messages, with change notification.
//! - [`UmdReceiver`]: applies received datagrams to its screens.
//! - [`UmdSender`]: turns local tally changes into batched messages, and
//!   periodically refreshes everything it knows.
//!
//! Endpoints are transport-agnostic: they send and receive through the
//! [`UdpSock`] trait, implemented for [`std::net::UdpSocket`].
//!
//! Both endpoints expect to be driven from a single thread. Events are delivered
//! synchronously, before the mutating call returns.

pub mod receiver;
pub mod screen;
pub mod sender;
pub mod tally;

pub use receiver::{ReceiverConfig, ReceiverEvent, UmdReceiver};
pub use screen::{Screen, ScreenEvent};
pub use sender::{SenderConfig, UmdSender};
pub use tally::{Tally, TallyEvent, TallyFields, TallyKey, TallyUpdate};
pub use umd_proto;

use core::{net::SocketAddr, time::Duration};
use umd_proto::{BuildError, ParseError};

/// The customary UMDv5 UDP port.
pub const DEFAULT_PORT: u16 = 65000;

/// Screens or tallies, keyed by their index.
pub(crate) type IndexMap<V> = rustc_hash::FxHashMap<u16, V>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("tally {0} already exists")]
    TallyExists(TallyKey),
    /// Broadcast tallies are transient, and can't be stored.
    #[error("cannot store a tally with the broadcast index")]
    BroadcastTally,
    #[error("no lamp position given")]
    NoTallyType,
}

/// A datagram socket, as used by the endpoints of this crate.
pub trait UdpSock {
    /// Sends `buf` as a single datagram to `addr`.
    ///
    /// Implementations must fail if the datagram could not be sent whole.
    fn send(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<()>;

    /// Receives a single datagram, returns its length and source address.
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;

    /// Sets the timeout of [`recv`](Self::recv), `None` blocks indefinitely.
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl UdpSock for std::net::UdpSocket {
    #[inline(always)]
    fn send(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        self.send_to(buf, addr).and_then(|n| {
            (n == buf.len())
                .then_some(())
                .ok_or(std::io::ErrorKind::FileTooLarge.into())
        })
    }

    #[inline(always)]
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.recv_from(buf)
    }

    #[inline(always)]
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

impl<T: UdpSock + ?Sized> UdpSock for &T {
    #[inline(always)]
    fn send(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        T::send(self, buf, addr)
    }

    #[inline(always)]
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        T::recv(self, buf)
    }

    #[inline(always)]
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        T::set_recv_timeout(self, timeout)
    }
}

/// Returns `true` if the given I/O error kind represents a timeout condition.
///
/// This treats both `WouldBlock` and `TimedOut` as timeout-equivalent, which
/// is useful when working with non-blocking or socket-based transports.
#[inline(always)]
pub(crate) fn io_err_is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&e)
}
