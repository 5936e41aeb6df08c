//! Managed wrapper for the query UDP listener

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by [`UdpBinding`] reads and writes. Deadline expiry is
/// distinguishable from fatal errors so the read loop can resume cleanly.
#[derive(Debug, Error)]
pub(crate) enum BindError {
    /// The binding has been closed; the loop should exit.
    #[error("binding is closed")]
    Closed,

    /// The per-operation deadline elapsed without a datagram.
    #[error("read deadline expired")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A bound UDPv4 socket with explicit buffer sizes and per-operation
/// read/write deadlines.
pub(crate) struct UdpBinding {
    socket: UdpSocket,
    closed: CancellationToken,
    read_deadline: Duration,
    write_deadline: Duration,
}

impl UdpBinding {
    /// Binds `0.0.0.0:<port>` and applies the requested socket buffer sizes
    /// before handing the socket to the runtime.
    pub async fn bind(
        port: u16,
        read_buffer_bytes: usize,
        write_buffer_bytes: usize,
        read_deadline: Duration,
        write_deadline: Duration,
    ) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_recv_buffer_size(read_buffer_bytes)?;
        socket.set_send_buffer_size(write_buffer_bytes)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

        Ok(Self {
            socket: UdpSocket::from_std(socket.into())?,
            closed: CancellationToken::new(),
            read_deadline,
            write_deadline,
        })
    }

    /// Reads one datagram into `buf`, waiting at most the read deadline.
    pub async fn read(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), BindError> {
        if self.is_closed() {
            return Err(BindError::Closed);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(BindError::Closed),
            result = timeout(self.read_deadline, self.socket.recv_from(buf)) => match result {
                Err(_) => Err(BindError::Timeout),
                Ok(Ok((n, peer))) => Ok((n, peer)),
                Ok(Err(e)) => Err(BindError::Io(e)),
            }
        }
    }

    /// Writes `buf` to `to`, waiting at most the write deadline. Unlike
    /// reads, an expired write deadline is an I/O error: the response is
    /// lost and the caller reports it.
    pub async fn write(&self, buf: &[u8], to: SocketAddr) -> Result<usize, BindError> {
        if self.is_closed() {
            return Err(BindError::Closed);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(BindError::Closed),
            result = timeout(self.write_deadline, self.socket.send_to(buf, to)) => match result {
                Err(_) => Err(BindError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write deadline expired",
                ))),
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) => Err(BindError::Io(e)),
            }
        }
    }

    /// Marks the binding as closed. Idempotent; pending and subsequent
    /// reads fail with [`BindError::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
