//! Socket ownership for one link session
//!
//! A session owns exactly one [`Connection`]. It starts as a stream (TCP)
//! connection, either accepted as a server or dialled as a client, and may be
//! switched to datagrams (UDP) once the handshake has fixed the frame sizes.
//!
//! # Addressing after the switch
//!
//! | Role   | Datagram socket                  | Peer address                        |
//! |--------|----------------------------------|-------------------------------------|
//! | Server | bound to the old listen address  | refreshed from every datagram source |
//! | Client | bound to an ephemeral port       | the server address used to connect  |
//!
//! The peer address lives in a shared [`PeerSlot`] so the receiver thread can
//! refresh it while the caller thread sends.

mod receiver;

pub use receiver::FrameReceiver;

use crate::error::{Error, Result};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket as Socket2, Type};
use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Pending connections queued by the server listener
const LISTEN_BACKLOG: i32 = 1;

/// Datagram receive buffer requested after the switch to UDP
pub const DEFAULT_UDP_RECV_BUFFER: usize = 64;

/// Shared, refreshable peer address (single peer at a time)
pub type PeerSlot = Arc<Mutex<Option<SocketAddr>>>;

/// Which side of the link we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens and accepts exactly one peer
    Server,
    /// Connects to a listening peer
    Client,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(Error::Setup(format!(
                "invalid socket role '{}' (expected 'server' or 'client')",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Transport currently carrying frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => write!(f, "tcp"),
            TransportKind::Datagram => write!(f, "udp"),
        }
    }
}

enum Socket {
    Stream {
        stream: TcpStream,
        /// Kept open by the server until the switch to datagrams
        listener: Option<TcpListener>,
    },
    Datagram(UdpSocket),
}

/// Bound stream server waiting for its single peer
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until exactly one peer connects
    pub fn accept(self) -> Result<Connection> {
        let (stream, peer) = self.listener.accept()?;
        log::info!("Accepted TCP peer {} on {}", peer, self.local_addr);
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Connection {
            role: Role::Server,
            socket: Socket::Stream {
                stream,
                listener: Some(self.listener),
            },
            local_addr: self.local_addr,
            peer: Arc::new(Mutex::new(Some(peer))),
        })
    }
}

/// The single socket owned by a session
pub struct Connection {
    role: Role,
    socket: Socket,
    local_addr: SocketAddr,
    peer: PeerSlot,
}

impl Connection {
    /// Bind a stream server without accepting yet
    ///
    /// The listener reuses the address and queues at most one pending peer.
    pub fn bind(addr: &str, port: u16) -> Result<Acceptor> {
        let target = resolve(addr, port)?;
        let listener = listen_socket(target)
            .map_err(|e| Error::Setup(format!("failed to bind {}: {}", target, e)))?;
        let local_addr = listener.local_addr()?;
        log::info!("TCP server listening on {}", local_addr);
        Ok(Acceptor {
            listener,
            local_addr,
        })
    }

    /// Bind and accept exactly one stream peer
    pub fn listen(addr: &str, port: u16) -> Result<Self> {
        Self::bind(addr, port)?.accept()
    }

    /// Connect as a stream client with small-write coalescing disabled
    pub fn connect(addr: &str, port: u16) -> Result<Self> {
        let target = resolve(addr, port)?;
        let stream = TcpStream::connect(target)
            .map_err(|e| Error::Setup(format!("failed to connect to {}: {}", target, e)))?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        log::info!("TCP client connected to {} from {}", target, local_addr);

        Ok(Self {
            role: Role::Client,
            socket: Socket::Stream {
                stream,
                listener: None,
            },
            local_addr,
            peer: Arc::new(Mutex::new(Some(target))),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport(&self) -> TransportKind {
        match self.socket {
            Socket::Stream { .. } => TransportKind::Stream,
            Socket::Datagram(_) => TransportKind::Datagram,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current peer address (may change in datagram server mode)
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    pub fn peer_slot(&self) -> PeerSlot {
        Arc::clone(&self.peer)
    }

    /// Stream used by the handshake
    pub fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        match &mut self.socket {
            Socket::Stream { stream, .. } => Ok(stream),
            Socket::Datagram(_) => Err(Error::Protocol(
                "handshake requires a stream connection".to_string(),
            )),
        }
    }

    /// Read timeout for the receive path; `None` blocks indefinitely
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.socket {
            Socket::Stream { stream, .. } => stream.set_read_timeout(timeout)?,
            Socket::Datagram(socket) => socket.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Replace the stream socket with a datagram socket on the same addressing
    ///
    /// Frame sizes are untouched; only the carrier changes. `recv_buffer`
    /// sets the datagram receive buffer size (OS default when `None`). The
    /// datagram socket is bound before the stream is closed, so a failed
    /// switch leaves the stream connection usable.
    pub fn switch_to_datagram(&mut self, recv_buffer: Option<usize>) -> Result<()> {
        if matches!(self.socket, Socket::Datagram(_)) {
            return Err(Error::Protocol(
                "connection already uses datagrams".to_string(),
            ));
        }

        let bind = match self.role {
            Role::Server => self.local_addr,
            // Same interface as the TCP connection, fresh ephemeral port
            Role::Client => SocketAddr::new(self.local_addr.ip(), 0),
        };
        let udp = datagram_socket(bind, recv_buffer)
            .map_err(|e| Error::Setup(format!("failed to bind UDP {}: {}", bind, e)))?;
        let local_addr = udp.local_addr()?;

        // Dropping the old variant closes the stream and any listener
        self.socket = Socket::Datagram(udp);
        self.local_addr = local_addr;
        log::info!("Closed TCP socket(s), reconfigured to UDP");

        match self.role {
            Role::Server => log::info!("UDP server listening on {}", local_addr),
            Role::Client => log::info!(
                "UDP client on {}, server address kept as {:?}",
                local_addr,
                self.peer_addr()
            ),
        }
        Ok(())
    }

    /// Transmit one encoded frame to the current peer
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        match &self.socket {
            Socket::Stream { stream, .. } => {
                let mut writer: &TcpStream = stream;
                writer.write_all(frame)?;
            }
            Socket::Datagram(socket) => {
                let Some(target) = self.peer_addr() else {
                    return Err(Error::Protocol("no peer address to send to".to_string()));
                };
                let sent = socket.send_to(frame, target)?;
                if sent != frame.len() {
                    return Err(Error::FrameSize {
                        expected: frame.len(),
                        actual: sent,
                    });
                }
            }
        }
        Ok(())
    }

    /// Independent receive handle for the receiver thread
    pub fn receiver(&self, frame_size: usize) -> Result<FrameReceiver> {
        let handle = match &self.socket {
            Socket::Stream { stream, .. } => receiver::RecvSocket::Stream(stream.try_clone()?),
            Socket::Datagram(socket) => receiver::RecvSocket::Datagram(socket.try_clone()?),
        };
        Ok(FrameReceiver::new(
            handle,
            self.role,
            self.peer_slot(),
            frame_size,
        ))
    }
}

fn listen_socket(target: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket2::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&target.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

fn datagram_socket(bind: SocketAddr, recv_buffer: Option<usize>) -> std::io::Result<UdpSocket> {
    let socket = Socket2::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(size) = recv_buffer {
        socket.set_recv_buffer_size(size)?;
    }
    socket.bind(&bind.into())?;
    Ok(socket.into())
}

fn resolve(addr: &str, port: u16) -> Result<SocketAddr> {
    (addr, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Setup(format!("could not resolve {}:{}", addr, port)))
}
