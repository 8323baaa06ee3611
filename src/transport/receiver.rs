//! Receive half of a connection, owned by the receiver thread

use super::{PeerSlot, Role};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, UdpSocket};

pub(super) enum RecvSocket {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// Reads one inbound frame at a time
///
/// Stream reads accumulate across read timeouts so a frame split by a
/// timeout is resumed, not dropped. Datagram reads use a buffer one byte
/// larger than the frame so oversized datagrams show up with the wrong length.
pub struct FrameReceiver {
    socket: RecvSocket,
    role: Role,
    peer: PeerSlot,
    frame_size: usize,
    buffer: Vec<u8>,
    /// Bytes of a partial stream frame already read
    filled: usize,
}

impl FrameReceiver {
    pub(super) fn new(socket: RecvSocket, role: Role, peer: PeerSlot, frame_size: usize) -> Self {
        Self {
            socket,
            role,
            peer,
            frame_size,
            buffer: vec![0u8; frame_size + 1],
            filled: 0,
        }
    }

    /// Negotiated inbound frame size
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Receive the next frame
    ///
    /// Returns `Ok(None)` when the read timed out before a full frame was
    /// available. A closed stream is reported as `UnexpectedEof`.
    pub fn recv_frame(&mut self) -> Result<Option<&[u8]>> {
        match &mut self.socket {
            RecvSocket::Stream(stream) => {
                while self.filled < self.frame_size {
                    match stream.read(&mut self.buffer[self.filled..self.frame_size]) {
                        Ok(0) => {
                            self.filled = 0;
                            return Err(Error::Io(std::io::Error::new(
                                ErrorKind::UnexpectedEof,
                                "peer closed the stream",
                            )));
                        }
                        Ok(n) => self.filled += n,
                        Err(e) if is_timeout(&e) => return Ok(None),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            self.filled = 0;
                            return Err(Error::Io(e));
                        }
                    }
                }
                self.filled = 0;
                Ok(Some(&self.buffer[..self.frame_size]))
            }
            RecvSocket::Datagram(socket) => match socket.recv_from(&mut self.buffer) {
                Ok((n, source)) => {
                    if self.role == Role::Server {
                        let mut peer = self.peer.lock();
                        if *peer != Some(source) {
                            log::info!("UDP peer address now {}", source);
                            *peer = Some(source);
                        }
                    }
                    Ok(Some(&self.buffer[..n]))
                }
                Err(e) if is_timeout(&e) => Ok(None),
                Err(e) => Err(Error::Io(e)),
            },
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
