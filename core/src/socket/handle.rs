use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream, UdpSocket as MioUdpSocket};
use mio::unix::EventedFd;
use mio::{Evented, Poll, PollOpt, Ready, Token};
use std::io;
use std::os::unix::io::RawFd;

/// The underlying OS resource backing a [`crate::socket::Socket`]. A raw
/// or ICMP socket, and each end of a pipe pair, are plain file
/// descriptors registered with mio via [`EventedFd`] — mio has no
/// first-class raw-socket or named-pipe type, even though ICMP/RAW/pipe
/// are otherwise identical in shape to the stream/datagram cases.
pub enum Handle {
    TcpListener(MioTcpListener),
    TcpStream(MioTcpStream),
    Udp(MioUdpSocket),
    /// A raw or ICMP socket; the `i32` is the raw file descriptor.
    Raw(RawFd),
    /// A pipe pair: separate read and write endpoints.
    Pipe { recv_fd: RawFd, send_fd: RawFd },
}

impl Handle {
    pub fn raw_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        match self {
            Handle::TcpListener(l) => l.as_raw_fd(),
            Handle::TcpStream(s) => s.as_raw_fd(),
            Handle::Udp(s) => s.as_raw_fd(),
            Handle::Raw(fd) => *fd,
            Handle::Pipe { recv_fd, .. } => *recv_fd,
        }
    }

    /// The descriptor to register for write-readiness. For a pipe pair
    /// this is the send side, which otherwise shares no descriptor with
    /// the recv side's registration.
    pub fn write_fd(&self) -> RawFd {
        match self {
            Handle::Pipe { send_fd, .. } => *send_fd,
            other => other.raw_fd(),
        }
    }
}

impl Evented for Handle {
    fn register(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        match self {
            Handle::TcpListener(l) => l.register(poll, token, interest, opts),
            Handle::TcpStream(s) => s.register(poll, token, interest, opts),
            Handle::Udp(s) => s.register(poll, token, interest, opts),
            Handle::Raw(fd) => EventedFd(fd).register(poll, token, interest, opts),
            Handle::Pipe { recv_fd, send_fd } => {
                EventedFd(recv_fd).register(poll, token, interest, opts)?;
                if send_fd != recv_fd {
                    EventedFd(send_fd).register(poll, token, interest, opts)?;
                }
                Ok(())
            }
        }
    }

    fn reregister(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        match self {
            Handle::TcpListener(l) => l.reregister(poll, token, interest, opts),
            Handle::TcpStream(s) => s.reregister(poll, token, interest, opts),
            Handle::Udp(s) => s.reregister(poll, token, interest, opts),
            Handle::Raw(fd) => EventedFd(fd).reregister(poll, token, interest, opts),
            Handle::Pipe { recv_fd, send_fd } => {
                EventedFd(recv_fd).reregister(poll, token, interest, opts)?;
                if send_fd != recv_fd {
                    EventedFd(send_fd).reregister(poll, token, interest, opts)?;
                }
                Ok(())
            }
        }
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        match self {
            Handle::TcpListener(l) => l.deregister(poll),
            Handle::TcpStream(s) => s.deregister(poll),
            Handle::Udp(s) => s.deregister(poll),
            Handle::Raw(fd) => EventedFd(fd).deregister(poll),
            Handle::Pipe { recv_fd, send_fd } => {
                EventedFd(recv_fd).deregister(poll)?;
                if send_fd != recv_fd {
                    EventedFd(send_fd).deregister(poll)?;
                }
                Ok(())
            }
        }
    }
}
