//! ICMP: like [`crate::transport::raw`], but several serveez tenants can
//! share one raw ICMP socket by tagging packets with a sub-type byte
//! right after the standard 8-byte ICMP header.

use super::matching_bindings;
use crate::error::{Result, ServeezError};
use crate::runtime::Runtime;
use crate::socket::{Handle, SocketId};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const MAX_PACKET: usize = 65536;
const ICMP_HEADER_LEN: usize = 8;

fn subtype_of(packet: &[u8]) -> Option<u8> {
    packet.get(ICMP_HEADER_LEN).copied()
}

pub fn on_readable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let mut buf = [0u8; MAX_PACKET];
    loop {
        let fd = match rt.sockets.get(&id) {
            Some(s) => match &s.handle {
                Handle::Raw(fd) => *fd,
                _ => return Ok(()),
            },
            None => return Ok(()),
        };

        let n = match super::raw::read_fd(fd, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(ServeezError::from(e)),
        };

        let subtype = subtype_of(&buf[..n]);
        let bindings = matching_bindings(rt, id, false);
        let target = bindings.into_iter().find(|b| Some(b.port.icmp_subtype) == subtype);

        if let Some(binding) = target {
            let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
            let handled = crate::server::ServerRegistry::with(rt, &binding.server, |instance, rt| {
                instance.server.handle_datagram(rt, id, &buf[..n], from)
            });
            if let Some(result) = handled {
                result?;
            }
        }

        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.last_recv = std::time::Instant::now();
        }
    }
}

pub fn on_writable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    super::raw::on_writable(rt, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_reads_byte_after_icmp_header() {
        let mut packet = vec![0u8; ICMP_HEADER_LEN];
        packet.push(0x07);
        assert_eq!(subtype_of(&packet), Some(0x07));
    }

    #[test]
    fn subtype_missing_on_short_packet() {
        assert_eq!(subtype_of(&[0u8; 4]), None);
    }
}
