//! Default per-protocol read/write/accept routines. Each
//! submodule implements the same shape: pull bytes off the wire into
//! the socket's buffers, pump them through any attached codec, then
//! hand off to the bound server via [`crate::reactor::invoke`].

pub mod icmp;
pub mod pipe;
pub mod raw;
pub mod tcp;
pub mod udp;

use crate::binding::Binding;
use crate::error::{Result, ServeezError};
use crate::runtime::Runtime;
use crate::socket::SocketId;

/// Looks up the bindings attached to `listener_id` and narrows them to
/// the ones matching `socket`'s local address. Used by every multiplexed
/// protocol (UDP/ICMP/RAW) and by TCP accept.
pub(crate) fn matching_bindings(rt: &Runtime, listener_id: SocketId, is_pipe: bool) -> Vec<Binding> {
    let local = match rt.sockets.get(&listener_id).and_then(|s| s.local_addr) {
        Some(addr) => addr,
        None => return Vec::new(),
    };
    match rt.bindings.get(listener_id) {
        Some(bindings) => crate::binding::filter(bindings, local, is_pipe).into_iter().cloned().collect(),
        None => Vec::new(),
    }
}

/// Common "no server bound" failure for a listener with an empty
/// binding list.
pub(crate) fn no_binding() -> Result<()> {
    Err(ServeezError::Fatal(crate::error::Kind::Configuration("no server bound to this port".into())))
}

/// Installs default `disconnected_socket`/`kicked_socket` vtable slots
/// that simply forward to the bound server's [`crate::server::ServerType`]
/// hooks, so a server only has to override the trait method instead of
/// also wiring the socket's callback vtable by hand. Called right after
/// a stream/pipe socket is
/// admitted, before `connect_socket` runs — a server's `connect_socket`
/// is still free to replace either slot with bespoke framing.
pub(crate) fn install_default_notifications(rt: &mut crate::runtime::Runtime, id: SocketId, server_name: &str) {
    let disconnect_name = server_name.to_string();
    let kick_name = server_name.to_string();
    if let Some(socket) = rt.sockets.get_mut(&id) {
        socket.callbacks.disconnected_socket = Some(Box::new(move |rt, id| {
            crate::server::ServerRegistry::with(rt, &disconnect_name, |instance, rt| {
                instance.server.disconnected_socket(rt, id)
            });
            Ok(())
        }));
        socket.callbacks.kicked_socket = Some(Box::new(move |rt, id| {
            crate::server::ServerRegistry::with(rt, &kick_name, |instance, rt| instance.server.kicked_socket(rt, id));
            Ok(())
        }));
    }
}
