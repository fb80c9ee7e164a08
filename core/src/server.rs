//! Server types: the pluggable protocol logic bound to ports via
//! [`crate::binding::Binding`].

use crate::error::Result;
use crate::runtime::Runtime;
use crate::socket::SocketId;
use std::collections::HashMap;

/// The callbacks an implementor supplies to add a new protocol to the
/// runtime. All have sensible no-op defaults so a server only overrides
/// what it needs, mirroring how thin most real servers turn out to be.
pub trait ServerType: Send {
    fn type_name(&self) -> &str;

    /// Runs once, the first time any instance of this type is created.
    fn global_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs once per instance, right after construction.
    fn init(&mut self, _instance: &str) -> Result<()> {
        Ok(())
    }

    /// For multiplexed listeners (UDP/ICMP/RAW), decides whether an
    /// inbound packet belongs to this server before `handle_request`
    /// runs.
    fn detect_proto(&mut self, _rt: &mut Runtime, _id: SocketId) -> bool {
        true
    }

    /// Runs once a TCP/pipe connection has been accepted and bound to
    /// this server.
    fn connect_socket(&mut self, _rt: &mut Runtime, _id: SocketId) -> Result<()> {
        Ok(())
    }

    /// Stream/pipe request framing: inspects the receive buffer and
    /// returns the number of bytes that form one complete request, if
    /// any.
    fn check_request(&mut self, _rt: &mut Runtime, _id: SocketId) -> Option<usize> {
        None
    }

    /// Processes one complete request of `len` bytes already confirmed
    /// by `check_request`.
    fn handle_request(&mut self, _rt: &mut Runtime, _id: SocketId, _len: usize) -> Result<()> {
        Ok(())
    }

    /// Datagram-style request handling (UDP/ICMP/RAW): the whole packet
    /// arrives in one call, addressed by `from`.
    fn handle_datagram(
        &mut self,
        _rt: &mut Runtime,
        _id: SocketId,
        _data: &[u8],
        _from: std::net::SocketAddr,
    ) -> Result<()> {
        Ok(())
    }

    fn disconnected_socket(&mut self, _rt: &mut Runtime, _id: SocketId) {}

    fn kicked_socket(&mut self, _rt: &mut Runtime, _id: SocketId) {}

    /// Periodic housekeeping, run once per reactor tick across every
    /// instance regardless of socket activity.
    fn notify(&mut self, _rt: &mut Runtime) {}

    fn finalize(&mut self, _rt: &mut Runtime, _instance: &str) {}

    fn global_finalize(&mut self) {}

    /// One-line status text for `info_server`-style introspection.
    fn info(&self) -> String {
        String::new()
    }
}

/// A named, constructed server ready to be bound to ports.
pub struct ServerInstance {
    pub name: String,
    pub type_name: String,
    pub server: Box<dyn ServerType>,
}

/// Registry of instantiated servers, keyed by instance name — a binding
/// names a server *instance*, not a type.
#[derive(Default)]
pub struct ServerRegistry {
    instances: HashMap<String, ServerInstance>,
    order: Vec<String>,
}

impl ServerRegistry {
    pub fn new() -> ServerRegistry {
        ServerRegistry::default()
    }

    /// Registers a constructed instance under `name`, running its
    /// `init` hook. Returns an error if the name is already taken.
    pub fn register(&mut self, name: impl Into<String>, mut server: Box<dyn ServerType>) -> Result<()> {
        let name = name.into();
        if self.instances.contains_key(&name) {
            return Err(crate::error::ServeezError::Fatal(crate::error::Kind::Configuration(format!(
                "duplicate server instance name {name}"
            ))));
        }
        server.init(&name)?;
        let type_name = server.type_name().to_string();
        self.order.push(name.clone());
        self.instances.insert(name.clone(), ServerInstance { name, type_name, server });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerInstance> {
        self.instances.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServerInstance> {
        self.instances.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Removes `name`'s instance so its callbacks can run with
    /// unaliased `&mut Runtime` access (the same take-call-restore shape
    /// as socket callbacks, see [`crate::reactor::invoke`]). Pair with
    /// [`Self::put`].
    pub fn take(&mut self, name: &str) -> Option<ServerInstance> {
        self.instances.remove(name)
    }

    pub fn put(&mut self, instance: ServerInstance) {
        self.instances.insert(instance.name.clone(), instance);
    }

    /// Runs `f` with the named instance and `rt` both available,
    /// restoring the instance into the registry afterward regardless of
    /// outcome.
    pub fn with<R>(rt: &mut Runtime, name: &str, f: impl FnOnce(&mut ServerInstance, &mut Runtime) -> R) -> Option<R> {
        let mut instance = rt.servers.take(name)?;
        let result = f(&mut instance, rt);
        rt.servers.put(instance);
        Some(result)
    }

    /// Drives `notify` across every registered instance; called once per
    /// reactor tick.
    pub fn notify_all(&mut self, rt: &mut Runtime) {
        let names: Vec<String> = self.order.clone();
        for name in names {
            // Removed for the duration of the call so `notify` can see
            // the rest of the registry through `rt` without aliasing
            // the instance it's running on.
            if let Some(mut instance) = self.instances.remove(&name) {
                instance.server.notify(rt);
                self.instances.insert(name, instance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl ServerType for Echo {
        fn type_name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut reg = ServerRegistry::new();
        reg.register("echo1", Box::new(Echo)).unwrap();
        let err = reg.register("echo1", Box::new(Echo));
        assert!(err.is_err());
    }

    #[test]
    fn get_finds_registered_instance_by_name() {
        let mut reg = ServerRegistry::new();
        reg.register("echo1", Box::new(Echo)).unwrap();
        assert_eq!(reg.get("echo1").unwrap().type_name, "echo");
        assert!(reg.get("missing").is_none());
    }
}
