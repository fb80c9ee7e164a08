use std::ffi::CStr;
use std::net::Ipv4Addr;

/// How an [`Interface`] entry came to be in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceOrigin {
    /// Enumerated from the OS at startup.
    Detected,
    /// Registered at runtime through the process state interface's
    /// add-by-IP call.
    UserAdded,
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub index: u32,
    pub addr: Ipv4Addr,
    pub description: String,
    pub origin: InterfaceOrigin,
}

/// Startup-populated ordered sequence of network interfaces. Wildcard,
/// no-IP port configs expand into one listener per entry.
#[derive(Default)]
pub struct InterfaceList {
    interfaces: Vec<Interface>,
}

impl InterfaceList {
    pub fn new() -> InterfaceList {
        InterfaceList { interfaces: Vec::new() }
    }

    /// Procedure-added entries append after detection, so callers that
    /// iterate in order always see OS-detected interfaces before manually
    /// registered ones.
    pub fn add(&mut self, addr: Ipv4Addr, description: impl Into<String>, origin: InterfaceOrigin) -> u32 {
        let index = self.interfaces.len() as u32;
        self.interfaces.push(Interface { index, addr, description: description.into(), origin });
        index
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interface> {
        self.interfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn find_by_addr(&self, addr: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.addr == addr)
    }

    /// Populates the list from the OS's configured interfaces via
    /// `getifaddrs(3)`. Only IPv4 entries are recorded — the core is
    /// explicitly IPv4-only. Startup-only: a running process adds further
    /// entries through [`InterfaceList::add`] with
    /// [`InterfaceOrigin::UserAdded`].
    pub fn detect() -> InterfaceList {
        let mut list = InterfaceList::new();
        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        if unsafe { libc::getifaddrs(&mut head) } != 0 {
            return list;
        }

        let mut cursor = head;
        while !cursor.is_null() {
            let entry = unsafe { &*cursor };
            if !entry.ifa_addr.is_null() {
                let family = unsafe { (*entry.ifa_addr).sa_family } as libc::c_int;
                if family == libc::AF_INET {
                    let sockaddr = entry.ifa_addr as *const libc::sockaddr_in;
                    let addr_bits = unsafe { (*sockaddr).sin_addr.s_addr };
                    let addr = Ipv4Addr::from(u32::from_be(addr_bits));
                    let name = unsafe { CStr::from_ptr(entry.ifa_name) }.to_string_lossy().into_owned();
                    list.add(addr, name, InterfaceOrigin::Detected);
                }
            }
            cursor = entry.ifa_next;
        }

        unsafe { libc::freeifaddrs(head) };
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_before_user_added_order_preserved() {
        let mut list = InterfaceList::new();
        list.add(Ipv4Addr::new(127, 0, 0, 1), "lo", InterfaceOrigin::Detected);
        list.add(Ipv4Addr::new(10, 0, 0, 5), "eth0", InterfaceOrigin::Detected);
        list.add(Ipv4Addr::new(192, 168, 1, 1), "manual", InterfaceOrigin::UserAdded);

        let collected: Vec<_> = list.iter().map(|i| i.origin).collect();
        assert_eq!(
            collected,
            vec![InterfaceOrigin::Detected, InterfaceOrigin::Detected, InterfaceOrigin::UserAdded]
        );
        assert_eq!(list.find_by_addr(Ipv4Addr::new(10, 0, 0, 5)).unwrap().index, 1);
    }

    #[test]
    fn detect_finds_loopback() {
        let list = InterfaceList::detect();
        assert!(
            list.find_by_addr(Ipv4Addr::new(127, 0, 0, 1)).is_some(),
            "every network namespace with a loopback device should report 127.0.0.1"
        );
        assert!(list.iter().all(|i| i.origin == InterfaceOrigin::Detected));
    }
}
