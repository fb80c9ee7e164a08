//! Utility containers shared by the serveez core runtime.
//!
//! These are deliberately small: a dynamic array with an optional element
//! destructor, a string/small-key hash map, a socket-id-keyed side table,
//! and an ordered interface list. Nothing here is serveez-specific; the
//! core crate builds the socket/port/binding model on top of them.

mod array;
mod iface;
mod map;
mod sidetable;

pub use array::Array;
pub use iface::{Interface, InterfaceList, InterfaceOrigin};
pub use map::Map;
pub use sidetable::SideTable;
