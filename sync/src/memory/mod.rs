//! In-process implementations of the collaborator traits.
//!
//! `MemoryQueue` stands in for on-device storage and `MemoryTransport` for
//! the central log with its realtime channel. Both are fully functional, and
//! the transport can be told to misbehave in the ways a real network does.

mod queue;
mod transport;

pub use queue::MemoryQueue;
pub use transport::MemoryTransport;
