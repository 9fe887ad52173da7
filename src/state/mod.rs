//! Document state management.
//!
//! - [`replica`]: the CRDT document wrapper
//! - [`room`]: one actor per open document
//! - [`registry`]: document id to live room mapping

pub mod registry;
pub mod replica;
pub mod room;

pub use registry::RoomRegistry;
pub use replica::{Replica, ReplicaError};
pub use room::{ConnectionId, Frame, JoinAck, MemberHandle, RoomError, RoomHandle, RoomSettings};
