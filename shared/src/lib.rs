//! Protocol types shared by the session server and the session client.
//!
//! Holds the synchronized per-participant [`StateRecord`], its fixed 19-byte
//! binary encoding, the JSON control messages used for join/leave/liveness,
//! and the [`SessionConfig`] timing parameters both sides agree on.

pub mod codec;
pub mod config;
pub mod control;
pub mod state;

pub use codec::{decode_update, encode_update, CodecError, FRAME_LEN, WIRE_VERSION};
pub use config::{IdPolicy, SessionConfig};
pub use control::{ControlError, ControlMessage};
pub use state::{AnimationState, Orientation, Position, StateRecord};
