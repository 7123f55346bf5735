//! # swarm-wire: byte area, messages and framed channels
//!
//! Wire-level support for the swarmdc coordination core:
//!
//! - [`Buffer`]: a growable byte area with boundary-checked reads, writes
//!   and seeks, little-endian primitive codecs and length-prefixed strings.
//! - [`TypeCode`]: 64-bit message type codes packed from short
//!   alphanumeric tags, with a distinguished null code.
//! - [`MessageData`] / [`Message`] / [`MessageRegistry`]: typed message
//!   bodies, their object-safe erasure, and the decode registry with
//!   fail-fast collision detection.
//! - [`WorkerResponse`]: the fixed reply envelope (requested state plus
//!   optional payload) every worker sends back to the master.
//! - [`Channel`]: framed message transport (8-byte length ∥ byte area)
//!   over any async byte stream.
//!
//! Everything here is deliberately independent of the coordination logic;
//! the `swarm-core` crate builds the state graph, worker driver and swarm
//! manager on top of these primitives.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod message;
pub mod typecode;

pub use buffer::{Buffer, DEFAULT_CHUNK_SIZE};
pub use channel::{Channel, MAX_FRAME_LEN};
pub use error::{Result, WireError};
pub use message::{
    write_message, Message, MessageData, MessageRegistry, RequestedState, WorkerResponse,
};
pub use typecode::{TypeCode, MAX_NAME_LEN, NULL_TYPE_CODE};
