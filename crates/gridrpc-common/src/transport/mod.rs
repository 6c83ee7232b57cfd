//! Framed transport
//!
//! Every message travels as one frame: the payload length in ASCII decimal,
//! a colon, then exactly that many payload bytes.
//!
//! ```text
//! 11:{"ok":true}
//! ```
//!
//! - **[`frame`]**: frame encoding and the incremental [`FrameReader`]
//! - **[`JsonCodec`]**: JSON encoding of payloads
//! - **[`Transport`]**: one credentialed connection over any async stream,
//!   with TCP constructors for clients and listeners

pub mod codec;
pub mod connection;
pub mod frame;
pub mod tcp;

pub use codec::JsonCodec;
pub use connection::{Mode, Transport};
pub use frame::{
    encode_frame, write_frame, FrameReader, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_TIMEOUT,
};
pub use tcp::DEFAULT_CONNECT_TIMEOUT;
