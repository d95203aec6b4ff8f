//! Opaque class-message wire codec.
//!
//! The engine that owns this crate (`grid-core`) never looks past the two
//! operations exposed here: [`encode_packet`] and [`decode_packet_frame`].
//! The actual on-the-wire byte layout (class tags, BRC header encoding) is a
//! collaborator's concern, not the engine's. This module picks one
//! self-consistent text wire format and commits to it; nothing upstream
//! depends on its specifics.
pub mod codec;
pub mod dto;

pub use codec::{decode_packet_frame, encode_packet, CodecError};
pub use dto::{DecodedMessage, Descriptor, Instruction, ParamValue};
