//! Frame kind tags used after the handshake. Every write on a peer is one
//! of:
//!
//! - `0x01 IncomingMessage` — a 4-byte big-endian length `L`, then `L`
//!   bytes of envelope payload.
//! - `0x02 IncomingStream` — raw bytes whose length the receiver already
//!   knows out-of-band (a prior `StoreFile.Size` or a length the sender
//!   embeds in the stream itself, e.g. the little-endian 64-bit size
//!   [`peervault_core::Envelope::GetFileAck`] implies). There is no
//!   in-band terminator: the frame ends when the receiver has read the
//!   number of bytes it already expected.

pub const FRAME_MESSAGE: u8 = 0x01;
pub const FRAME_STREAM: u8 = 0x02;
