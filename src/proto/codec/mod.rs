//! RESP encoder and decoder.
//!
//! The [`Encoder`] serializes frames and commands, the [`Decoder`] is a
//! resumable parser that accepts arbitrarily chunked input.

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;
