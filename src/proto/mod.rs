//! # Redlink Proto
//!
//! RESP (Redis Serialization Protocol) codec implementation.
//! Provides encoding and decoding of Redis protocol messages.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and resumable decoder for RESP
//! - [`error`] - Error types for protocol and client operations
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
