//! Shared types for the dispatch fabric
//!
//! Contains only truly shared material for inter-process communication:
//! process identities, the request/reply wire protocol, shared error types,
//! and the tracing bootstrap. Component-internal types (supervisor records,
//! client session state) are kept in their respective crates.

pub mod errors;
pub mod logging;
pub mod types;
pub mod wire;

pub use errors::*;
pub use types::*;

// Re-export the wire protocol surface used by both sides of the channel
pub use wire::{read_frame, write_frame, RpcRequest, RpcResponse, MAX_FRAME_BYTES, PING_METHOD};
