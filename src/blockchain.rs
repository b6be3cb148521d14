// Thin re-export module: implementation is in `blockchain/core.rs`, split
// into blocks, tip state, validation, reference blocks and the facade.

pub mod core;
pub use core::*;
