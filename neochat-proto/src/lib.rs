//! Wire protocol library for `NeoChat`.
//!
//! Shared types exchanged between chat clients and the `NeoChat` server:
//! identifier newtypes, the resolved [`message::ChatMessage`] value object,
//! and the [`wire`] frame enums with their postcard codec.

pub mod message;
pub mod wire;
