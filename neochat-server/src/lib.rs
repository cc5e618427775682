//! `NeoChat` server library.
//!
//! Exposes the messaging backend for use in tests and embedding: credential
//! verification, the live connection registry, the delivery router, durable
//! message storage, and the session layer that sequences persistence before
//! notification.

pub mod auth;
pub mod config;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
