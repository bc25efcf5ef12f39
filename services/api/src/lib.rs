//! Sprechen Gateway Library Crate
//!
//! The session-protection proxy that sits between practice clients and the
//! text-generation provider: per-session admission, forwarding with the
//! server-held API key, and routing. The binaries are thin wrappers around
//! this library.

pub mod config;
pub mod guard;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod upstream;
