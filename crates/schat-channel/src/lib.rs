//! Secure datagram engine for schat
//!
//! A UDP implementation of the `schat_core::SecureChannel` interface: HELLO
//! greetings, certificate presentations, signed X25519 session negotiation
//! and AEAD-protected data frames with keepalives.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod frame;
pub mod identity;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::ChannelConfig;
pub use engine::DatagramEngine;
pub use error::{ChannelError, Result};
pub use frame::Frame;
pub use identity::{Identity, IdentityKeyPair};
