//! Plugin bridge - run a provider in a separate process
//!
//! The host drives a [`RemoteProvider`] exactly like an in-process provider.
//! The plugin binary wraps its provider in a [`PluginServer`], usually via
//! [`serve_stdio`].

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteProvider;
pub use protocol::{Frame, Handshake, HandshakeReply, RemoteError, RemoteErrorKind, Request, Response};
pub use server::{serve_stdio, PluginServer};
