//! mkv-transport: blocking Question/Answer transports for compressor controllers
//!
//! A controller is polled with a single "question" (concatenated 6-hex register slots)
//! and replies with one positional answer string. This crate provides the
//! [`QuestionTransport`] trait and feature-gated backends. The default build enables a
//! `mock` backend so that binaries and tests run without a controller on the network.

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::QuestionTransport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTransport;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpTransport, DEFAULT_ENDPOINT};
