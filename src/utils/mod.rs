//! The `utils` module provides the error types and logging setup shared by
//! every other module of `stompmux`.

pub mod error;
pub mod logging;

pub use error::{ConnectError, FrameError, TransportError};

#[cfg(test)]
mod tests;
