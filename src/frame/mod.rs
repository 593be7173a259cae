//! The `frame` module defines the STOMP wire protocol spoken with the broker.
//!
//! Frames are text: a command line, `name:value` header lines, a blank line
//! and a NUL-terminated body. One transport message may carry several
//! frames, or nothing but heart-beat newlines.

pub mod codec;

pub use codec::{Command, Frame, decode};
