use super::error::{ConnectError, FrameError};
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warning");
    logging::init("nonsense");
}

#[test]
fn errors_render_readable_messages() {
    assert_eq!(
        FrameError::UnknownCommand("PUBLISH".to_string()).to_string(),
        "unknown frame command: PUBLISH"
    );
    assert_eq!(
        ConnectError::HandshakeFailed("socket closed".to_string()).to_string(),
        "handshake failed: socket closed"
    );
}
