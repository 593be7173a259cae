//! Transport URL templates.
//!
//! Templates may contain `{protocol}`, `{hostname}` and `{port}`. The
//! protocol is derived from the transport kind and the `secure` flag.

use url::Url;

use super::TransportKind;
use crate::config::TransportSettings;
use crate::utils::TransportError;

pub const DEFAULT_NATIVE_TEMPLATE: &str = "{protocol}://{hostname}:{port}/api/stomp/v1/websocket";
pub const DEFAULT_FALLBACK_TEMPLATE: &str = "{protocol}://{hostname}:{port}/api/stomp/v1";

pub fn protocol(kind: TransportKind, secure: bool) -> &'static str {
    match (kind, secure) {
        (TransportKind::Native, false) => "ws",
        (TransportKind::Native, true) => "wss",
        (TransportKind::Fallback, false) => "http",
        (TransportKind::Fallback, true) => "https",
    }
}

/// Substitutes the placeholders in `template` and parses the result.
pub fn render(
    template: &str,
    protocol: &str,
    hostname: &str,
    port: u16,
) -> Result<Url, TransportError> {
    let raw = template
        .replace("{protocol}", protocol)
        .replace("{hostname}", hostname)
        .replace("{port}", &port.to_string());

    Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))
}

pub fn for_kind(settings: &TransportSettings, kind: TransportKind) -> Result<Url, TransportError> {
    let template = match kind {
        TransportKind::Native => &settings.native_url_template,
        TransportKind::Fallback => &settings.fallback_url_template,
    };
    render(
        template,
        protocol(kind, settings.secure),
        &settings.hostname,
        settings.port,
    )
}
