//! Pick the first bindable port in a closed range.

use browsermux_core::{Error, Result};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Try each port in `[start, end]` in ascending order. The probe listener is
/// dropped before returning, so the caller binds the port again itself.
///
/// Running out of ports is a deployment misconfiguration, not a transient
/// condition, so there is no retry.
pub async fn negotiate_port(host: &str, start: u16, end: u16) -> Result<u16> {
    if start > end {
        return Err(Error::Config(format!(
            "invalid port range {}-{}: start is after end",
            start, end
        )));
    }
    for candidate in start..=end {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                drop(listener);
                info!(port, "Negotiated bridge port");
                return Ok(port);
            }
            Err(e) => {
                debug!(port = candidate, error = %e, "Port unavailable");
            }
        }
    }
    Err(Error::PortExhausted { start, end })
}
