//! Local port probing.

use std::net::TcpListener;
use tracing::debug;

/// Check whether `port` is free on the loopback interface.
///
/// Binds and immediately drops the listener.
pub fn is_port_available(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener.local_addr().is_ok(),
        Err(e) => {
            debug!(port, error = %e, "Port unavailable");
            false
        }
    }
}

/// Ask the OS for a currently free port.
pub fn find_free_port() -> Option<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .ok()
}
