use std::{
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    time::Duration,
};

use crate::error::{Result, SocketError};

/// Converts a block time given in (fractional) seconds into the timeout
/// passed to [`Poller::poll`](crate::poll::Poller::poll). Negative or NaN
/// values mean "block until something is ready".
pub fn block_time(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(SocketError::InvalidAddressOrPort("empty address".into()));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(SocketError::InvalidAddressOrPort(format!(
            "address {:?} contains whitespace",
            host
        )));
    }
    Ok(())
}

/// Client ports must name a concrete service.
pub fn validate_remote_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(SocketError::InvalidAddressOrPort(
            "port 0 is only valid for listeners".into(),
        ));
    }
    Ok(())
}

/// Resolves `host:port` to the first address it maps to. IP literals are
/// parsed directly; anything else goes through the system resolver.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    validate_host(host)?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| SocketError::InvalidAddressOrPort(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| SocketError::InvalidAddressOrPort(format!("{} did not resolve", host)))
}
