use std::{io::ErrorKind, net::TcpListener};

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port already in use: {0}")]
    InUse(u16),
    #[error("bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Picks the game's client port. `preferred == 0` asks the OS for a free
/// ephemeral port; the probe listener is dropped before the game binds it.
pub fn allocate_tcp_port(preferred: u16) -> Result<u16, PortError> {
    if preferred != 0 {
        return match TcpListener::bind(("0.0.0.0", preferred)) {
            Ok(_) => Ok(preferred),
            Err(e) if e.kind() == ErrorKind::AddrInUse => Err(PortError::InUse(preferred)),
            Err(source) => Err(PortError::Bind {
                port: preferred,
                source,
            }),
        };
    }

    let listener =
        TcpListener::bind(("0.0.0.0", 0)).map_err(|source| PortError::Bind { port: 0, source })?;
    let port = listener
        .local_addr()
        .map_err(|source| PortError::Bind { port: 0, source })?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_port_is_nonzero_and_free() {
        let port = allocate_tcp_port(0).unwrap();
        assert_ne!(port, 0);
        assert_eq!(allocate_tcp_port(port).unwrap(), port);
    }

    #[test]
    fn preferred_port_in_use_is_rejected() {
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(matches!(allocate_tcp_port(port), Err(PortError::InUse(p)) if p == port));
    }
}
