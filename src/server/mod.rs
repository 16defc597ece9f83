mod ports;

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config;
use crate::wire::handshake::encode_port_announcement;

pub use ports::EphemeralPortAllocator;

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    Accept {
        source: io::Error,
    },
    ConfigureAcceptedStream {
        source: io::Error,
    },
    EphemeralBind {
        address: String,
        source: io::Error,
    },
    Announce {
        port: u16,
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind handshake listener on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP listener to non-blocking mode: {source}")
            }
            Self::Accept { source } => write!(f, "failed to accept control connection: {source}"),
            Self::ConfigureAcceptedStream { source } => {
                write!(f, "failed to configure accepted TCP stream: {source}")
            }
            Self::EphemeralBind { address, source } => {
                write!(f, "failed to open ephemeral listener on {address}: {source}")
            }
            Self::Announce { port, source } => {
                write!(f, "failed to announce ephemeral port {port}: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// Private data-phase listener handed to one client by the control phase.
#[derive(Debug)]
pub struct EphemeralChannel {
    pub id: u64,
    pub port: u16,
    pub listener: TcpListener,
    pub control_peer: SocketAddr,
}

/// Control-phase listener on the base port. Each accepted connection gets a
/// freshly bound ephemeral listener, is told its port, and is closed.
pub struct HandshakeListener {
    listener: TcpListener,
    host: String,
    ports: EphemeralPortAllocator,
    next_channel_id: AtomicU64,
}

impl HandshakeListener {
    pub fn bind(config: &config::ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        Ok(Self {
            listener,
            host: config.host.clone(),
            ports: EphemeralPortAllocator::new(config.port, config.ephemeral_port_span),
            next_channel_id: AtomicU64::new(1),
        })
    }

    pub fn from_app_config(app_config: &config::AppConfig) -> Result<Self, ServerError> {
        Self::bind(&app_config.server)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves at most one pending control connection. `Ok(None)` means
    /// nothing was waiting.
    pub fn try_handshake(&self) -> Result<Option<EphemeralChannel>, ServerError> {
        let (control, control_peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(source) if source.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(source) => return Err(ServerError::Accept { source }),
        };
        self.open_channel(control, control_peer).map(Some)
    }

    fn open_channel(
        &self,
        mut control: TcpStream,
        control_peer: SocketAddr,
    ) -> Result<EphemeralChannel, ServerError> {
        control
            .set_nonblocking(false)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;

        let requested = self.ports.next_port();
        let address = format!("{}:{}", self.host, requested);
        let listener = match TcpListener::bind(&address) {
            Ok(listener) => listener,
            Err(source) => {
                let _ = control.shutdown(Shutdown::Both);
                return Err(ServerError::EphemeralBind { address, source });
            }
        };
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(requested);

        let announced = control
            .write_all(&encode_port_announcement(port))
            .and_then(|()| control.flush());
        let _ = control.shutdown(Shutdown::Both);
        announced.map_err(|source| ServerError::Announce { port, source })?;

        Ok(EphemeralChannel {
            id: self.next_channel_id.fetch_add(1, Ordering::Relaxed),
            port,
            listener,
            control_peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    use crate::config::{AppConfig, ServerConfig};
    use crate::wire::handshake::parse_port_announcement;

    use super::{EphemeralChannel, HandshakeListener, ServerError};

    fn loopback_config(port: u16, span: u16) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port,
            ephemeral_port_span: span,
            ..ServerConfig::default()
        }
    }

    fn poll_handshake(listener: &HandshakeListener) -> Result<EphemeralChannel, ServerError> {
        for _ in 0..100 {
            if let Some(channel) = listener.try_handshake()? {
                return Ok(channel);
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no control connection was accepted");
    }

    #[test]
    fn listener_is_non_blocking() {
        let listener =
            HandshakeListener::bind(&loopback_config(0, 0)).expect("listener should bind");
        assert!(listener
            .try_handshake()
            .expect("idle poll should not fail")
            .is_none());
    }

    #[test]
    fn announces_port_then_closes_control_connection() {
        let listener =
            HandshakeListener::bind(&loopback_config(0, 0)).expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should exist");

        let mut control = TcpStream::connect(addr).expect("client should connect");
        let channel = poll_handshake(&listener).expect("handshake should succeed");

        let mut announcement = Vec::new();
        control
            .read_to_end(&mut announcement)
            .expect("control connection should close after announcement");
        let port = parse_port_announcement(&announcement).expect("announcement should parse");

        assert_eq!(port, channel.port);
        assert_eq!(
            channel.listener.local_addr().expect("addr").port(),
            channel.port
        );
        TcpStream::connect(("127.0.0.1", port)).expect("ephemeral port should accept");
    }

    #[test]
    fn channel_ids_increase() {
        let listener =
            HandshakeListener::bind(&loopback_config(0, 0)).expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should exist");

        let _first = TcpStream::connect(addr).expect("client should connect");
        let a = poll_handshake(&listener).expect("handshake should succeed");
        let _second = TcpStream::connect(addr).expect("client should connect");
        let b = poll_handshake(&listener).expect("handshake should succeed");

        assert!(b.id > a.id);
        assert_ne!(a.port, b.port);
    }

    #[test]
    fn ephemeral_bind_failure_closes_control_connection() {
        let occupied = TcpListener::bind("127.0.0.1:0").expect("occupier should bind");
        let occupied_port = occupied.local_addr().expect("addr").port();
        // base + 1 is the first port handed out.
        let base = occupied_port - 1;
        let listener = match HandshakeListener::bind(&loopback_config(base, 1)) {
            Ok(listener) => listener,
            // Base port itself was taken by another process; nothing to assert.
            Err(ServerError::Bind { .. }) => return,
            Err(other) => panic!("unexpected bind error: {other}"),
        };

        let mut control = TcpStream::connect(
            listener.local_addr().expect("local addr should exist"),
        )
        .expect("client should connect");
        let err = poll_handshake(&listener).expect_err("ephemeral bind should fail");
        assert!(matches!(err, ServerError::EphemeralBind { .. }));

        let mut buf = Vec::new();
        match control.read_to_end(&mut buf) {
            Ok(_) => assert!(buf.is_empty()),
            Err(error) => assert_eq!(error.kind(), ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn builds_listener_from_app_config() {
        let mut app_config = AppConfig::default();
        app_config.server = loopback_config(0, 0);

        let listener = HandshakeListener::from_app_config(&app_config)
            .expect("listener should build from app config");
        let bound = listener.local_addr().expect("bound address should be present");
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn reports_bind_failure_for_taken_base_port() {
        let occupied = TcpListener::bind("127.0.0.1:0").expect("occupier should bind");
        let port = occupied.local_addr().expect("addr").port();

        let result = HandshakeListener::bind(&loopback_config(port, 0));
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
