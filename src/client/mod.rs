mod log;

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::AppConfig;
use crate::wire::codec::{encode_message, validate_filename, CodecError, ResponseToken};
use crate::wire::handshake::{parse_port_announcement, HandshakeError};

pub use log::{ClientLogger, DeliveryStatus, MISSING_FILE_ENDPOINT};

#[derive(Debug)]
pub enum ClientError {
    UnknownEndpoint { alias: String, allowed: Vec<String> },
    ReadFile { path: PathBuf, source: io::Error },
    InvalidFileName { path: PathBuf, source: Option<CodecError> },
    Connect { address: String, source: io::Error },
    Io(io::Error),
    Handshake(HandshakeError),
    NoResponse,
}

impl ClientError {
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::ReadFile { .. })
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEndpoint { alias, allowed } => write!(
                f,
                "invalid server alias '{alias}'; use one of: {}",
                allowed.join(", ")
            ),
            Self::ReadFile { path, source } => {
                write!(f, "cannot read '{}': {source}", path.display())
            }
            Self::InvalidFileName { path, source } => match source {
                Some(source) => write!(f, "cannot send '{}': {source}", path.display()),
                None => write!(f, "cannot send '{}': path has no file name", path.display()),
            },
            Self::Connect { address, source } => {
                write!(f, "connection to {address} failed: {source}")
            }
            Self::Io(source) => write!(f, "delivery I/O failed: {source}"),
            Self::Handshake(source) => write!(f, "invalid response from dispatcher: {source}"),
            Self::NoResponse => write!(f, "no response from server"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(source: io::Error) -> Self {
        Self::Io(source)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub port: u16,
    pub response: String,
    pub token: Option<ResponseToken>,
}

/// Sends one file through the two-phase handshake.
#[derive(Clone, Debug)]
pub struct DeliveryClient {
    host: String,
    port: u16,
    response_timeout: Duration,
}

impl DeliveryClient {
    pub fn new(host: impl Into<String>, port: u16, response_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            response_timeout,
        }
    }

    pub fn from_app_config(app_config: &AppConfig) -> Self {
        Self::new(
            app_config.client.host.clone(),
            app_config.client.port,
            Duration::from_millis(app_config.client.response_timeout_ms),
        )
    }

    pub fn request_port(&self) -> Result<u16, ClientError> {
        let mut control = self.connect(self.port)?;
        let mut announcement = Vec::new();
        control.read_to_end(&mut announcement)?;
        parse_port_announcement(&announcement).map_err(ClientError::Handshake)
    }

    pub fn deliver(
        &self,
        alias: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<Delivery, ClientError> {
        let port = self.request_port()?;
        let response = self.send_raw(port, &encode_message(alias, filename, content))?;
        Ok(Delivery {
            port,
            token: ResponseToken::parse(&response),
            response,
        })
    }

    /// Reads `path` and delivers it under its base name.
    pub fn deliver_file(&self, alias: &str, path: &Path) -> Result<Delivery, ClientError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClientError::InvalidFileName {
                path: path.to_path_buf(),
                source: None,
            })?;
        validate_filename(filename).map_err(|source| ClientError::InvalidFileName {
            path: path.to_path_buf(),
            source: Some(source),
        })?;
        let content = fs::read(path).map_err(|source| ClientError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.deliver(alias, filename, &content)
    }

    /// Sends an already encoded message to a data port and waits for the reply.
    pub fn send_raw(&self, port: u16, message: &[u8]) -> Result<String, ClientError> {
        let mut stream = self.connect(port)?;
        stream.write_all(message)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        if response.is_empty() {
            return Err(ClientError::NoResponse);
        }
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    fn connect(&self, port: u16) -> Result<TcpStream, ClientError> {
        let address = format!("{}:{}", self.host, port);
        let stream = TcpStream::connect(&address).map_err(|source| ClientError::Connect {
            address: address.clone(),
            source,
        })?;
        if !self.response_timeout.is_zero() {
            stream.set_read_timeout(Some(self.response_timeout))?;
        }
        Ok(stream)
    }
}

pub fn validate_alias(alias: &str, endpoints: &[String]) -> Result<(), ClientError> {
    if endpoints.iter().any(|endpoint| endpoint == alias) {
        return Ok(());
    }
    Err(ClientError::UnknownEndpoint {
        alias: alias.to_owned(),
        allowed: endpoints.to_vec(),
    })
}
