use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::config::ClassifierConfig;
use crate::logging::{LogLevel, Logger};
use crate::orchestrator::endpoints::EndpointSet;
use crate::orchestrator::jobs::Job;
use crate::orchestrator::queues::EndpointQueues;
use crate::server::EphemeralChannel;
use crate::wire::codec::{parse_header, ResponseToken};
use crate::wire::stream::{peek_header, respond, Peeked, ReadLimits};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, PartialEq, Eq)]
pub enum Classification {
    Enqueued {
        alias: String,
        filename: String,
        depth: usize,
    },
    UnknownEndpoint {
        alias: String,
    },
    InvalidFormat,
    NoData,
    NoConnection,
    ShuttingDown,
}

#[derive(Debug)]
pub enum ClassifierError {
    Accept(io::Error),
    Peek(io::Error),
    Respond {
        token: ResponseToken,
        source: io::Error,
    },
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept(source) => write!(f, "failed to accept data connection: {source}"),
            Self::Peek(source) => write!(f, "failed to inspect data connection: {source}"),
            Self::Respond { token, source } => write!(f, "failed to send '{token}': {source}"),
        }
    }
}

impl std::error::Error for ClassifierError {}

/// Takes the one data connection expected on an ephemeral channel and routes
/// it to its endpoint queue by peeking the header, leaving the bytes unread.
pub struct JobClassifier {
    endpoints: Arc<EndpointSet>,
    queues: Arc<EndpointQueues>,
    accept_timeout: Duration,
    limits: ReadLimits,
    stop_signal: Arc<AtomicBool>,
    logger: Arc<Logger>,
}

impl JobClassifier {
    pub fn new(
        endpoints: Arc<EndpointSet>,
        queues: Arc<EndpointQueues>,
        config: &ClassifierConfig,
        stop_signal: Arc<AtomicBool>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            endpoints,
            queues,
            accept_timeout: Duration::from_millis(config.accept_timeout_ms),
            limits: ReadLimits::from_classifier_config(config),
            stop_signal,
            logger,
        }
    }

    pub fn classify_channel(
        &self,
        channel: EphemeralChannel,
    ) -> Result<Classification, ClassifierError> {
        let Some((stream, peer)) = self.accept_one(&channel.listener)? else {
            let outcome = if self.stop_signal.load(Ordering::SeqCst) {
                Classification::ShuttingDown
            } else {
                Classification::NoConnection
            };
            self.logger.log(
                LogLevel::Debug,
                Some("classifier"),
                "Ephemeral channel closed without a data connection",
                Some(json!({ "channel": channel.id, "port": channel.port })),
            );
            return Ok(outcome);
        };
        drop(channel.listener);

        self.logger.log(
            LogLevel::Verbose,
            Some("classifier"),
            "Data connection accepted",
            Some(json!({
                "channel": channel.id,
                "port": channel.port,
                "peer": peer.to_string(),
            })),
        );
        self.classify_connection(stream)
    }

    pub fn classify_connection(
        &self,
        mut stream: TcpStream,
    ) -> Result<Classification, ClassifierError> {
        let peeked = peek_header(&stream, &self.limits).map_err(ClassifierError::Peek)?;
        let bytes = match peeked {
            Peeked::Bytes(bytes) => bytes,
            Peeked::Closed | Peeked::TimedOut => {
                self.logger.debug(
                    Some("classifier"),
                    "Data connection sent nothing; closing without a reply",
                );
                return Ok(Classification::NoData);
            }
        };

        let header = match parse_header(&bytes) {
            Ok(header) => header,
            Err(error) => {
                self.logger.log(
                    LogLevel::Warn,
                    Some("classifier"),
                    &format!("Rejected malformed delivery: {error}"),
                    Some(json!({ "peeked_bytes": bytes.len() })),
                );
                self.reject(&mut stream, ResponseToken::InvalidFormat)?;
                return Ok(Classification::InvalidFormat);
            }
        };

        let Some(endpoint) = self.endpoints.find(header.alias) else {
            self.logger.log(
                LogLevel::Warn,
                Some("classifier"),
                "Rejected delivery for unknown endpoint",
                Some(json!({ "alias": header.alias, "filename": header.filename })),
            );
            let alias = header.alias.to_owned();
            self.reject(&mut stream, ResponseToken::UnknownServer)?;
            return Ok(Classification::UnknownEndpoint { alias });
        };

        let job = Job::new(endpoint.alias(), header.filename, stream);
        let payload = job.log_payload();
        match self.queues.queue(endpoint).push(job) {
            Ok(depth) => {
                self.logger.log(
                    LogLevel::Info,
                    Some("classifier"),
                    "Delivery queued",
                    Some(json!({ "job": payload, "depth": depth })),
                );
                Ok(Classification::Enqueued {
                    alias: endpoint.alias().to_owned(),
                    filename: header.filename.to_owned(),
                    depth,
                })
            }
            Err(_closed) => {
                self.logger.log(
                    LogLevel::Warn,
                    Some("classifier"),
                    "Queue closed; dropping delivery",
                    Some(payload),
                );
                Ok(Classification::ShuttingDown)
            }
        }
    }

    fn accept_one(
        &self,
        listener: &TcpListener,
    ) -> Result<Option<(TcpStream, SocketAddr)>, ClassifierError> {
        listener
            .set_nonblocking(true)
            .map_err(ClassifierError::Accept)?;
        let deadline = Instant::now() + self.accept_timeout;

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(ClassifierError::Accept)?;
                    return Ok(Some((stream, peer)));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => return Err(ClassifierError::Accept(error)),
            }

            if Instant::now() >= deadline || self.stop_signal.load(Ordering::SeqCst) {
                return Ok(None);
            }
            thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    fn reject(&self, stream: &mut TcpStream, token: ResponseToken) -> Result<(), ClassifierError> {
        respond(stream, token).map_err(|source| ClassifierError::Respond { token, source })
    }
}
