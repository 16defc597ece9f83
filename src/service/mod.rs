use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::classifier::{Classification, JobClassifier};
use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::orchestrator::endpoints::{EndpointSet, EndpointSetError};
use crate::orchestrator::queues::EndpointQueues;
use crate::orchestrator::scheduler::{SchedulerError, TurnScheduler, TurnSnapshot};
use crate::orchestrator::worker::EndpointWorker;
use crate::server::{HandshakeListener, ServerError};
use crate::storage::PayloadStore;
use crate::watchdog::{QuantumWatchdog, WatchdogConfig, WatchdogError};
use crate::wire::stream::{close_unanswered, ReadLimits};

#[derive(Debug)]
pub enum ServiceError {
    Endpoints(EndpointSetError),
    Scheduler(SchedulerError),
    Server(ServerError),
    LocalAddr(io::Error),
    Watchdog(WatchdogError),
    Spawn { thread: String, source: io::Error },
    JoinFailed { thread: String },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoints(source) => write!(f, "invalid endpoint set: {source}"),
            Self::Scheduler(source) => write!(f, "turn scheduler error: {source}"),
            Self::Server(source) => write!(f, "handshake listener error: {source}"),
            Self::LocalAddr(source) => write!(f, "cannot resolve listener address: {source}"),
            Self::Watchdog(source) => write!(f, "quantum watchdog error: {source}"),
            Self::Spawn { thread, source } => {
                write!(f, "failed to spawn thread '{thread}': {source}")
            }
            Self::JoinFailed { thread } => write!(f, "thread '{thread}' panicked"),
        }
    }
}

impl std::error::Error for ServiceError {}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub holder: String,
    pub turn: TurnSnapshot,
    pub queue_depths: Vec<(String, usize)>,
}

/// Handle to a started delivery service. Dropping it shuts everything down.
pub struct RunningService {
    local_addr: SocketAddr,
    endpoints: Arc<EndpointSet>,
    scheduler: Arc<TurnScheduler>,
    queues: Arc<EndpointQueues>,
    stop_signal: Arc<AtomicBool>,
    listener_thread: Option<JoinHandle<()>>,
    workers: Vec<(String, JoinHandle<()>)>,
    watchdog: QuantumWatchdog,
    limits: ReadLimits,
    logger: Arc<Logger>,
    stopped: bool,
}

pub fn start(
    app_config: &AppConfig,
    store: Arc<dyn PayloadStore>,
    logger: Arc<Logger>,
) -> Result<RunningService, ServiceError> {
    let endpoints = Arc::new(
        EndpointSet::new(app_config.scheduler.endpoints.iter().cloned())
            .map_err(ServiceError::Endpoints)?,
    );
    let scheduler = Arc::new(
        TurnScheduler::new(
            endpoints.len(),
            Duration::from_millis(app_config.scheduler.quantum_ms),
        )
        .map_err(ServiceError::Scheduler)?,
    );
    let queues = Arc::new(EndpointQueues::for_endpoints(&endpoints));
    let stop_signal = Arc::new(AtomicBool::new(false));
    let listener = HandshakeListener::from_app_config(app_config).map_err(ServiceError::Server)?;
    let local_addr = listener.local_addr().map_err(ServiceError::LocalAddr)?;

    let watchdog = QuantumWatchdog::new(
        Arc::clone(&scheduler),
        Arc::clone(&endpoints),
        Arc::clone(&queues),
        Arc::clone(&logger),
        WatchdogConfig {
            interval_ms: app_config.scheduler.watchdog_interval_ms,
        },
    )
    .map_err(ServiceError::Watchdog)?;

    let limits = ReadLimits::from_classifier_config(&app_config.classifier);

    // From here on, dropping `service` unwinds whatever was started.
    let mut service = RunningService {
        local_addr,
        endpoints: Arc::clone(&endpoints),
        scheduler: Arc::clone(&scheduler),
        queues: Arc::clone(&queues),
        stop_signal: Arc::clone(&stop_signal),
        listener_thread: None,
        workers: Vec::with_capacity(endpoints.len()),
        watchdog,
        limits,
        logger: Arc::clone(&logger),
        stopped: false,
    };

    for endpoint in endpoints.iter() {
        let name = format!("worker-{}", endpoint.alias());
        let handle = EndpointWorker::new(
            endpoint.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&queues),
            Arc::clone(&store),
            limits,
            Arc::clone(&logger),
        )
        .spawn()
        .map_err(|source| ServiceError::Spawn {
            thread: name.clone(),
            source,
        })?;
        service.workers.push((name, handle));
    }

    service.watchdog.start().map_err(ServiceError::Watchdog)?;
    logger.log(
        LogLevel::Debug,
        Some("watchdog"),
        "Quantum watchdog started",
        Some(service.watchdog.initial_metadata_payload()),
    );

    let classifier = Arc::new(JobClassifier::new(
        Arc::clone(&endpoints),
        Arc::clone(&queues),
        &app_config.classifier,
        Arc::clone(&stop_signal),
        Arc::clone(&logger),
    ));
    let poll_interval = Duration::from_millis(app_config.server.accept_poll_ms.max(1));
    let listener_logger = Arc::clone(&logger);
    let listener_thread = thread::Builder::new()
        .name("handshake-listener".to_owned())
        .spawn(move || {
            run_listener(
                listener,
                classifier,
                stop_signal,
                poll_interval,
                listener_logger,
            )
        })
        .map_err(|source| ServiceError::Spawn {
            thread: "handshake-listener".to_owned(),
            source,
        })?;
    service.listener_thread = Some(listener_thread);

    logger.log(
        LogLevel::Info,
        Some("service"),
        "Delivery service started",
        Some(json!({
            "address": local_addr.to_string(),
            "endpoints": endpoints.aliases(),
            "quantum_ms": app_config.scheduler.quantum_ms,
            "ephemeral_port_span": app_config.server.ephemeral_port_span,
        })),
    );

    Ok(service)
}

fn run_listener(
    listener: HandshakeListener,
    classifier: Arc<JobClassifier>,
    stop_signal: Arc<AtomicBool>,
    poll_interval: Duration,
    logger: Arc<Logger>,
) {
    while !stop_signal.load(Ordering::SeqCst) {
        let channel = match listener.try_handshake() {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                thread::sleep(poll_interval);
                continue;
            }
            Err(error) => {
                logger.warn(Some("server::handshake"), &error.to_string());
                thread::sleep(poll_interval);
                continue;
            }
        };

        logger.log(
            LogLevel::Debug,
            Some("server::handshake"),
            "Ephemeral port announced",
            Some(json!({
                "channel": channel.id,
                "port": channel.port,
                "peer": channel.control_peer.to_string(),
            })),
        );

        let classifier = Arc::clone(&classifier);
        let thread_logger = Arc::clone(&logger);
        let spawned = thread::Builder::new()
            .name(format!("classifier-{}", channel.id))
            .spawn(move || match classifier.classify_channel(channel) {
                Ok(Classification::ShuttingDown) => {
                    thread_logger.debug(Some("classifier"), "Classification abandoned on shutdown");
                }
                Ok(_) => {}
                Err(error) => thread_logger.warn(Some("classifier"), &error.to_string()),
            });
        if let Err(error) = spawned {
            logger.error(
                Some("server::handshake"),
                &format!("failed to spawn classifier thread: {error}"),
            );
        }
    }

    logger.debug(Some("server::handshake"), "Handshake listener stopped");
}

impl RunningService {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &Arc<TurnScheduler> {
        &self.scheduler
    }

    #[cfg(test)]
    pub fn queues(&self) -> &Arc<EndpointQueues> {
        &self.queues
    }

    #[cfg(test)]
    pub fn endpoints(&self) -> &Arc<EndpointSet> {
        &self.endpoints
    }

    pub fn status(&self) -> ServiceStatus {
        let turn = self.scheduler.snapshot();
        let holder = self
            .endpoints
            .get(turn.current_index)
            .map(|endpoint| endpoint.alias().to_owned())
            .unwrap_or_default();
        let queue_depths = self
            .endpoints
            .iter()
            .map(|endpoint| {
                (
                    endpoint.alias().to_owned(),
                    self.queues.queue(endpoint).len(),
                )
            })
            .collect();
        ServiceStatus {
            holder,
            turn,
            queue_depths,
        }
    }

    /// Stops accepting, wakes and joins every thread, then drops whatever is
    /// still queued. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), ServiceError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.stop_signal.store(true, Ordering::SeqCst);

        let mut first_error = None;
        if let Some(handle) = self.listener_thread.take() {
            if handle.join().is_err() {
                first_error.get_or_insert(ServiceError::JoinFailed {
                    thread: "handshake-listener".to_owned(),
                });
            }
        }

        self.scheduler.shutdown();
        self.queues.close_all();
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                first_error.get_or_insert(ServiceError::JoinFailed { thread: name });
            }
        }

        if self.watchdog.is_running() {
            if let Err(error) = self.watchdog.stop() {
                first_error.get_or_insert(ServiceError::Watchdog(error));
            }
        }

        let abandoned = self.queues.drain_all();
        if !abandoned.is_empty() {
            self.logger.log(
                LogLevel::Warn,
                Some("service"),
                "Closing queued deliveries that never got a turn",
                Some(json!({
                    "jobs": abandoned.iter().map(|job| job.job_id()).collect::<Vec<_>>(),
                })),
            );
        }
        for mut job in abandoned {
            if let Err(error) = close_unanswered(&mut job.connection, &self.limits) {
                self.logger.debug(
                    Some("service"),
                    &format!("Closing {} failed: {error}", job.job_id()),
                );
            }
        }

        self.logger.log(
            LogLevel::Info,
            Some("service"),
            "Delivery service stopped",
            Some(json!({ "status": self.status() })),
        );

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for RunningService {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
