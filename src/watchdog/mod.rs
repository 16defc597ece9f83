use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::logging::{LogLevel, Logger};
use crate::orchestrator::endpoints::EndpointSet;
use crate::orchestrator::queues::EndpointQueues;
use crate::orchestrator::scheduler::TurnScheduler;

pub const MIN_INTERVAL_MS: u64 = 10;
pub const MAX_INTERVAL_MS: u64 = 60_000;
const STOP_POLL_SLICE: Duration = Duration::from_millis(25);

#[derive(Clone, Copy, Debug)]
pub struct WatchdogConfig {
    pub interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

#[derive(Debug)]
pub enum WatchdogError {
    InvalidInterval { provided_ms: u64 },
    AlreadyRunning,
    SpawnFailed(std::io::Error),
    JoinFailed,
}

impl fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { provided_ms } => write!(
                f,
                "watchdog interval must be between {MIN_INTERVAL_MS}ms and {MAX_INTERVAL_MS}ms, got {provided_ms}ms"
            ),
            Self::AlreadyRunning => write!(f, "quantum watchdog is already running"),
            Self::SpawnFailed(source) => write!(f, "failed to spawn watchdog thread: {source}"),
            Self::JoinFailed => write!(f, "watchdog thread join failed"),
        }
    }
}

impl std::error::Error for WatchdogError {}

/// Ticks on a fixed interval and moves an idle, expired turn to the next
/// endpoint so the cycle keeps turning with no load.
pub struct QuantumWatchdog {
    pub initiated_at: DateTime<Utc>,
    interval_ms: u64,
    scheduler: Arc<TurnScheduler>,
    endpoints: Arc<EndpointSet>,
    queues: Arc<EndpointQueues>,
    logger: Arc<Logger>,
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl QuantumWatchdog {
    pub fn new(
        scheduler: Arc<TurnScheduler>,
        endpoints: Arc<EndpointSet>,
        queues: Arc<EndpointQueues>,
        logger: Arc<Logger>,
        config: WatchdogConfig,
    ) -> Result<Self, WatchdogError> {
        Self::validate_interval(config.interval_ms)?;

        Ok(Self {
            initiated_at: Utc::now(),
            interval_ms: config.interval_ms,
            scheduler,
            endpoints,
            queues,
            logger,
            stop_signal: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<(), WatchdogError> {
        if self.worker.is_some() {
            return Err(WatchdogError::AlreadyRunning);
        }

        self.stop_signal.store(false, Ordering::SeqCst);
        let stop_signal = Arc::clone(&self.stop_signal);
        let scheduler = Arc::clone(&self.scheduler);
        let endpoints = Arc::clone(&self.endpoints);
        let queues = Arc::clone(&self.queues);
        let logger = Arc::clone(&self.logger);
        let interval = Duration::from_millis(self.interval_ms);

        let handle = thread::Builder::new()
            .name("quantum-watchdog".to_owned())
            .spawn(move || loop {
                if stop_signal.load(Ordering::SeqCst) || scheduler.is_shutting_down() {
                    break;
                }

                if let Some((from, to)) = scheduler.force_advance_if_expired() {
                    logger.log(
                        LogLevel::Info,
                        Some("watchdog"),
                        "Idle turn expired, switching endpoint",
                        Some(json!({
                            "from": endpoints.get(from).map(|e| e.alias()),
                            "to": endpoints.get(to).map(|e| e.alias()),
                            "turn": scheduler.snapshot(),
                            "queue_depths": queues.depths(),
                        })),
                    );
                }

                pause(interval, &stop_signal, &scheduler);
            })
            .map_err(WatchdogError::SpawnFailed)?;

        self.worker = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), WatchdogError> {
        self.stop_signal.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker.take() {
            return handle.join().map_err(|_| WatchdogError::JoinFailed);
        }

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn initial_metadata_payload(&self) -> Value {
        json!({
            "initiated_at": self.initiated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "interval_ms": self.interval_ms,
            "quantum_ms": u64::try_from(self.scheduler.quantum().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn validate_interval(interval_ms: u64) -> Result<(), WatchdogError> {
        if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
            Ok(())
        } else {
            Err(WatchdogError::InvalidInterval {
                provided_ms: interval_ms,
            })
        }
    }
}

/// Sleeps for `interval` in short slices so a stop request or scheduler
/// shutdown is noticed without waiting out a long tick.
fn pause(interval: Duration, stop_signal: &AtomicBool, scheduler: &TurnScheduler) {
    let deadline = Instant::now() + interval;
    loop {
        if stop_signal.load(Ordering::SeqCst) || scheduler.is_shutting_down() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL_SLICE));
    }
}

impl Drop for QuantumWatchdog {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::logging::test_support::memory_logger;
    use crate::logging::LogLevel;
    use crate::orchestrator::endpoints::EndpointSet;
    use crate::orchestrator::queues::EndpointQueues;
    use crate::orchestrator::scheduler::TurnScheduler;

    use super::{QuantumWatchdog, WatchdogConfig, WatchdogError, MAX_INTERVAL_MS};

    fn watchdog(
        quantum: Duration,
        interval_ms: u64,
    ) -> (
        Result<QuantumWatchdog, WatchdogError>,
        Arc<TurnScheduler>,
        Arc<crate::logging::test_support::MemorySink>,
    ) {
        let endpoints = Arc::new(EndpointSet::new(["s01", "s02", "s03", "s04"]).expect("set"));
        let queues = Arc::new(EndpointQueues::for_endpoints(&endpoints));
        let scheduler =
            Arc::new(TurnScheduler::new(endpoints.len(), quantum).expect("scheduler"));
        let (logger, sink) = memory_logger(LogLevel::Info);
        let watchdog = QuantumWatchdog::new(
            Arc::clone(&scheduler),
            endpoints,
            queues,
            logger,
            WatchdogConfig { interval_ms },
        );
        (watchdog, scheduler, sink)
    }

    #[test]
    fn rejects_intervals_outside_allowed_range() {
        let (low, _, _) = watchdog(Duration::from_secs(1), 9);
        let (high, _, _) = watchdog(Duration::from_secs(1), 60_001);

        assert!(matches!(
            low,
            Err(WatchdogError::InvalidInterval { provided_ms: 9 })
        ));
        assert!(matches!(
            high,
            Err(WatchdogError::InvalidInterval { provided_ms: 60_001 })
        ));
    }

    #[test]
    fn rotates_idle_turns_while_running() {
        let (watchdog, scheduler, sink) = watchdog(Duration::from_millis(60), 10);
        let mut watchdog = watchdog.expect("watchdog should build");

        watchdog.start().expect("watchdog should start");
        assert!(matches!(watchdog.start(), Err(WatchdogError::AlreadyRunning)));

        // Between the second and third expiry.
        thread::sleep(Duration::from_millis(160));
        let snapshot = scheduler.snapshot();
        watchdog.stop().expect("watchdog should stop");

        assert_eq!(snapshot.current_index, 2);
        assert_eq!(snapshot.turns_completed, 2);
        assert!(sink.contains("Idle turn expired"));
        assert!(sink.contains("\"from\":\"s01\""));
        assert!(!watchdog.is_running());
    }

    #[test]
    fn leaves_busy_holder_alone() {
        let (watchdog, scheduler, _sink) = watchdog(Duration::from_millis(20), 10);
        let mut watchdog = watchdog.expect("watchdog should build");

        scheduler.begin_turn(0).expect("holder should begin");
        watchdog.start().expect("watchdog should start");
        thread::sleep(Duration::from_millis(80));
        watchdog.stop().expect("watchdog should stop");

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.current_index, 0);
        assert!(snapshot.busy);
    }

    #[test]
    fn metadata_reports_interval_and_quantum() {
        let (watchdog, _, _) = watchdog(Duration::from_millis(15_000), 1_000);
        let payload = watchdog
            .expect("watchdog should build")
            .initial_metadata_payload();
        assert_eq!(payload["interval_ms"], 1_000);
        assert_eq!(payload["quantum_ms"], 15_000);
    }

    #[test]
    fn stop_does_not_wait_out_a_long_interval() {
        let (watchdog, _, _) = watchdog(Duration::from_secs(1), MAX_INTERVAL_MS);
        let mut watchdog = watchdog.expect("watchdog should build");
        watchdog.start().expect("watchdog should start");
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        watchdog.stop().expect("watchdog should stop");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn exits_when_scheduler_shuts_down() {
        let (watchdog, scheduler, _) = watchdog(Duration::from_secs(1), MAX_INTERVAL_MS);
        let mut watchdog = watchdog.expect("watchdog should build");
        watchdog.start().expect("watchdog should start");

        scheduler.shutdown();
        let started = Instant::now();
        watchdog.stop().expect("watchdog should stop");
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
