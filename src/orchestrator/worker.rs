use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::json;

use crate::logging::{LogLevel, Logger};
use crate::orchestrator::endpoints::Endpoint;
use crate::orchestrator::jobs::Job;
use crate::orchestrator::queues::{EndpointQueues, Pop};
use crate::orchestrator::scheduler::{SchedulerError, TurnEnd, TurnScheduler};
use crate::storage::PayloadStore;
use crate::utils::timing::time_job;
use crate::wire::codec::{parse_header, ResponseToken};
use crate::wire::stream::{read_message, respond, ReadLimits};

#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Stored { path: PathBuf },
    WrongServer { alias: String },
    InvalidFormat,
    StorageFailed,
    ConnectionFailed,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "stored",
            Self::WrongServer { .. } => "wrong_server",
            Self::InvalidFormat => "invalid_format",
            Self::StorageFailed => "storage_failed",
            Self::ConnectionFailed => "connection_failed",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub processed: usize,
    pub stored: usize,
}

/// Long-lived consumer for one endpoint: waits for its turn, then serves its
/// queue until the quantum runs out.
pub struct EndpointWorker {
    endpoint: Endpoint,
    scheduler: Arc<TurnScheduler>,
    queues: Arc<EndpointQueues>,
    store: Arc<dyn PayloadStore>,
    limits: ReadLimits,
    logger: Arc<Logger>,
    context: String,
}

impl EndpointWorker {
    pub fn new(
        endpoint: Endpoint,
        scheduler: Arc<TurnScheduler>,
        queues: Arc<EndpointQueues>,
        store: Arc<dyn PayloadStore>,
        limits: ReadLimits,
        logger: Arc<Logger>,
    ) -> Self {
        let context = format!("worker::{}", endpoint.alias());
        Self {
            endpoint,
            scheduler,
            queues,
            store,
            limits,
            logger,
            context,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("worker-{}", self.endpoint.alias()))
            .spawn(move || self.run())
    }

    pub fn run(&self) {
        let ordinal = self.endpoint.ordinal();
        loop {
            let started = match self.scheduler.acquire_turn(ordinal) {
                Ok(started) => started,
                Err(SchedulerError::ShuttingDown) => break,
                Err(error) => {
                    self.logger.error(Some(self.context.as_str()), &error.to_string());
                    break;
                }
            };

            self.logger.log(
                LogLevel::Debug,
                Some(self.context.as_str()),
                "Turn started",
                Some(json!({
                    "endpoint": self.endpoint.alias(),
                    "ordinal": ordinal,
                    "queued": self.queues.queue(&self.endpoint).len(),
                })),
            );

            let report = self.run_turn(started);
            let end = self.scheduler.end_turn(ordinal);
            self.log_turn_end(report, end);
        }

        self.logger.debug(Some(self.context.as_str()), "Worker stopped");
    }

    /// Serves jobs until the quantum measured from `started` elapses. Waits on
    /// the queue rather than polling when it runs dry.
    pub fn run_turn(&self, started: Instant) -> TurnReport {
        let deadline = started + self.scheduler.quantum();
        let queue = self.queues.queue(&self.endpoint);
        let mut report = TurnReport::default();

        while Instant::now() < deadline {
            match queue.pop_until(deadline) {
                Pop::Item(job) => {
                    let outcome = self.process_job(job);
                    report.processed += 1;
                    if matches!(outcome, JobOutcome::Stored { .. }) {
                        report.stored += 1;
                    }
                }
                Pop::TimedOut | Pop::Closed => break,
            }
        }

        report
    }

    pub fn process_job(&self, job: Job) -> JobOutcome {
        let job_id = job.job_id();
        time_job(&job_id, Some(self.context.as_str()), &self.logger, || self.serve(job))
    }

    fn serve(&self, job: Job) -> JobOutcome {
        let job_payload = job.log_payload();
        let mut connection = job.connection;

        let message = match read_message(&mut connection, &self.limits) {
            Ok(message) => message,
            Err(error) => {
                self.logger.log(
                    LogLevel::Warn,
                    Some(self.context.as_str()),
                    &format!("Failed to read delivery: {error}"),
                    Some(job_payload),
                );
                return JobOutcome::ConnectionFailed;
            }
        };
        self.logger.verbose(
            Some(self.context.as_str()),
            &format!("Read {} byte delivery", message.len()),
        );

        let (token, outcome) = match parse_header(&message) {
            Err(error) => {
                self.logger.log(
                    LogLevel::Warn,
                    Some(self.context.as_str()),
                    &format!("Rejected unparsable delivery: {error}"),
                    Some(job_payload),
                );
                (ResponseToken::InvalidFormat, JobOutcome::InvalidFormat)
            }
            Ok(header) if header.alias != self.endpoint.alias() => {
                self.logger.log(
                    LogLevel::Warn,
                    Some(self.context.as_str()),
                    &format!("Rejected delivery addressed to '{}'", header.alias),
                    Some(job_payload),
                );
                (
                    ResponseToken::WrongServer,
                    JobOutcome::WrongServer {
                        alias: header.alias.to_owned(),
                    },
                )
            }
            Ok(header) => match self.store.save(header.alias, header.filename, header.content) {
                Ok(path) => {
                    self.logger.log(
                        LogLevel::Info,
                        Some(self.context.as_str()),
                        "File stored",
                        Some(json!({
                            "job": job_payload,
                            "path": path.display().to_string(),
                            "bytes": header.content.len(),
                        })),
                    );
                    (ResponseToken::Received, JobOutcome::Stored { path })
                }
                Err(error) => {
                    self.logger.log(
                        LogLevel::Error,
                        Some(self.context.as_str()),
                        &format!("Failed to store delivery: {error}"),
                        Some(job_payload),
                    );
                    (ResponseToken::StorageFailure, JobOutcome::StorageFailed)
                }
            },
        };

        if let Err(error) = respond(&mut connection, token) {
            let level = if token.is_success() {
                LogLevel::Warn
            } else {
                LogLevel::Debug
            };
            self.logger.log(
                level,
                Some(self.context.as_str()),
                &format!("Failed to send '{token}': {error}"),
                Some(json!({ "outcome": outcome.label() })),
            );
        }
        outcome
    }

    fn log_turn_end(&self, report: TurnReport, end: TurnEnd) {
        let (message, next) = match (end, report.processed) {
            (TurnEnd::Retained, _) => ("Turn retained", None),
            (TurnEnd::Advanced { next }, 0) => ("Turn expired idle", Some(next)),
            (TurnEnd::Advanced { next }, _) => ("Turn finished", Some(next)),
        };
        let level = if report.processed > 0 {
            LogLevel::Info
        } else {
            LogLevel::Debug
        };
        if !self.logger.enabled(level) {
            return;
        }

        self.logger.log(
            level,
            Some(self.context.as_str()),
            message,
            Some(json!({
                "endpoint": self.endpoint.alias(),
                "processed": report.processed,
                "stored": report.stored,
                "next_ordinal": next,
                "turn": self.scheduler.snapshot(),
                "queue_depths": self.queues.depths(),
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::logging::test_support::memory_logger;
    use crate::logging::LogLevel;
    use crate::orchestrator::endpoints::EndpointSet;
    use crate::orchestrator::jobs::Job;
    use crate::orchestrator::queues::EndpointQueues;
    use crate::orchestrator::scheduler::TurnScheduler;
    use crate::storage::{MemoryPayloadStore, PayloadStore, StorageError};
    use crate::wire::stream::ReadLimits;

    use super::{EndpointWorker, JobOutcome};

    struct FailingStore;

    impl PayloadStore for FailingStore {
        fn save(&self, alias: &str, filename: &str, _: &[u8]) -> Result<PathBuf, StorageError> {
            Err(StorageError::InvalidTarget {
                alias: alias.to_owned(),
                filename: filename.to_owned(),
            })
        }
    }

    struct Harness {
        endpoints: EndpointSet,
        queues: Arc<EndpointQueues>,
        scheduler: Arc<TurnScheduler>,
    }

    impl Harness {
        fn new(quantum: Duration) -> Self {
            let endpoints = EndpointSet::new(["s01", "s02"]).expect("set should build");
            let queues = Arc::new(EndpointQueues::for_endpoints(&endpoints));
            let scheduler = Arc::new(
                TurnScheduler::new(endpoints.len(), quantum).expect("scheduler should build"),
            );
            Self {
                endpoints,
                queues,
                scheduler,
            }
        }

        fn worker(&self, alias: &str, store: Arc<dyn PayloadStore>) -> EndpointWorker {
            let (logger, _sink) = memory_logger(LogLevel::Debug);
            EndpointWorker::new(
                self.endpoints.find(alias).expect("endpoint should exist").clone(),
                Arc::clone(&self.scheduler),
                Arc::clone(&self.queues),
                store,
                ReadLimits {
                    peek_timeout: Duration::from_millis(500),
                    settle: Duration::from_millis(50),
                    max_bytes: 2048,
                },
                logger,
            )
        }
    }

    fn delivered_job(alias: &str, filename: &str, message: &[u8]) -> (Job, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("listener should expose addr");
        let mut client = TcpStream::connect(addr).expect("client should connect");
        let (connection, _) = listener.accept().expect("listener should accept");
        client.write_all(message).expect("client write should succeed");
        client
            .shutdown(Shutdown::Write)
            .expect("client half-close should succeed");
        (Job::new(alias, filename, connection), client)
    }

    fn read_reply(mut client: TcpStream) -> String {
        let mut reply = String::new();
        client
            .read_to_string(&mut reply)
            .expect("client should read reply");
        reply
    }

    #[test]
    fn stores_matching_delivery_and_replies_success() {
        let harness = Harness::new(Duration::from_secs(5));
        let store = Arc::new(MemoryPayloadStore::new());
        let worker = harness.worker("s01", store.clone());

        let (job, client) = delivered_job("s01", "a.txt", b"s01|a.txt|hello|world");
        let outcome = worker.process_job(job);

        assert!(matches!(outcome, JobOutcome::Stored { .. }));
        assert_eq!(read_reply(client), "File received successfully");
        assert_eq!(store.get("s01", "a.txt"), Some(b"hello|world".to_vec()));
    }

    #[test]
    fn rejects_delivery_for_another_endpoint() {
        let harness = Harness::new(Duration::from_secs(5));
        let store = Arc::new(MemoryPayloadStore::new());
        let worker = harness.worker("s01", store.clone());

        let (job, client) = delivered_job("s01", "a.txt", b"s02|a.txt|hello");
        assert_eq!(
            worker.process_job(job),
            JobOutcome::WrongServer {
                alias: "s02".to_owned()
            }
        );
        assert_eq!(read_reply(client), "REJECTED - Wrong server");
        assert!(store.records().is_empty());
    }

    #[test]
    fn rejects_unparsable_delivery() {
        let harness = Harness::new(Duration::from_secs(5));
        let worker = harness.worker("s01", Arc::new(MemoryPayloadStore::new()));

        let (job, client) = delivered_job("s01", "a.txt", b"s01|a.txt");
        assert_eq!(worker.process_job(job), JobOutcome::InvalidFormat);
        assert_eq!(read_reply(client), "REJECTED - Invalid format");
    }

    #[test]
    fn reports_storage_failure_to_client() {
        let harness = Harness::new(Duration::from_secs(5));
        let worker = harness.worker("s01", Arc::new(FailingStore));

        let (job, client) = delivered_job("s01", "a.txt", b"s01|a.txt|x");
        assert_eq!(worker.process_job(job), JobOutcome::StorageFailed);
        assert_eq!(read_reply(client), "REJECTED - Storage failure");
    }

    #[test]
    fn turn_serves_queue_in_order_and_holds_full_quantum() {
        let quantum = Duration::from_millis(200);
        let harness = Harness::new(quantum);
        let store = Arc::new(MemoryPayloadStore::new());
        let worker = harness.worker("s01", store.clone());
        let s01 = harness.endpoints.find("s01").expect("s01 should exist");

        let mut clients = Vec::new();
        for name in ["A", "B", "C"] {
            let filename = format!("{name}.txt");
            let message = format!("s01|{filename}|{name}");
            let (job, client) = delivered_job("s01", &filename, message.as_bytes());
            harness
                .queues
                .queue(s01)
                .push(job)
                .expect("push should pass");
            clients.push(client);
        }

        let started = harness
            .scheduler
            .acquire_turn(s01.ordinal())
            .expect("s01 should acquire first turn");
        let report = worker.run_turn(started);
        harness.scheduler.end_turn(s01.ordinal());

        assert_eq!(report.processed, 3);
        assert_eq!(report.stored, 3);
        assert!(Instant::now().duration_since(started) >= quantum);
        assert_eq!(harness.scheduler.snapshot().current_index, 1);

        let order = store
            .records()
            .into_iter()
            .map(|record| record.filename)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["A.txt", "B.txt", "C.txt"]);
        for client in clients {
            assert_eq!(read_reply(client), "File received successfully");
        }
    }

    #[test]
    fn closed_queue_ends_turn_early() {
        let harness = Harness::new(Duration::from_secs(30));
        let worker = harness.worker("s01", Arc::new(MemoryPayloadStore::new()));

        harness.queues.close_all();
        let started = harness.scheduler.acquire_turn(0).expect("turn should start");
        let report = worker.run_turn(started);
        harness.scheduler.end_turn(0);

        assert_eq!(report.processed, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
