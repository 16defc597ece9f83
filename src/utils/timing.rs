use std::time::{Duration, Instant};

use serde_json::json;

use crate::logging::{LogLevel, Logger};

/// Reports at debug level how long one job held its worker, measured from
/// construction until drop.
pub struct JobTimer<'a> {
    job_id: &'a str,
    context: Option<&'a str>,
    started_at: Instant,
    logger: &'a Logger,
}

impl<'a> JobTimer<'a> {
    pub fn start(job_id: &'a str, context: Option<&'a str>, logger: &'a Logger) -> Self {
        Self {
            job_id,
            context,
            started_at: Instant::now(),
            logger,
        }
    }
}

impl Drop for JobTimer<'_> {
    fn drop(&mut self) {
        if !self.logger.enabled(LogLevel::Debug) {
            return;
        }

        let elapsed = self.started_at.elapsed();
        self.logger.log(
            LogLevel::Debug,
            self.context,
            &format!("Job served in {}", format_elapsed(elapsed)),
            Some(json!({
                "job_id": self.job_id,
                "elapsed_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            })),
        );
    }
}

pub fn time_job<T>(
    job_id: &str,
    context: Option<&str>,
    logger: &Logger,
    work: impl FnOnce() -> T,
) -> T {
    let _timer = JobTimer::start(job_id, context, logger);
    work()
}

fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1_000 {
        return format!("{millis} ms");
    }

    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2} s");
    }

    let minutes = elapsed.as_secs() / 60;
    format!("{minutes}m {:.1}s", secs - (minutes * 60) as f64)
}
