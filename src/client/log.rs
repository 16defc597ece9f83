use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

pub const MISSING_FILE_ENDPOINT: &str = "File not found";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

/// Append-only record of delivery attempts, one line per attempt.
#[derive(Clone, Debug)]
pub struct ClientLogger {
    path: PathBuf,
}

impl ClientLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, status: DeliveryStatus, filename: &str, endpoint: &str) -> io::Result<()> {
        let line = format_record(Local::now(), status, filename, endpoint);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

pub fn format_record(
    at: DateTime<Local>,
    status: DeliveryStatus,
    filename: &str,
    endpoint: &str,
) -> String {
    format!(
        "{} | {} | {filename} | {endpoint}",
        at.format("%Y-%m-%d %H:%M:%S"),
        status.as_str()
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{Local, TimeZone};

    use crate::storage::test_support::unique_temp_dir;

    use super::{format_record, ClientLogger, DeliveryStatus, MISSING_FILE_ENDPOINT};

    #[test]
    fn formats_pipe_separated_record() {
        let at = Local
            .with_ymd_and_hms(2025, 3, 7, 9, 5, 1)
            .single()
            .expect("timestamp should be unambiguous");
        assert_eq!(
            format_record(at, DeliveryStatus::Success, "a.txt", "s03"),
            "2025-03-07 09:05:01 | SUCCESS | a.txt | s03"
        );
    }

    #[test]
    fn appends_records_in_order() {
        let dir = unique_temp_dir("client-log");
        fs::create_dir_all(&dir).expect("temp dir should be created");
        let logger = ClientLogger::new(dir.join("clientLog.txt"));

        logger
            .record(DeliveryStatus::Success, "a.txt", "s01")
            .expect("first record should append");
        logger
            .record(DeliveryStatus::Error, "missing.txt", MISSING_FILE_ENDPOINT)
            .expect("second record should append");

        let contents = fs::read_to_string(logger.path()).expect("log should be readable");
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" | SUCCESS | a.txt | s01"));
        assert!(lines[1].ends_with(" | ERROR | missing.txt | File not found"));

        let _ = fs::remove_dir_all(dir);
    }
}
