use std::fmt;
use std::net::{SocketAddr, TcpStream};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

/// One classified delivery waiting for its endpoint's turn. The connection
/// still holds the unread message.
pub struct Job {
    pub uuid: Uuid,
    pub target_alias: String,
    pub filename: String,
    pub connection: TcpStream,
    pub peer_addr: Option<SocketAddr>,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        target_alias: impl Into<String>,
        filename: impl Into<String>,
        connection: TcpStream,
    ) -> Self {
        let peer_addr = connection.peer_addr().ok();
        Self {
            uuid: Uuid::new_v4(),
            target_alias: target_alias.into(),
            filename: filename.into(),
            connection,
            peer_addr,
            enqueued_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> String {
        format!("{}:{}", self.target_alias, self.uuid)
    }

    pub fn log_payload(&self) -> Value {
        json!({
            "job_id": self.job_id(),
            "endpoint": self.target_alias,
            "filename": self.filename,
            "peer": self.peer_addr.map(|addr| addr.to_string()),
            "enqueued_at": self.enqueued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("uuid", &self.uuid)
            .field("target_alias", &self.target_alias)
            .field("filename", &self.filename)
            .field("peer_addr", &self.peer_addr)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use super::Job;

    #[test]
    fn job_id_combines_endpoint_and_uuid() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("listener should expose addr");
        let _client = TcpStream::connect(addr).expect("client should connect");
        let (connection, peer) = listener.accept().expect("listener should accept");

        let job = Job::new("s03", "a.txt", connection);
        assert_eq!(job.job_id(), format!("s03:{}", job.uuid));
        assert_eq!(job.peer_addr, Some(peer));

        let payload = job.log_payload();
        assert_eq!(payload["endpoint"], "s03");
        assert_eq!(payload["filename"], "a.txt");
        assert!(format!("{job:?}").contains("a.txt"));
    }
}
