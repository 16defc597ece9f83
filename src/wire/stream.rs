use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ClassifierConfig;
use crate::wire::codec::{header_is_complete, parse_header, ResponseToken};

const PEEK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLimits {
    pub peek_timeout: Duration,
    pub settle: Duration,
    pub max_bytes: usize,
}

impl ReadLimits {
    pub fn from_classifier_config(config: &ClassifierConfig) -> Self {
        Self {
            peek_timeout: Duration::from_millis(config.peek_timeout_ms),
            settle: Duration::from_millis(config.settle_ms),
            max_bytes: config.max_message_bytes.max(1),
        }
    }
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self::from_classifier_config(&ClassifierConfig::default())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Peeked {
    Closed,
    TimedOut,
    Bytes(Vec<u8>),
}

/// Inspects the pending bytes without consuming them, so whoever later owns
/// the connection still reads the whole message.
pub fn peek_header(stream: &TcpStream, limits: &ReadLimits) -> io::Result<Peeked> {
    stream.set_read_timeout(Some(clamp(limits.peek_timeout)))?;
    let mut buffer = vec![0_u8; limits.max_bytes];

    let mut seen = match stream.peek(&mut buffer) {
        Ok(0) => return Ok(Peeked::Closed),
        Ok(read) => read,
        Err(error) if is_timeout(&error) => return Ok(Peeked::TimedOut),
        Err(error) => return Err(error),
    };

    let mut last_growth = Instant::now();
    loop {
        if header_settled(&buffer[..seen]) || seen == limits.max_bytes {
            break;
        }
        if last_growth.elapsed() >= limits.settle {
            break;
        }

        thread::sleep(PEEK_POLL_INTERVAL);
        match stream.peek(&mut buffer) {
            Ok(read) if read > seen => {
                seen = read;
                last_growth = Instant::now();
            }
            Ok(_) => {}
            Err(error) if is_timeout(&error) => break,
            Err(error) => return Err(error),
        }
    }

    buffer.truncate(seen);
    Ok(Peeked::Bytes(buffer))
}

/// Consumes one message: stops at EOF, at the size cap, or once the peer has
/// been quiet for `settle`.
pub fn read_message(stream: &mut TcpStream, limits: &ReadLimits) -> io::Result<Vec<u8>> {
    stream.set_read_timeout(Some(clamp(limits.peek_timeout)))?;
    let mut message = Vec::with_capacity(limits.max_bytes.min(4096));
    let mut chunk = [0_u8; 1024];

    while message.len() < limits.max_bytes {
        let wanted = chunk.len().min(limits.max_bytes - message.len());
        match stream.read(&mut chunk[..wanted]) {
            Ok(0) => break,
            Ok(read) => {
                message.extend_from_slice(&chunk[..read]);
                stream.set_read_timeout(Some(clamp(limits.settle)))?;
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if is_timeout(&error) => {
                if message.is_empty() {
                    return Err(error);
                }
                break;
            }
            Err(error) => return Err(error),
        }
    }

    Ok(message)
}

/// Writes the final token and closes both directions.
pub fn respond(stream: &mut TcpStream, token: ResponseToken) -> io::Result<()> {
    stream.write_all(token.as_str().as_bytes())?;
    stream.flush()?;
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(error) => Err(error),
    }
}

/// Closes a connection that will never get a reply. Whatever the peer
/// already sent is read and discarded first, so the peer sees a clean EOF
/// rather than a reset.
pub fn close_unanswered(stream: &mut TcpStream, limits: &ReadLimits) -> io::Result<()> {
    stream.set_read_timeout(Some(clamp(limits.settle)))?;
    let deadline = Instant::now() + limits.peek_timeout;
    let mut scratch = [0_u8; 1024];

    while Instant::now() < deadline {
        match stream.read(&mut scratch) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if is_timeout(&error) => break,
            Err(error) => return Err(error),
        }
    }

    match stream.shutdown(Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(error) => Err(error),
    }
}

fn header_settled(bytes: &[u8]) -> bool {
    if header_is_complete(bytes) {
        return true;
    }
    matches!(parse_header(bytes), Err(error) if !error.is_incomplete())
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn clamp(duration: Duration) -> Duration {
    duration.max(MIN_SOCKET_TIMEOUT)
}
