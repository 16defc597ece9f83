use std::fmt;

pub const PORT_ANNOUNCEMENT_PREFIX: &str = "DYNAMIC_PORT";

#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    MissingPrefix { received: String },
    InvalidPort { raw: String },
    NonUtf8,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrefix { received } => write!(
                f,
                "expected '{PORT_ANNOUNCEMENT_PREFIX}|<port>', got '{received}'"
            ),
            Self::InvalidPort { raw } => write!(f, "announced port '{raw}' is not a valid port"),
            Self::NonUtf8 => write!(f, "port announcement is not valid UTF-8"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Control-phase reply; sent without a trailing newline.
pub fn encode_port_announcement(port: u16) -> Vec<u8> {
    format!("{PORT_ANNOUNCEMENT_PREFIX}|{port}").into_bytes()
}

pub fn parse_port_announcement(raw: &[u8]) -> Result<u16, HandshakeError> {
    let text = std::str::from_utf8(raw).map_err(|_| HandshakeError::NonUtf8)?;
    let text = text.trim();
    let port = text
        .strip_prefix(PORT_ANNOUNCEMENT_PREFIX)
        .and_then(|rest| rest.strip_prefix('|'))
        .ok_or_else(|| HandshakeError::MissingPrefix {
            received: text.to_owned(),
        })?;

    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(HandshakeError::InvalidPort {
            raw: port.to_owned(),
        }),
        Ok(port) => Ok(port),
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_port_announcement, parse_port_announcement, HandshakeError};

    #[test]
    fn announcement_has_no_trailing_newline() {
        assert_eq!(encode_port_announcement(49201), b"DYNAMIC_PORT|49201");
    }

    #[test]
    fn parses_announcement_with_surrounding_whitespace() {
        assert_eq!(parse_port_announcement(b"DYNAMIC_PORT|49207\n"), Ok(49207));
        assert_eq!(
            parse_port_announcement(&encode_port_announcement(50000)),
            Ok(50000)
        );
    }

    #[test]
    fn rejects_rejection_tokens_and_bad_ports() {
        assert!(matches!(
            parse_port_announcement(b"REJECTED - Invalid format"),
            Err(HandshakeError::MissingPrefix { .. })
        ));
        assert!(matches!(
            parse_port_announcement(b"DYNAMIC_PORT|0"),
            Err(HandshakeError::InvalidPort { .. })
        ));
        assert!(matches!(
            parse_port_announcement(b"DYNAMIC_PORT|70000"),
            Err(HandshakeError::InvalidPort { .. })
        ));
        assert_eq!(
            parse_port_announcement(&[0xff]),
            Err(HandshakeError::NonUtf8)
        );
    }
}
