use std::fmt;

pub const DELIMITER: u8 = b'|';
pub const MAX_ALIAS_BYTES: usize = 31;
pub const MAX_FILENAME_BYTES: usize = 255;

/// Final answer written to a data-phase client before its connection closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseToken {
    Received,
    WrongServer,
    InvalidFormat,
    UnknownServer,
    StorageFailure,
}

impl ResponseToken {
    pub const ALL: [Self; 5] = [
        Self::Received,
        Self::WrongServer,
        Self::InvalidFormat,
        Self::UnknownServer,
        Self::StorageFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "File received successfully",
            Self::WrongServer => "REJECTED - Wrong server",
            Self::InvalidFormat => "REJECTED - Invalid format",
            Self::UnknownServer => "REJECTED - Unknown server",
            Self::StorageFailure => "REJECTED - Storage failure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|token| token.as_str() == trimmed)
    }

    pub fn is_success(self) -> bool {
        self == Self::Received
    }
}

impl fmt::Display for ResponseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of an `alias|filename|content` message. `content` is every
/// byte after the second delimiter, delimiters included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader<'a> {
    pub alias: &'a str,
    pub filename: &'a str,
    pub content: &'a [u8],
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    MissingAliasDelimiter,
    MissingFilenameDelimiter,
    EmptyAlias,
    EmptyFilename,
    AliasTooLong { length: usize },
    FilenameTooLong { length: usize },
    NonUtf8Field { field: &'static str },
    UnsafeFilename { filename: String },
}

impl CodecError {
    // More bytes could still turn these into a valid header.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::MissingAliasDelimiter | Self::MissingFilenameDelimiter
        )
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAliasDelimiter => write!(f, "message has no '|' after the alias"),
            Self::MissingFilenameDelimiter => {
                write!(f, "message has no '|' after the filename")
            }
            Self::EmptyAlias => write!(f, "alias field is empty"),
            Self::EmptyFilename => write!(f, "filename field is empty"),
            Self::AliasTooLong { length } => write!(
                f,
                "alias is {length} bytes long, limit is {MAX_ALIAS_BYTES}"
            ),
            Self::FilenameTooLong { length } => write!(
                f,
                "filename is {length} bytes long, limit is {MAX_FILENAME_BYTES}"
            ),
            Self::NonUtf8Field { field } => write!(f, "{field} field is not valid UTF-8"),
            Self::UnsafeFilename { filename } => {
                write!(f, "filename '{filename}' would escape the endpoint directory")
            }
        }
    }
}

impl std::error::Error for CodecError {}

pub fn encode_message(alias: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(alias.len() + filename.len() + content.len() + 2);
    message.extend_from_slice(alias.as_bytes());
    message.push(DELIMITER);
    message.extend_from_slice(filename.as_bytes());
    message.push(DELIMITER);
    message.extend_from_slice(content);
    message
}

pub fn header_is_complete(buffer: &[u8]) -> bool {
    buffer.iter().filter(|byte| **byte == DELIMITER).take(2).count() == 2
}

pub fn parse_header(message: &[u8]) -> Result<MessageHeader<'_>, CodecError> {
    let alias_end = find_delimiter(message);
    let Some(alias_end) = alias_end else {
        if message.len() > MAX_ALIAS_BYTES {
            return Err(CodecError::AliasTooLong {
                length: message.len(),
            });
        }
        return Err(CodecError::MissingAliasDelimiter);
    };
    let alias = field_str(&message[..alias_end], "alias")?;
    if alias.is_empty() {
        return Err(CodecError::EmptyAlias);
    }
    if alias.len() > MAX_ALIAS_BYTES {
        return Err(CodecError::AliasTooLong {
            length: alias.len(),
        });
    }

    let rest = &message[alias_end + 1..];
    let Some(filename_end) = find_delimiter(rest) else {
        if rest.len() > MAX_FILENAME_BYTES {
            return Err(CodecError::FilenameTooLong { length: rest.len() });
        }
        return Err(CodecError::MissingFilenameDelimiter);
    };
    let filename = field_str(&rest[..filename_end], "filename")?;
    validate_filename(filename)?;

    Ok(MessageHeader {
        alias,
        filename,
        content: &rest[filename_end + 1..],
    })
}

pub fn validate_filename(filename: &str) -> Result<(), CodecError> {
    if filename.is_empty() {
        return Err(CodecError::EmptyFilename);
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(CodecError::FilenameTooLong {
            length: filename.len(),
        });
    }
    if filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(CodecError::UnsafeFilename {
            filename: filename.to_owned(),
        });
    }
    Ok(())
}

fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|byte| *byte == DELIMITER)
}

fn field_str<'a>(bytes: &'a [u8], field: &'static str) -> Result<&'a str, CodecError> {
    std::str::from_utf8(bytes).map_err(|_| CodecError::NonUtf8Field { field })
}

#[cfg(test)]
mod tests {
    use super::{
        encode_message, header_is_complete, parse_header, CodecError, ResponseToken,
        MAX_ALIAS_BYTES,
    };

    #[test]
    fn parses_three_field_message() {
        let header = parse_header(b"s03|a.txt|hello").expect("message should parse");
        assert_eq!(header.alias, "s03");
        assert_eq!(header.filename, "a.txt");
        assert_eq!(header.content, b"hello");
    }

    #[test]
    fn content_keeps_delimiters_and_newlines() {
        let header =
            parse_header(b"s01|notes.txt|a|b\nc|").expect("message with pipes should parse");
        assert_eq!(header.content, b"a|b\nc|");
    }

    #[test]
    fn empty_content_is_allowed() {
        let header = parse_header(b"s01|empty.txt|").expect("empty content should parse");
        assert!(header.content.is_empty());
    }

    #[test]
    fn garbage_without_delimiters_is_incomplete() {
        let err = parse_header(b"garbage").expect_err("garbage should not parse");
        assert_eq!(err, CodecError::MissingAliasDelimiter);
        assert!(err.is_incomplete());

        let err = parse_header(b"s01|a.txt").expect_err("missing second delimiter");
        assert_eq!(err, CodecError::MissingFilenameDelimiter);
        assert!(err.is_incomplete());
    }

    #[test]
    fn overlong_alias_is_rejected_even_without_delimiter() {
        let long = "x".repeat(MAX_ALIAS_BYTES + 1);
        let err = parse_header(long.as_bytes()).expect_err("long alias should fail");
        assert!(matches!(err, CodecError::AliasTooLong { .. }));
        assert!(!err.is_incomplete());
    }

    #[test]
    fn rejects_empty_fields_and_path_traversal() {
        assert_eq!(
            parse_header(b"|a.txt|x").expect_err("empty alias"),
            CodecError::EmptyAlias
        );
        assert_eq!(
            parse_header(b"s01||x").expect_err("empty filename"),
            CodecError::EmptyFilename
        );
        assert!(matches!(
            parse_header(b"s01|../etc/passwd|x").expect_err("traversal"),
            CodecError::UnsafeFilename { .. }
        ));
        assert!(matches!(
            parse_header(b"s01|..|x").expect_err("dot-dot"),
            CodecError::UnsafeFilename { .. }
        ));
    }

    #[test]
    fn rejects_non_utf8_alias() {
        let err = parse_header(&[0xff, 0xfe, b'|', b'a', b'|']).expect_err("bad utf8");
        assert_eq!(err, CodecError::NonUtf8Field { field: "alias" });
    }

    #[test]
    fn encode_matches_wire_layout() {
        assert_eq!(encode_message("s01", "a.txt", b"hello"), b"s01|a.txt|hello");
    }

    #[test]
    fn header_completion_needs_two_delimiters() {
        assert!(!header_is_complete(b"s01"));
        assert!(!header_is_complete(b"s01|a.txt"));
        assert!(header_is_complete(b"s01|a.txt|"));
    }

    #[test]
    fn response_tokens_parse_back() {
        for token in ResponseToken::ALL {
            assert_eq!(ResponseToken::parse(token.as_str()), Some(token));
        }
        assert_eq!(
            ResponseToken::parse("File received successfully\n"),
            Some(ResponseToken::Received)
        );
        assert_eq!(ResponseToken::parse("REJECTED"), None);
        assert!(ResponseToken::Received.is_success());
        assert!(!ResponseToken::WrongServer.is_success());
    }
}
