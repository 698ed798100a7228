//! Error types for the butterfly-osm toolkit
//!
//! Every failure falls into one category, and each category maps to a
//! distinct process exit code so scripts can tell a bad command line from a
//! truncated input file.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for butterfly-osm operations
#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting or unparsable command-line options
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Input file could not be opened or read
    #[error("Cannot read '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Input violates the rules of its serialization
    #[error("Malformed {format} input at byte {offset}: {message}")]
    Malformed {
        format: &'static str,
        offset: u64,
        message: String,
    },

    /// Input is well-formed but uses a feature this toolkit does not handle
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Output could not be written
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Presence table could not be allocated even after shrinking
    #[error("Could not allocate {0}")]
    HashAllocation(String),

    /// Any other I/O error while reading
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Process exit codes, one per error category
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const OTHER: i32 = 1;
    pub const BAD_ARGUMENTS: i32 = 2;
    pub const UNREADABLE: i32 = 3;
    pub const MALFORMED: i32 = 4;
    pub const WRITE_FAILED: i32 = 5;
    pub const HASH_ALLOCATION: i32 = 6;
}

impl Error {
    /// Build a malformed-input error for the given codec and byte offset
    pub fn malformed(format: &'static str, offset: u64, message: impl Into<String>) -> Self {
        Error::Malformed {
            format,
            offset,
            message: message.into(),
        }
    }

    /// Wrap an open/read failure with the path that caused it
    pub fn unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Exit code the command-line front end reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArguments(_) => exit_code::BAD_ARGUMENTS,
            Error::Unreadable { .. } | Error::Io(_) => exit_code::UNREADABLE,
            Error::Malformed { .. } | Error::Unsupported(_) => exit_code::MALFORMED,
            Error::WriteFailed(_) => exit_code::WRITE_FAILED,
            Error::HashAllocation(_) => exit_code::HASH_ALLOCATION,
        }
    }
}

/// Result type alias for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_names_offset() {
        let err = Error::malformed("o5m", 42, "string reference out of range");
        assert_eq!(
            err.to_string(),
            "Malformed o5m input at byte 42: string reference out of range"
        );
        assert_eq!(err.exit_code(), exit_code::MALFORMED);
    }

    #[test]
    fn categories_have_distinct_exit_codes() {
        let errors = [
            Error::InvalidArguments("x".into()),
            Error::unreadable("a.osm", io::Error::new(io::ErrorKind::NotFound, "gone")),
            Error::malformed("xml", 0, "x"),
            Error::WriteFailed(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")),
            Error::HashAllocation("node table".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&exit_code::SUCCESS));
    }

    #[test]
    fn io_errors_convert() {
        fn read() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?
        }
        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
