//! Error taxonomy shared by every database component.
//!
//! None of these are transient: a corrupt artifact or a caller contract
//! violation is surfaced as-is and never retried.

use thiserror::Error;

/// Errors raised by the timeline, catalog, feature index and concatenator.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed header, index or record. The database is unusable.
    #[error("corrupt database: {0}")]
    CorruptDatabase(String),

    /// An id or sample window outside known bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Feature name, value or vector width does not match the schema.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// Caller contract violation, e.g. a selected unit without concatenation data.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptDatabase(msg.into())
    }

    /// Map a read failure while parsing a file header or record.
    ///
    /// A short read means the file is truncated, which is a format problem
    /// rather than an OS one.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::CorruptDatabase(format!("{what}: unexpected end of file"))
        } else {
            Self::Io(err)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_is_corruption() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(Error::from_read(err, "header"), Error::CorruptDatabase(_)));
    }

    #[test]
    fn test_other_io_is_io() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(Error::from_read(err, "header"), Error::Io(_)));
    }

    #[test]
    fn test_display_names_category() {
        let msg = Error::OutOfRange("unit 7".into()).to_string();
        assert_eq!(msg, "out of range: unit 7");
    }
}
