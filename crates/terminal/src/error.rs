use std::io;

use thiserror::Error;

/// Errors that cross a boundary the caller must react to.
///
/// Per-byte parsing failures (bad UTF-8 continuation, an unmatched escape
/// sequence, a pagelet cookie mismatch) are *not* represented here: the
/// emulator degrades in place for those (discard, error-pagelet, strip) and
/// never returns a `Result` for them. This enum only covers the boundary
/// operations for which "the operation failed" is something a caller (or a
/// `save_status`/error-pagelet event) needs to see.
#[derive(Debug, Error)]
pub enum TermError {
    #[error("pty spawn failed: {0}")]
    Spawn(#[source] io::Error),

    #[error("pty io error on {term_name}: {source}")]
    PtyIo {
        term_name: String,
        #[source]
        source: io::Error,
    },

    #[error("file io error for {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no such terminal: {0}")]
    NoSuchTerminal(String),

    #[error("pagelet body exceeded {limit} bytes")]
    PageletOverflow { limit: usize },

    #[error("malformed pagelet header: {0}")]
    PageletHeader(#[source] serde_json::Error),
}

pub type TermResult<T> = Result<T, TermError>;
