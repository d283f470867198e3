//! Fatal error taxonomy shared by trains, authority workers and the supervisor.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors that terminate the actor that hits them.
///
/// "Not yet authorized" and "segment not yet free" are not errors: trains
/// poll for those.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A segment cell could not be read or holds neither `'0'` nor `'1'`.
    #[error("failed to read segment MA{segment} at {}: {reason}", path.display())]
    ResourceRead {
        /// Segment id.
        segment: u32,
        /// Backing file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
        /// Underlying I/O failure, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// A segment cell could not be created, written or removed.
    #[error("failed to write segment MA{segment} at {}", path.display())]
    ResourceWrite {
        /// Segment id.
        segment: u32,
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Malformed position, itinerary, request or response encoding.
    #[error("malformed {what}: {input:?}")]
    ProtocolParse {
        /// Kind of value being parsed.
        what: &'static str,
        /// Offending input.
        input: String,
    },

    /// The authorization channel could not be established or used.
    #[error("authority connection failed: {context}")]
    Connection {
        /// Operation in progress.
        context: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Invalid control level, map selection or configuration source.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A movement or audit journal could not be written.
    #[error("failed to write journal {}", path.display())]
    Journal {
        /// Journal file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl ControlError {
    pub(crate) fn parse(what: &'static str, input: impl Into<String>) -> Self {
        Self::ProtocolParse {
            what,
            input: input.into(),
        }
    }

    pub(crate) fn connection(context: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            context: context.into(),
            source,
        }
    }

    /// Process exit status for this error: the OS error code when one is
    /// available, `1` otherwise. Never zero.
    pub fn exit_code(&self) -> i32 {
        let source = match self {
            Self::ResourceRead { source, .. } => source.as_ref(),
            Self::ResourceWrite { source, .. }
            | Self::Connection { source, .. }
            | Self::Journal { source, .. } => Some(source),
            Self::ProtocolParse { .. } | Self::Configuration(_) => None,
        };
        source
            .and_then(io::Error::raw_os_error)
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

/// Convenience alias for results carrying a [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;
