use std::io;

use crate::frame::MAX_VERSION;

/// Everything that can go wrong talking to a peer or using a stream.
///
/// Wire-level and transport-level faults (`InvalidVersion`, `InvalidType`,
/// `OversizedFrame`, `Protocol`, `StreamsExhausted`, `ConnectionReset`,
/// `KeepAliveTimeout`, `Io`) are fatal: they kill the whole session.
/// Stream-level faults (`StreamReset`, `Timeout`) are local to one stream
/// and never bring the session down.
///
/// A duplicate incoming `SYN` is not a variant here: it's handled as a
/// stateless `RST` back to the peer (`spec.md` §4.4) without ever touching
/// session state, so there's no error value for it to surface as.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported frame version {got} (expected {MAX_VERSION})")]
    InvalidVersion { got: u8 },

    #[error("unknown frame type {got}")]
    InvalidType { got: u8 },

    #[error("DATA frame length {length} exceeds the configured maximum {max}")]
    OversizedFrame { length: u32, max: u32 },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("local stream identifier pool exhausted")]
    StreamsExhausted,

    #[error("receive window exceeded on stream {0}")]
    ReceiveWindowExceeded(u32),

    #[error("stream reset by peer")]
    StreamReset,

    #[error("peer closed the underlying connection")]
    ConnectionReset,

    #[error("session is shutting down or dead")]
    SessionShutdown,

    #[error("peer sent GO_AWAY, no new streams may be opened")]
    RemoteGoAway,

    #[error("deadline expired")]
    Timeout,

    #[error("keep-alive timed out, peer is presumed dead")]
    KeepAliveTimeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error kind always terminates the whole session, as
    /// opposed to being local to one stream or one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidVersion { .. }
                | Error::InvalidType { .. }
                | Error::OversizedFrame { .. }
                | Error::Protocol(_)
                | Error::StreamsExhausted
                | Error::ConnectionReset
                | Error::KeepAliveTimeout
                | Error::Io(_)
        )
    }

    /// Which `GO_AWAY` reason code a fatal error should be announced with
    /// (`spec.md` §6). Wire-format violations are the peer's or our own
    /// parsing's fault and get `ProtocolError`; everything else fatal
    /// (a dead transport, a missed keep-alive) is `InternalError`.
    pub(crate) fn go_away_reason(&self) -> crate::frame::GoAwayReason {
        use crate::frame::GoAwayReason;
        match self {
            Error::InvalidVersion { .. }
            | Error::InvalidType { .. }
            | Error::OversizedFrame { .. }
            | Error::Protocol(_)
            | Error::StreamsExhausted => GoAwayReason::ProtocolError,
            _ => GoAwayReason::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    /// Lets [`crate::Stream`] implement `std::io::Read`/`Write` directly.
    /// `Timeout` maps to `ErrorKind::TimedOut` so callers can match on the
    /// standard kind without depending on this crate's `Error` type.
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            Error::StreamReset | Error::ConnectionReset | Error::SessionShutdown => {
                io::Error::new(io::ErrorKind::ConnectionReset, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
