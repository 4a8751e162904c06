use std::time::Duration;

/// Session-wide tunables. All fields have the defaults named in the spec;
/// construct with `Config { accept_backlog: 512, ..Default::default() }`
/// to override a subset.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Bounded capacity of the accept queue. A `SYN` that arrives once the
    /// queue is full is rejected with a stateless `RST`.
    pub accept_backlog: usize,
    /// Whether the session runs its own background keep-alive pings.
    pub enable_keep_alive: bool,
    /// Interval between background keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Bounds any single transport write performed by the send loop.
    pub connection_write_timeout: Duration,
    /// Initial and maximum per-stream flow-control window (`W0`). Also
    /// bounds the maximum `DATA` payload of a single frame.
    pub max_stream_window_size: u32,
    /// Bounds how long a locally opened stream waits for the peer's first
    /// `ACK`-bearing frame; expiry kills the session.
    pub stream_open_timeout: Duration,
    /// Timeout for an individual `Ping` call (including background
    /// keep-alive pings).
    pub ping_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accept_backlog: 256,
            enable_keep_alive: true,
            keep_alive_interval: Duration::from_secs(30),
            connection_write_timeout: Duration::from_secs(10),
            max_stream_window_size: 256 * 1024,
            stream_open_timeout: Duration::from_secs(75),
            ping_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.max_stream_window_size == 0 {
            return Err(crate::error::Error::Protocol(
                "max_stream_window_size must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.accept_backlog, 256);
        assert!(c.enable_keep_alive);
        assert_eq!(c.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(c.connection_write_timeout, Duration::from_secs(10));
        assert_eq!(c.max_stream_window_size, 256 * 1024);
        assert_eq!(c.stream_open_timeout, Duration::from_secs(75));
    }
}
