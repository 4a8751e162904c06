//! Background timer thread (`spec.md` §4.7, §5): the third logical worker
//! alongside the receive and send loops. Does two unrelated but cheap
//! jobs on the same tick so a session only pays for one extra thread:
//! issuing periodic keep-alive pings, and sweeping locally-opened streams
//! that never got their first `ACK` within `StreamOpenTimeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::error;

use crate::error::Error;
use crate::frame::{Flags, FrameHeader};
use crate::ping;
use crate::session::SessionShared;

/// How often we re-check state, independent of `KeepAliveInterval`. Keeps
/// the `StreamOpenTimeout` sweep responsive even when keep-alive pings are
/// disabled or set to a long interval.
const TICK: Duration = Duration::from_secs(1);

pub(crate) fn run(shared: Arc<SessionShared>) {
    let mut last_ping = Instant::now();

    loop {
        if shared.is_dead() {
            return;
        }
        if shared.wait_tick(TICK) {
            return;
        }

        if let Some(id) = shared.sweep_open_timeout() {
            error!(stream_id = id, "StreamOpenTimeout expired waiting for peer ACK");
            shared.shutdown(Some(Error::Protocol(format!(
                "stream {id} exceeded StreamOpenTimeout waiting for peer ACK"
            ))));
            return;
        }

        if !shared.keep_alive_enabled() || last_ping.elapsed() < shared.keep_alive_interval() {
            continue;
        }
        last_ping = Instant::now();

        let submit_shared = shared.clone();
        let result = ping::ping_and_wait(shared.pings(), shared.ping_timeout(), move |nonce| {
            submit_shared.submit(FrameHeader::ping(Flags::SYN, nonce), Bytes::new());
        });
        if result.is_err() {
            error!("keep-alive ping timed out, presuming peer dead");
            shared.shutdown(Some(Error::KeepAliveTimeout));
            return;
        }
    }
}
