//! The send loop: sole writer of the transport, draining the
//! [`crate::scheduler::Scheduler`] queue (`spec.md` §4.5, §5). Exits once
//! the scheduler is closed, then shuts down the transport exactly once so
//! the peer (and our own receive loop, on a cloned-fd transport) unblocks.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::session::SessionShared;
use crate::transport::WriterControl;

pub(crate) fn run<W: Write + WriterControl>(
    mut writer: W,
    scheduler: Arc<Scheduler>,
    write_timeout: Duration,
    shared: Arc<SessionShared>,
) {
    let _ = writer.set_write_timeout(Some(write_timeout));

    while let Some(frame) = scheduler.pop() {
        let header = frame.header.encode();
        if let Err(e) = writer.write_all(&header).and_then(|()| writer.write_all(&frame.payload)) {
            shared.shutdown(Some(Error::Io(e)));
            break;
        }
    }

    debug!("send loop exiting, shutting down transport");
    let _ = writer.shutdown();
}
