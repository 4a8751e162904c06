//! The user-facing duplex endpoint (`spec.md` §4.3): one send half and one
//! receive half, each with its own lifecycle and deadline. The send state
//! machine lives here; the receive half's terminal state lives in
//! [`crate::buffer::StreamBuffer`].

use std::io;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::buffer::{PopOutcome, StreamBuffer, Terminal};
use crate::error::{Error, Result};
use crate::frame::{Flags, FrameHeader};
use crate::session::SessionShared;

/// Send-half lifecycle (`spec.md` §3, §4.3).
///
/// `SynReceived` is the mirror state for a peer-opened stream: we haven't
/// emitted a frame yet, but the peer already knows the id, so our first
/// outbound frame carries `ACK` instead of `SYN`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SendState {
    Init,
    SynSent,
    SynReceived,
    Established,
    LocalClosed,
    Closed,
    Reset,
}

impl SendState {
    fn is_terminal(self) -> bool {
        matches!(self, SendState::Closed | SendState::Reset)
    }
}

struct SendInner {
    state: SendState,
    send_window: u32,
    /// Set the instant the `SYN` frame is actually submitted (the
    /// `Init` -> `SynSent` transition in `next_frame_flags`), not when the
    /// stream is allocated. `StreamOpenTimeout` bounds time spent waiting
    /// for the peer's `ACK` after a `SYN` went out, not idle time before
    /// the caller ever wrote anything (`spec.md` §6).
    syn_sent_at: Option<Instant>,
}

/// Shared state for one stream, jointly referenced by the session registry
/// and whoever is using the stream (accept queue, then user code). Holds a
/// non-owning handle back to the session so it can submit frames without
/// creating an ownership cycle (`spec.md` §9).
pub(crate) struct StreamState {
    id: u32,
    max_payload: u32,
    locally_opened: bool,
    pub(crate) buffer: StreamBuffer,
    send: Mutex<SendInner>,
    send_cv: Condvar,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    session: Weak<SessionShared>,
}

impl StreamState {
    /// `locally_opened` picks the initial send state: `Init` for a stream
    /// we are about to `Open`, `SynReceived` for one created off an
    /// incoming `SYN`. Only locally-opened streams are subject to
    /// `StreamOpenTimeout` (`spec.md` §6) since only they are waiting on a
    /// peer `ACK` that might never come.
    pub(crate) fn new(
        id: u32,
        locally_opened: bool,
        initial_window: u32,
        max_payload: u32,
        session: Weak<SessionShared>,
    ) -> Self {
        Self {
            id,
            max_payload,
            locally_opened,
            buffer: StreamBuffer::new(id, initial_window),
            send: Mutex::new(SendInner {
                state: if locally_opened { SendState::Init } else { SendState::SynReceived },
                send_window: initial_window,
                syn_sent_at: None,
            }),
            send_cv: Condvar::new(),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
            session,
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Used by the keep-alive timer to enforce `StreamOpenTimeout`: true
    /// once a locally-opened stream has had its `SYN` on the wire for
    /// longer than `timeout` without seeing the peer's `ACK`. A stream
    /// that's still `Init` (never written/closed, so no `SYN` ever sent)
    /// never counts against this timeout — the peer doesn't know it
    /// exists yet.
    pub(crate) fn is_open_timed_out(&self, timeout: Duration) -> bool {
        if !self.locally_opened {
            return false;
        }
        let g = self.send.lock().unwrap();
        match (g.state, g.syn_sent_at) {
            (SendState::SynSent, Some(sent_at)) => sent_at.elapsed() >= timeout,
            _ => false,
        }
    }

    /// Both halves closed: the registry may drop this stream's slot.
    pub(crate) fn both_closed(&self) -> bool {
        self.buffer.is_terminal() && self.send.lock().unwrap().state.is_terminal()
    }

    /// Peer's `ACK` flag arrived: `SynSent` advances to `Established`.
    /// A no-op in every other state (e.g. a data-bearing frame that also
    /// happens to carry a stale `ACK`).
    pub(crate) fn on_peer_ack(&self) {
        let mut g = self.send.lock().unwrap();
        if g.state == SendState::SynSent {
            g.state = SendState::Established;
        }
    }

    pub(crate) fn add_send_window(&self, delta: u32) {
        let mut g = self.send.lock().unwrap();
        g.send_window = g.send_window.saturating_add(delta);
        drop(g);
        self.send_cv.notify_all();
    }

    /// Marks the send half terminal without emitting anything (used when
    /// the peer or the session forces a reset/shutdown).
    pub(crate) fn force_send_terminal(&self, state: SendState) {
        debug_assert!(state.is_terminal());
        let mut g = self.send.lock().unwrap();
        g.state = state;
        drop(g);
        self.send_cv.notify_all();
    }

    pub(crate) fn session(&self) -> Result<Arc<SessionShared>> {
        self.session.upgrade().ok_or(Error::SessionShutdown)
    }

    /// Computes the flags for the next outbound frame on this stream and
    /// advances the send state machine accordingly. Must be called exactly
    /// once per frame actually submitted, in submission order.
    fn next_frame_flags(&self, fin: bool) -> Flags {
        let mut g = self.send.lock().unwrap();
        let mut flags = Flags::empty();
        match g.state {
            SendState::Init => {
                flags |= Flags::SYN;
                g.state = SendState::SynSent;
                g.syn_sent_at = Some(Instant::now());
            }
            SendState::SynReceived => {
                flags |= Flags::ACK;
                g.state = SendState::Established;
            }
            _ => {}
        }
        if fin {
            flags |= Flags::FIN;
            if !g.state.is_terminal() {
                g.state = SendState::LocalClosed;
            }
        }
        flags
    }

    fn dec_send_window(&self, n: u32) {
        let mut g = self.send.lock().unwrap();
        g.send_window = g.send_window.saturating_sub(n);
    }

    /// Blocks until `send_window > 0`, the stream/session dies, or
    /// `deadline` passes.
    fn wait_for_window(&self, deadline: Option<Instant>) -> Result<u32> {
        let mut g = self.send.lock().unwrap();
        loop {
            if g.state == SendState::Reset {
                return Err(Error::StreamReset);
            }
            if g.state.is_terminal() {
                return Err(Error::StreamReset);
            }
            if let Some(session) = self.session.upgrade() {
                if session.is_dead() {
                    return Err(Error::SessionShutdown);
                }
            } else {
                return Err(Error::SessionShutdown);
            }
            if g.send_window > 0 {
                return Ok(g.send_window);
            }
            g = match deadline {
                None => self.send_cv.wait(g).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (guard, timeout) = self.send_cv.wait_timeout(g, deadline - now).unwrap();
                    if timeout.timed_out() && guard.send_window == 0 {
                        return Err(Error::Timeout);
                    }
                    guard
                }
            };
        }
    }
}

/// The public duplex endpoint returned by [`crate::Session::open`] and
/// [`crate::Session::accept_stream`]. Implements `std::io::Read` and
/// `std::io::Write` for the byte-stream halves; `close`/`reset`/deadlines
/// are inherent methods because they don't fit either trait.
pub struct Stream {
    state: Arc<StreamState>,
}

impl Stream {
    pub(crate) fn new(state: Arc<StreamState>) -> Self {
        Self { state }
    }

    pub fn stream_id(&self) -> u32 {
        self.state.id()
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.state.read_deadline.lock().unwrap() = deadline;
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self.state.write_deadline.lock().unwrap() = deadline;
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Half-closes the send side: emits `FIN` (combined with `SYN`/`ACK` if
    /// this is also the first frame ever sent on the stream). The receive
    /// side keeps draining until the peer's own `FIN`/`RST` arrives.
    pub fn close(&self) -> Result<()> {
        let flags = self.state.next_frame_flags(true);
        self.submit_data(flags, &[])?;
        self.finalize_if_both_closed();
        Ok(())
    }

    /// Aborts the stream in both directions and tells the peer via `RST`.
    pub fn reset(&self) -> Result<()> {
        self.state.force_send_terminal(SendState::Reset);
        self.state.buffer.terminate(Terminal::Reset);
        let session = self.state.session()?;
        session.submit(FrameHeader::data(self.state.id(), Flags::RST, 0), Bytes::new());
        session.remove_stream(self.state.id());
        Ok(())
    }

    fn submit_data(&self, flags: Flags, payload: &[u8]) -> Result<()> {
        let session = self.state.session()?;
        session.submit(
            FrameHeader::data(self.state.id(), flags, payload.len() as u32),
            Bytes::copy_from_slice(payload),
        );
        Ok(())
    }

    fn finalize_if_both_closed(&self) {
        if self.state.both_closed() {
            if let Ok(session) = self.state.session() {
                session.remove_stream(self.state.id());
            }
        }
    }

    fn read_inner(&self, out: &mut [u8]) -> Result<usize> {
        let deadline = *self.state.read_deadline.lock().unwrap();
        let PopOutcome { n, window_update } = self.state.buffer.pop(out, deadline)?;
        if let Some(delta) = window_update {
            if let Ok(session) = self.state.session() {
                session.submit(
                    FrameHeader::window_update(self.state.id(), Flags::empty(), delta),
                    Bytes::new(),
                );
            }
        }
        Ok(n)
    }

    fn write_inner(&self, buf: &[u8]) -> Result<usize> {
        let total = buf.len();
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = *self.state.write_deadline.lock().unwrap();
        let mut remaining = buf;
        while !remaining.is_empty() {
            let avail = self.state.wait_for_window(deadline)?;
            let chunk_len = remaining.len().min(avail as usize).min(self.state.max_payload as usize);
            let (chunk, rest) = remaining.split_at(chunk_len);
            let flags = self.state.next_frame_flags(false);
            self.submit_data(flags, chunk)?;
            self.state.dec_send_window(chunk_len as u32);
            remaining = rest;
        }
        Ok(total)
    }
}

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_inner(buf).map_err(Into::into)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_inner(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.state.id()).finish()
    }
}

impl Drop for Stream {
    /// Best-effort: a caller that drops a `Stream` without calling `close`
    /// still leaves the peer with a half-open connection until the session
    /// dies. We don't auto-close (that would silently discard a caller's
    /// intent to keep writing via a clone held elsewhere), but we do log
    /// so a leaked stream is visible in traces.
    fn drop(&mut self) {
        if !self.state.both_closed() {
            debug!(stream_id = self.state.id(), "stream dropped without close()");
        }
    }
}
