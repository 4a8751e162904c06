//! Per-stream bounded receive buffer with signalling for readers, plus the
//! window-credit bookkeeping that backs flow control (`spec.md` §4.2).
//!
//! The ring itself uses the power-of-two index-masking technique the
//! teacher's shared-memory queue uses for its slot array (`count & mask`),
//! adapted here to a plain in-process byte ring behind a `Mutex`/`Condvar`
//! pair instead of an atomic cross-process slot array.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Why further reads/writes on this buffer will never succeed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// Peer sent `FIN`: drain what's buffered, then report end-of-stream.
    Fin,
    /// Peer sent `RST`, or we reset locally.
    Reset,
    /// The whole session died.
    SessionShutdown,
}

struct Ring {
    data: Vec<u8>,
    mask: usize,
    head: usize,
    len: usize,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        Self { data: vec![0u8; capacity], mask: capacity - 1, head: 0, len: 0 }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn available(&self) -> usize {
        self.capacity() - self.len
    }

    fn push_slice(&mut self, bytes: &[u8]) {
        let mut tail = (self.head + self.len) & self.mask;
        for &b in bytes {
            self.data[tail] = b;
            tail = (tail + 1) & self.mask;
        }
        self.len += bytes.len();
    }

    fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        for slot in out.iter_mut().take(n) {
            *slot = self.data[self.head];
            self.head = (self.head + 1) & self.mask;
        }
        self.len -= n;
        n
    }
}

struct Inner {
    ring: Ring,
    /// Bytes we still permit the peer to send before it must stop and wait
    /// for a `WINDOW_UPDATE`.
    recv_window: u32,
    /// `recv_window + buffered == advertised_total` always holds.
    advertised_total: u32,
    /// Bytes drained by the reader since the last `WINDOW_UPDATE` we sent.
    unacked_consumed: u32,
    terminal: Option<Terminal>,
}

/// A bounded byte ring plus the window-credit state for one receive half.
pub struct StreamBuffer {
    stream_id: u32,
    initial_window: u32,
    inner: Mutex<Inner>,
    readable: Condvar,
}

/// Returned from [`StreamBuffer::pop`] when data is actually delivered, to
/// tell the caller whether it must now emit a `WINDOW_UPDATE`.
pub struct PopOutcome {
    pub n: usize,
    pub window_update: Option<u32>,
}

impl StreamBuffer {
    pub fn new(stream_id: u32, initial_window: u32) -> Self {
        Self {
            stream_id,
            initial_window,
            inner: Mutex::new(Inner {
                ring: Ring::with_capacity(initial_window as usize),
                recv_window: initial_window,
                advertised_total: initial_window,
                unacked_consumed: 0,
                terminal: None,
            }),
            readable: Condvar::new(),
        }
    }

    /// Append `bytes` to the buffer. Fails if the stream is already
    /// terminal, or if the peer sent more than our advertised window
    /// allowed.
    pub fn push(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.terminal {
            Some(Terminal::Reset) => return Err(Error::StreamReset),
            Some(Terminal::SessionShutdown) => return Err(Error::SessionShutdown),
            Some(Terminal::Fin) => {
                return Err(Error::Protocol(format!(
                    "data received after FIN on stream {}",
                    self.stream_id
                )));
            }
            None => {}
        }
        if bytes.len() > inner.ring.available() || bytes.len() as u32 > inner.recv_window {
            return Err(Error::ReceiveWindowExceeded(self.stream_id));
        }
        inner.ring.push_slice(bytes);
        inner.recv_window -= bytes.len() as u32;
        drop(inner);
        self.readable.notify_all();
        Ok(())
    }

    /// Remove up to `out.len()` bytes. Blocks until data is available, the
    /// stream goes terminal, or `deadline` passes.
    pub fn pop(&self, out: &mut [u8], deadline: Option<Instant>) -> Result<PopOutcome> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.ring.len > 0 {
                let n = inner.ring.pop_into(out);
                inner.unacked_consumed += n as u32;
                let threshold = self.initial_window / 2;
                let window_update = if inner.unacked_consumed >= threshold.max(1) {
                    let delta = inner.unacked_consumed;
                    inner.recv_window += delta;
                    inner.advertised_total += delta;
                    inner.unacked_consumed = 0;
                    Some(delta)
                } else {
                    None
                };
                return Ok(PopOutcome { n, window_update });
            }
            match inner.terminal {
                Some(Terminal::Fin) => return Ok(PopOutcome { n: 0, window_update: None }),
                Some(Terminal::Reset) => return Err(Error::StreamReset),
                Some(Terminal::SessionShutdown) => return Err(Error::SessionShutdown),
                None => {}
            }
            inner = match deadline {
                None => self.readable.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (guard, timeout_result) =
                        self.readable.wait_timeout(inner, deadline - now).unwrap();
                    if timeout_result.timed_out() && guard.ring.len == 0 && guard.terminal.is_none()
                    {
                        return Err(Error::Timeout);
                    }
                    guard
                }
            };
        }
    }

    /// Move the buffer into a terminal state and wake every blocked reader.
    pub fn terminate(&self, terminal: Terminal) {
        let mut inner = self.inner.lock().unwrap();
        if inner.terminal.is_none() {
            inner.terminal = Some(terminal);
        }
        drop(inner);
        self.readable.notify_all();
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.lock().unwrap().terminal.is_some()
    }
}

/// How long to block waiting on a deadline-bearing operation, given `now`.
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_round_trips() {
        let buf = StreamBuffer::new(1, 1024);
        buf.push(b"hello").unwrap();
        let mut out = [0u8; 5];
        let outcome = buf.pop(&mut out, None).unwrap();
        assert_eq!(outcome.n, 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn fin_with_empty_buffer_is_eof() {
        let buf = StreamBuffer::new(1, 1024);
        buf.terminate(Terminal::Fin);
        let mut out = [0u8; 4];
        let outcome = buf.pop(&mut out, None).unwrap();
        assert_eq!(outcome.n, 0);
    }

    #[test]
    fn fin_drains_buffered_bytes_before_eof() {
        let buf = StreamBuffer::new(1, 1024);
        buf.push(b"ab").unwrap();
        buf.terminate(Terminal::Fin);
        let mut out = [0u8; 2];
        let first = buf.pop(&mut out, None).unwrap();
        assert_eq!(first.n, 2);
        let second = buf.pop(&mut out, None).unwrap();
        assert_eq!(second.n, 0);
    }

    #[test]
    fn reset_surfaces_as_error() {
        let buf = StreamBuffer::new(1, 1024);
        buf.terminate(Terminal::Reset);
        let mut out = [0u8; 4];
        assert!(matches!(buf.pop(&mut out, None), Err(Error::StreamReset)));
    }

    #[test]
    fn push_beyond_window_is_rejected() {
        let buf = StreamBuffer::new(1, 8);
        assert!(buf.push(&[0u8; 9]).is_err());
    }

    #[test]
    fn window_update_emitted_past_half_threshold() {
        let buf = StreamBuffer::new(1, 16);
        buf.push(&[0u8; 16]).unwrap();
        let mut out = [0u8; 16];
        let outcome = buf.pop(&mut out, None).unwrap();
        assert_eq!(outcome.n, 16);
        assert_eq!(outcome.window_update, Some(16));
    }

    #[test]
    fn deadline_times_out_on_empty_buffer() {
        let buf = StreamBuffer::new(1, 16);
        let deadline = Instant::now() + Duration::from_millis(5);
        let mut out = [0u8; 4];
        assert!(matches!(buf.pop(&mut out, Some(deadline)), Err(Error::Timeout)));
    }
}
