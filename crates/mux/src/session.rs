//! The session facade (`spec.md` §4.8) and the shared state three
//! background workers (receive loop, send loop, keep-alive timer) and
//! every [`crate::stream::Stream`] operate against.
//!
//! `SessionShared` is the non-owning side of the cyclic reference between
//! session and streams (`spec.md` §9): it is reached from a `Stream` only
//! through a `Weak`, while the registry holds the authoritative `Arc`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error};

use crate::buffer::Terminal;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::{Flags, FrameHeader, GoAwayReason};
use crate::ping::{self, PingBook};
use crate::registry::{Registry, Role};
use crate::scheduler::Scheduler;
use crate::stream::{SendState, Stream, StreamState};
use crate::transport::{Transport, WriterControl};

/// Snapshot of session lifecycle for diagnostics (`spec.md` §3's
/// session-state flag, exposed beyond the bare `IsClosed` of §6 — see
/// `SPEC_FULL.md`'s supplemental features).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    LocalGoAway,
    RemoteGoAway,
    Dying,
    Dead,
}

#[derive(Default)]
struct StateFlags {
    dead: bool,
    dying: bool,
    local_go_away: bool,
    remote_go_away: bool,
}

pub(crate) struct SessionShared {
    role: Role,
    config: Config,
    self_weak: std::sync::Weak<SessionShared>,
    registry: Mutex<Registry>,
    scheduler: Arc<Scheduler>,
    accept: Mutex<VecDeque<Arc<StreamState>>>,
    accept_cv: Condvar,
    pings: PingBook,
    state: Mutex<StateFlags>,
    state_cv: Condvar,
}

impl SessionShared {
    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn max_payload(&self) -> u32 {
        self.config.max_stream_window_size
    }

    pub(crate) fn pings(&self) -> &PingBook {
        &self.pings
    }

    pub(crate) fn keep_alive_enabled(&self) -> bool {
        self.config.enable_keep_alive
    }

    pub(crate) fn keep_alive_interval(&self) -> Duration {
        self.config.keep_alive_interval
    }

    pub(crate) fn ping_timeout(&self) -> Duration {
        self.config.ping_timeout
    }

    pub(crate) fn submit(&self, header: FrameHeader, payload: Bytes) {
        self.scheduler.submit(header, payload);
    }

    pub(crate) fn get_stream(&self, id: u32) -> Option<Arc<StreamState>> {
        self.registry.lock().unwrap().get(id)
    }

    pub(crate) fn stream_exists(&self, id: u32) -> bool {
        self.registry.lock().unwrap().contains(id)
    }

    pub(crate) fn remove_stream(&self, id: u32) {
        self.registry.lock().unwrap().remove(id);
    }

    pub(crate) fn create_incoming_stream(&self, id: u32) -> Arc<StreamState> {
        let state = Arc::new(StreamState::new(
            id,
            false,
            self.config.max_stream_window_size,
            self.config.max_stream_window_size,
            self.self_weak.clone(),
        ));
        self.registry.lock().unwrap().insert(id, state.clone());
        state
    }

    /// Returns `false` (and leaves the queue untouched) if the accept
    /// backlog is already at capacity (`spec.md` §4.4).
    pub(crate) fn push_accept(&self, stream: Arc<StreamState>) -> bool {
        let mut q = self.accept.lock().unwrap();
        if q.len() >= self.config.accept_backlog {
            return false;
        }
        q.push_back(stream);
        drop(q);
        self.accept_cv.notify_all();
        true
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.state.lock().unwrap().dead
    }

    pub(crate) fn go_away_remote(&self) {
        self.state.lock().unwrap().remote_go_away = true;
    }

    /// Blocks up to `tick`, woken early by any state transition. Returns
    /// whether the session is dead when it wakes.
    pub(crate) fn wait_tick(&self, tick: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        if guard.dead {
            return true;
        }
        let (guard, _) = self.state_cv.wait_timeout(guard, tick).unwrap();
        guard.dead
    }

    /// Finds (at most) one locally-opened stream still waiting for its
    /// first `ACK` past `StreamOpenTimeout`. Session death on expiry is
    /// the caller's job; this just reports the offender.
    pub(crate) fn sweep_open_timeout(&self) -> Option<u32> {
        let timeout = self.config.stream_open_timeout;
        let streams = self.registry.lock().unwrap().all();
        streams.iter().find(|s| s.is_open_timed_out(timeout)).map(|s| s.id())
    }

    fn state_snapshot(&self) -> SessionState {
        let f = self.state.lock().unwrap();
        if f.dead {
            SessionState::Dead
        } else if f.dying {
            SessionState::Dying
        } else if f.local_go_away {
            SessionState::LocalGoAway
        } else if f.remote_go_away {
            SessionState::RemoteGoAway
        } else {
            SessionState::Open
        }
    }

    pub(crate) fn go_away_local(&self) -> Result<()> {
        let mut f = self.state.lock().unwrap();
        if f.dead || f.dying {
            return Err(Error::SessionShutdown);
        }
        if f.local_go_away {
            return Ok(());
        }
        f.local_go_away = true;
        drop(f);
        self.submit(FrameHeader::go_away(GoAwayReason::Normal), Bytes::new());
        Ok(())
    }

    /// Terminal teardown, shared by graceful `Close` (`fault: None`) and
    /// every fatal path the receive/send loops and the keep-alive timer
    /// can hit. Idempotent: only the first caller does anything.
    pub(crate) fn shutdown(&self, fault: Option<Error>) {
        {
            let mut f = self.state.lock().unwrap();
            if f.dead {
                return;
            }
            f.dead = true;
            f.dying = true;
        }
        let reason = match &fault {
            Some(e) => e.go_away_reason(),
            None => GoAwayReason::Normal,
        };
        match &fault {
            Some(e) => error!(error = %e, "session terminated"),
            None => debug!("session closed"),
        }
        self.submit(FrameHeader::go_away(reason), Bytes::new());
        self.state_cv.notify_all();
        self.accept_cv.notify_all();
        self.scheduler.close();
        self.pings.fail_all();
        for stream in self.registry.lock().unwrap().all() {
            stream.buffer.terminate(Terminal::SessionShutdown);
            stream.force_send_terminal(SendState::Closed);
        }
    }
}

/// One multiplexed connection between two peers over a single transport
/// (`spec.md` Glossary). Constructed via [`Session::client`] or
/// [`Session::server`]; the only difference between the two is the
/// identifier-parity pool each side allocates from.
pub struct Session {
    shared: Arc<SessionShared>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
    keepalive: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Session {
    pub fn client<T: Transport>(transport: T, config: Config) -> Result<Self> {
        Self::new(transport, Role::Client, config)
    }

    pub fn server<T: Transport>(transport: T, config: Config) -> Result<Self> {
        Self::new(transport, Role::Server, config)
    }

    fn new<T: Transport>(transport: T, role: Role, config: Config) -> Result<Self> {
        config.validate()?;
        let (reader, writer) = transport.split();

        let shared = Arc::new_cyclic(|weak| SessionShared {
            role,
            config,
            self_weak: weak.clone(),
            registry: Mutex::new(Registry::new(role)),
            scheduler: Arc::new(Scheduler::new()),
            accept: Mutex::new(VecDeque::new()),
            accept_cv: Condvar::new(),
            pings: PingBook::default(),
            state: Mutex::new(StateFlags::default()),
            state_cv: Condvar::new(),
        });

        let writer_shared = shared.clone();
        let scheduler = shared.scheduler.clone();
        let write_timeout = config.connection_write_timeout;
        let writer_handle = thread::Builder::new()
            .name("mux-send".into())
            .spawn(move || crate::writer::run(writer, scheduler, write_timeout, writer_shared))
            .map_err(Error::Io)?;

        let reader_shared = shared.clone();
        let reader_handle = thread::Builder::new()
            .name("mux-recv".into())
            .spawn(move || crate::reader::run(reader, reader_shared))
            .map_err(Error::Io)?;

        let keepalive_shared = shared.clone();
        let keepalive_handle = thread::Builder::new()
            .name("mux-keepalive".into())
            .spawn(move || crate::keepalive::run(keepalive_shared))
            .map_err(Error::Io)?;

        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader_handle)),
            writer: Mutex::new(Some(writer_handle)),
            keepalive: Mutex::new(Some(keepalive_handle)),
        })
    }

    /// Allocates a stream identifier of this session's parity and returns
    /// the new stream in `Init`. No frame is emitted until the first
    /// `Write`/`Close` on it (`spec.md` §4.8).
    pub fn open(&self) -> Result<Stream> {
        {
            let f = self.shared.state.lock().unwrap();
            if f.dead || f.dying || f.local_go_away {
                return Err(Error::SessionShutdown);
            }
            if f.remote_go_away {
                return Err(Error::RemoteGoAway);
            }
        }
        let mut registry = self.shared.registry.lock().unwrap();
        let id = registry.allocate_id()?;
        let state = Arc::new(StreamState::new(
            id,
            true,
            self.shared.config.max_stream_window_size,
            self.shared.config.max_stream_window_size,
            self.shared.self_weak.clone(),
        ));
        registry.insert(id, state.clone());
        drop(registry);
        Ok(Stream::new(state))
    }

    /// Blocks until a peer-initiated stream is available or the session
    /// dies.
    pub fn accept_stream(&self) -> Result<Stream> {
        let mut q = self.shared.accept.lock().unwrap();
        loop {
            if let Some(state) = q.pop_front() {
                return Ok(Stream::new(state));
            }
            if self.shared.is_dead() {
                return Err(Error::SessionShutdown);
            }
            q = self.shared.accept_cv.wait(q).unwrap();
        }
    }

    /// Measures round-trip time using the session's configured
    /// `PingTimeout`.
    pub fn ping(&self) -> Result<Duration> {
        self.ping_timeout(self.shared.config.ping_timeout)
    }

    pub fn ping_timeout(&self, timeout: Duration) -> Result<Duration> {
        let shared = self.shared.clone();
        let submit_shared = shared.clone();
        ping::ping_and_wait(&shared.pings, timeout, move |nonce| {
            submit_shared.submit(FrameHeader::ping(Flags::SYN, nonce), Bytes::new());
        })
    }

    /// Graceful: no new streams may be `Open`ed afterward, but streams
    /// already open continue uninterrupted (`spec.md` §4.8).
    pub fn go_away(&self) -> Result<()> {
        self.shared.go_away_local()
    }

    /// Terminates the session: emits `GO_AWAY`, closes the transport, and
    /// ends every stream with `ErrSessionShutdown`.
    pub fn close(&self) -> Result<()> {
        self.shared.shutdown(None);
        self.join_workers();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_dead()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state_snapshot()
    }

    fn join_workers(&self) {
        for handle in [&self.reader, &self.writer, &self.keepalive] {
            if let Some(h) = handle.lock().unwrap().take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.shutdown(None);
        self.join_workers();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("role", &self.shared.role).field("state", &self.state()).finish()
    }
}
