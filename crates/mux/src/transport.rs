//! The underlying duplex byte pipe. Anything that can be split into an
//! independently-owned reader and writer half qualifies: a TCP connection,
//! a TLS session, a Unix domain socket, a pair of pipes. Framing,
//! encryption and authentication are the caller's concern, not ours
//! (`spec.md` §1).

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Splits into a reader driven by the session's single receive-loop thread
/// and a writer driven by the session's single send-loop thread.
pub trait Transport: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + WriterControl + 'static;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Optional hooks a concrete writer half can implement so the session can
/// bound a single transport write (`ConnectionWriteTimeout`) and unblock a
/// peer reader thread that is parked in a blocking read (session death,
/// `Close`). Transports that can't support either just keep the default
/// no-op; the session degrades to "best effort" for that transport.
pub trait WriterControl {
    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Best-effort, idempotent: unblocks a concurrent blocking read on the
    /// sibling half of the same transport.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let writer = self.try_clone().expect("tcp stream fd can always be duplicated");
        (self, writer)
    }
}

impl WriterControl for TcpStream {
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    type Reader = std::os::unix::net::UnixStream;
    type Writer = std::os::unix::net::UnixStream;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let writer = self.try_clone().expect("unix stream fd can always be duplicated");
        (self, writer)
    }
}

#[cfg(unix)]
impl WriterControl for std::os::unix::net::UnixStream {
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// A pre-split pair of independent reader/writer halves, for transports
/// that are naturally full-duplex without cloning (e.g. `io::pipe`, or a
/// TLS stream already split by its own library).
pub struct HalfDuplex<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R, W> HalfDuplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R, W> Transport for HalfDuplex<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + WriterControl + 'static,
{
    type Reader = R;
    type Writer = W;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}
